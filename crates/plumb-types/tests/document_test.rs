//! Property and behaviour tests for the in-memory document adapter

use plumb_types::{Document, DocumentError, MemoryDocument, NodeId, Rect};
use proptest::prelude::*;
use std::cmp::Ordering;

/// Markup for a tree where element `i + 1` sits under the element chosen by
/// `parents[i]`; element 0 is the body. Every element carries `id="n<i>"`.
fn build_markup(parents: &[usize]) -> String {
    let mut children: Vec<Vec<usize>> = vec![Vec::new()];
    for (i, &choice) in parents.iter().enumerate() {
        children[choice % (i + 1)].push(i + 1);
        children.push(Vec::new());
    }

    fn render(node: usize, children: &[Vec<usize>], out: &mut String) {
        let tag = match node {
            0 => "body",
            n if n % 3 == 1 => "div",
            _ => "span",
        };
        out.push_str(&format!("<{tag} id=\"n{node}\">"));
        for &child in &children[node] {
            render(child, children, out);
        }
        out.push_str(&format!("</{tag}>"));
    }

    let mut out = String::new();
    render(0, &children, &mut out);
    out
}

fn build_tree(parents: &[usize]) -> (MemoryDocument, Vec<NodeId>) {
    let doc = MemoryDocument::parse(&build_markup(parents));
    let nodes = (0..=parents.len())
        .map(|i| doc.by_id(&format!("n{i}")).expect("Failed to find generated element"))
        .collect();
    (doc, nodes)
}

proptest! {
    #[test]
    fn selector_input_never_panics(input in "[a-z0-9 .#>+~:()\\[\\]=*,'\"-]{0,24}") {
        let doc = MemoryDocument::parse("<p class='a'>x</p>");
        let _ = doc.query_selector_all(&input);
        let _ = doc.matches(doc.root(), &input);
    }

    #[test]
    fn universal_selector_finds_every_element(
        parents in prop::collection::vec(0usize..50, 0..40),
    ) {
        let (doc, nodes) = build_tree(&parents);
        let found = doc.query_selector_all("*").expect("Failed to query");
        prop_assert_eq!(found.len(), nodes.len() + 2);
        prop_assert_eq!(found[0], doc.root());
        for node in &nodes {
            prop_assert!(found.contains(node));
        }
    }

    #[test]
    fn query_results_are_in_document_order(parents in prop::collection::vec(0usize..50, 1..40)) {
        let (doc, _) = build_tree(&parents);
        let found = doc.query_selector_all("div, span").expect("Failed to query");
        prop_assert_eq!(found.len(), parents.len());
        for pair in found.windows(2) {
            prop_assert_eq!(doc.document_order(pair[0], pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn generated_parents_survive_parsing(parents in prop::collection::vec(0usize..50, 0..40)) {
        let (doc, nodes) = build_tree(&parents);
        for (i, &choice) in parents.iter().enumerate() {
            prop_assert_eq!(doc.parent(nodes[i + 1]), Some(nodes[choice % (i + 1)]));
        }
        for node in nodes {
            prop_assert!(doc.contains(doc.root(), node));
        }
    }
}

#[test]
fn test_geometry_and_style_hooks() {
    let mut doc = MemoryDocument::parse("<body><div></div><p></p></body>");
    let div = doc.query_selector_all("div").expect("Failed to query")[0];
    let p = doc.query_selector_all("p").expect("Failed to query")[0];
    doc.set_rect(div, Rect::new(10.0, 20.0, 100.0, 40.0));
    doc.set_style(div, "display", "none");

    assert_eq!(doc.bounding_box(div).expect("Failed to read box").center(), (60.0, 40.0));
    assert_eq!(doc.bounding_box(p), None);
    assert_eq!(doc.computed_style(div, "display").as_deref(), Some("none"));
    assert_eq!(doc.computed_style(p, "display"), None);
}

#[test]
fn test_matches_reports_invalid_selector() {
    let doc = MemoryDocument::parse("<body><p></p></body>");
    assert!(doc.matches(doc.root(), "html").expect("Failed to match"));
    assert!(!doc.matches(doc.root(), "body").expect("Failed to match"));
    assert!(matches!(
        doc.matches(doc.root(), "p >"),
        Err(DocumentError::InvalidSelector { .. })
    ));
    assert!(matches!(doc.matches(NodeId(99), "p"), Err(DocumentError::UnknownNode { node: 99 })));
}

#[test]
fn test_deep_query_finds_shadow_content_in_composed_order() {
    let mut doc =
        MemoryDocument::parse("<body><div id='host'><p id='light'></p></div><p id='tail'></p>");
    let host = doc.by_id("host").expect("Failed to find host");
    let shadow = doc.attach_shadow(host, "<p id='inner'></p>").expect("Failed to attach");
    let [light, tail, inner] =
        ["light", "tail", "inner"].map(|id| doc.by_id(id).expect("Failed to find element"));

    assert_eq!(doc.shadow_root(host), Some(shadow));
    assert_eq!(doc.parent(shadow), Some(host));
    assert_eq!(doc.query_selector_all("p").expect("Failed to query"), vec![light, tail]);
    assert_eq!(
        doc.query_selector_all_deep("p").expect("Failed to query"),
        vec![inner, light, tail]
    );
}
