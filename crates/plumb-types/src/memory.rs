//! In-memory element tree backed by `scraper`
//!
//! `MemoryDocument::parse` hands markup to `scraper`'s HTML5 parser and
//! mirrors the resulting element and text nodes into an arena, so topology
//! queries are plain index lookups. Selector matching goes back to the parsed
//! tree. Layout boxes and computed styles can be attached afterwards, so
//! geometry-aware predicates can be exercised without a browser.
//!
//! Shadow trees are parsed as fragments and attached to a host element with
//! [`MemoryDocument::attach_shadow`].

use crate::document::{Document, NodeId, Rect};
use crate::error::{DocumentError, DocumentResult};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    ShadowRoot,
    Element { tag: String, attributes: Vec<(String, String)> },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    tree: usize,
    /// Position among the parsed parent's children; `None` for tree anchors
    slot: Option<usize>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    shadow_root: Option<NodeId>,
    rect: Option<Rect>,
    style: BTreeMap<String, String>,
}

impl NodeData {
    fn new(kind: NodeKind, tree: usize, slot: Option<usize>, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            tree,
            slot,
            parent,
            children: Vec::new(),
            shadow_root: None,
            rect: None,
            style: BTreeMap::new(),
        }
    }
}

/// One parsed tree: the main document or an attached shadow tree
///
/// The tree's content nodes occupy the arena right after `anchor`, in the
/// order [`content_of`] lists them.
#[derive(Debug, Clone)]
struct ParsedTree {
    html: Html,
    anchor: NodeId,
}

/// A parsed element or text node, with where it hangs in the parse tree
struct Content<'a> {
    node: ContentNode<'a>,
    /// Index of the parent within the same listing; `None` under the anchor
    parent: Option<usize>,
    slot: usize,
}

enum ContentNode<'a> {
    Element(ElementRef<'a>),
    Text(&'a str),
}

/// Element and text descendants of `anchor` in document order
fn content_of(anchor: ElementRef<'_>) -> Vec<Content<'_>> {
    let mut listed = Vec::new();
    let mut stack: Vec<_> =
        anchor.children().enumerate().map(|(slot, child)| (child, None, slot)).collect();
    stack.reverse();
    while let Some((node, parent, slot)) = stack.pop() {
        let content = match (ElementRef::wrap(node), node.value().as_text()) {
            (Some(element), _) => ContentNode::Element(element),
            (None, Some(text)) => ContentNode::Text(&**text),
            (None, None) => continue,
        };
        let index = listed.len();
        listed.push(Content { node: content, parent, slot });
        let mut children: Vec<_> =
            node.children().enumerate().map(|(slot, child)| (child, Some(index), slot)).collect();
        children.reverse();
        stack.extend(children);
    }
    listed
}

fn element_kind(element: ElementRef<'_>) -> NodeKind {
    let value = element.value();
    let attributes = value.attrs().map(|(name, value)| (name.to_string(), value.to_string()));
    NodeKind::Element { tag: value.name().to_string(), attributes: attributes.collect() }
}

fn parse_selector(selector: &str) -> DocumentResult<Selector> {
    Selector::parse(selector)
        .map_err(|error| DocumentError::invalid_selector(selector, error.to_string()))
}

/// An HTML document tree with optional shadow trees, layout and style
///
/// Layout and style setters index the arena directly and panic when handed a
/// [`NodeId`] issued by a different document.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    trees: Vec<ParsedTree>,
    nodes: Vec<NodeData>,
    root: NodeId,
    /// Queries return nodes strictly inside this one
    scope: NodeId,
}

impl MemoryDocument {
    /// Parse an HTML document
    ///
    /// Parsing follows the HTML5 algorithm and never fails: missing `<html>`,
    /// `<head>` and `<body>` elements are supplied and unclosed tags are
    /// closed, just as a browser would.
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let mut nodes = vec![NodeData::new(NodeKind::Document, 0, None, None)];
        let document = NodeId(0);
        let root = NodeId(1);
        let top = html.root_element();
        nodes.push(NodeData::new(element_kind(top), 0, None, Some(document)));
        nodes[document.0].children.push(root);
        import(&mut nodes, 0, root, top);
        Self { trees: vec![ParsedTree { html, anchor: root }], nodes, root, scope: document }
    }

    /// Parse `markup` as a fragment and attach it as the shadow tree of `host`
    ///
    /// Returns the new shadow root. An element hosts at most one shadow tree.
    pub fn attach_shadow(&mut self, host: NodeId, markup: &str) -> DocumentResult<NodeId> {
        let data = self.nodes.get(host.0).ok_or(DocumentError::UnknownNode { node: host.0 })?;
        if !matches!(data.kind, NodeKind::Element { .. }) {
            return Err(DocumentError::NotAnElement { node: host.0 });
        }
        if data.shadow_root.is_some() {
            return Err(DocumentError::ShadowRootExists { node: host.0 });
        }

        let html = Html::parse_fragment(markup);
        let tree = self.trees.len();
        let shadow = NodeId(self.nodes.len());
        self.nodes.push(NodeData::new(NodeKind::ShadowRoot, tree, None, Some(host)));
        import(&mut self.nodes, tree, shadow, html.root_element());
        self.nodes[host.0].shadow_root = Some(shadow);
        self.trees.push(ParsedTree { html, anchor: shadow });
        Ok(shadow)
    }

    /// Attach a layout box to a node
    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.nodes[node.0].rect = Some(rect);
    }

    /// Attach a computed style property to a node
    pub fn set_style(&mut self, node: NodeId, property: &str, value: &str) {
        self.nodes[node.0].style.insert(property.to_string(), value.to_string());
    }

    /// Return a copy of this document standing for the subtree under `node`
    ///
    /// The copy's root is `node`, and queries only return its descendants.
    pub fn rooted_at(&self, node: NodeId) -> DocumentResult<Self> {
        let data = self.nodes.get(node.0).ok_or(DocumentError::UnknownNode { node: node.0 })?;
        if !matches!(data.kind, NodeKind::Element { .. }) {
            return Err(DocumentError::NotAnElement { node: node.0 });
        }
        Ok(Self { root: node, scope: node, ..self.clone() })
    }

    /// Concatenated text of `node` and all its descendants, shadow trees excluded
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(data) = self.nodes.get(current.0) else {
                continue;
            };
            match &data.kind {
                NodeKind::Text(text) => out.push_str(text),
                _ => stack.extend(data.children.iter().rev()),
            }
        }
        out
    }

    /// First element with the given `id`, searching the document before any
    /// shadow tree
    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        (0..self.nodes.len()).map(NodeId).find(|&n| self.attribute(n, "id") == Some(id))
    }

    fn in_scope(&self, node: NodeId) -> bool {
        node != self.scope && (self.scope.0 == 0 || self.contains(self.scope, node))
    }

    /// Matching elements of one parsed tree, in that tree's document order
    fn select_in(&self, tree: &ParsedTree, selector: &Selector) -> Vec<NodeId> {
        let top = tree.html.root_element();
        let mut found = Vec::new();
        if matches!(self.nodes[tree.anchor.0].kind, NodeKind::Element { .. })
            && self.in_scope(tree.anchor)
            && selector.matches(&top)
        {
            found.push(tree.anchor);
        }
        for (offset, content) in content_of(top).iter().enumerate() {
            let node = NodeId(tree.anchor.0 + 1 + offset);
            if let ContentNode::Element(element) = &content.node {
                if selector.matches(element) && self.in_scope(node) {
                    found.push(node);
                }
            }
        }
        found
    }

    /// Walk back to the parsed element behind an element handle
    fn element_ref(&self, node: NodeId) -> Option<ElementRef<'_>> {
        let mut slots = Vec::new();
        let mut current = self.nodes.get(node.0)?;
        while let Some(slot) = current.slot {
            slots.push(slot);
            current = self.nodes.get(current.parent?.0)?;
        }
        let mut cursor = self.trees.get(current.tree)?.html.root_element();
        for slot in slots.into_iter().rev() {
            cursor = ElementRef::wrap(cursor.children().nth(slot)?)?;
        }
        Some(cursor)
    }
}

/// Mirror the content under `top` into the arena, below `anchor`
fn import(nodes: &mut Vec<NodeData>, tree: usize, anchor: NodeId, top: ElementRef<'_>) {
    let first = nodes.len();
    for content in content_of(top) {
        let parent = content.parent.map_or(anchor, |index| NodeId(first + index));
        let kind = match content.node {
            ContentNode::Element(element) => element_kind(element),
            ContentNode::Text(text) => NodeKind::Text(text.to_string()),
        };
        let id = NodeId(nodes.len());
        nodes.push(NodeData::new(kind, tree, Some(content.slot), Some(parent)));
        nodes[parent.0].children.push(id);
    }
}

impl Document for MemoryDocument {
    fn root(&self) -> NodeId {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes.get(node.0).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    fn query_selector_all(&self, selector: &str) -> DocumentResult<Vec<NodeId>> {
        let selector = parse_selector(selector)?;
        let tree = self.nodes[self.scope.0].tree;
        Ok(self.trees.get(tree).map(|t| self.select_in(t, &selector)).unwrap_or_default())
    }

    fn query_selector_all_deep(&self, selector: &str) -> DocumentResult<Vec<NodeId>> {
        let selector = parse_selector(selector)?;
        let mut found = Vec::new();
        for tree in &self.trees {
            found.extend(self.select_in(tree, &selector));
        }
        if self.trees.len() > 1 {
            found.sort_by(|a, b| self.document_order(*a, *b));
        }
        Ok(found)
    }

    fn matches(&self, node: NodeId, selector: &str) -> DocumentResult<bool> {
        let data = self.nodes.get(node.0).ok_or(DocumentError::UnknownNode { node: node.0 })?;
        let selector = parse_selector(selector)?;
        if !matches!(data.kind, NodeKind::Element { .. }) {
            return Ok(false);
        }
        Ok(self.element_ref(node).is_some_and(|element| selector.matches(&element)))
    }

    fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.nodes.get(host.0)?.shadow_root
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    fn bounding_box(&self, node: NodeId) -> Option<Rect> {
        self.nodes.get(node.0)?.rect
    }

    fn computed_style(&self, node: NodeId, property: &str) -> Option<String> {
        self.nodes.get(node.0)?.style.get(property).cloned()
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let siblings = &self.nodes.get(self.parent(node)?.0)?.children;
        let index = siblings.iter().position(|&n| n == node)?;
        siblings.get(index + 1).copied()
    }

    fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let siblings = &self.nodes.get(self.parent(node)?.0)?.children;
        let index = siblings.iter().position(|&n| n == node)?;
        index.checked_sub(1).and_then(|i| siblings.get(i).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn first(doc: &MemoryDocument, selector: &str) -> NodeId {
        doc.query_selector_all(selector).unwrap()[0]
    }

    #[test]
    fn test_parse_supplies_document_structure() {
        let doc = MemoryDocument::parse("<p>hello</p>");
        assert_eq!(doc.tag_name(doc.root()), Some("html"));
        assert_eq!(doc.parent(doc.root()), Some(NodeId(0)));
        assert_eq!(doc.tag_name(NodeId(0)), None);

        let tags: Vec<_> = doc
            .query_selector_all("*")
            .unwrap()
            .into_iter()
            .map(|n| doc.tag_name(n).unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["html", "head", "body", "p"]);
    }

    #[test]
    fn test_parse_recovers_like_a_browser() {
        let doc = MemoryDocument::parse("<ul><li>one<li>two</ul><p>a<p>b");
        assert_eq!(doc.query_selector_all("ul > li").unwrap().len(), 2);
        assert_eq!(doc.query_selector_all("body > p").unwrap().len(), 2);

        let doc = MemoryDocument::parse("<body><script>if (a < b) {}</script></body>");
        let script = first(&doc, "script");
        assert_eq!(doc.text_content(script), "if (a < b) {}");
    }

    #[test]
    fn test_attributes_text_and_whitespace() {
        let doc = MemoryDocument::parse(
            "<!DOCTYPE html><div id=main class='a b'><!-- c -->\
             <input disabled value=\"x &amp; y\">\n<p>Hi <b>there</b></p></div>",
        );
        let input = first(&doc, "input");
        assert_eq!(doc.attribute(input, "disabled"), Some(""));
        assert_eq!(doc.attribute(input, "value"), Some("x & y"));

        let main = doc.by_id("main").unwrap();
        assert_eq!(doc.attribute(main, "class"), Some("a b"));
        let p = first(&doc, "p");
        assert_eq!(doc.text_content(p), "Hi there");

        let gap = doc.next_sibling(input).unwrap();
        assert!(doc.is_whitespace(gap));
        assert_eq!(doc.text(gap), Some("\n"));
        assert!(!doc.is_whitespace(p));
        assert_eq!(doc.previous_sibling(p), Some(gap));
    }

    #[test]
    fn test_selector_matching() {
        let doc = MemoryDocument::parse(
            "<div id='main' class='content wide'><p class='lead'>a</p>\
             <span data-kind='price tag'>b</span></div><p>c</p>",
        );
        assert_eq!(doc.query_selector_all("p").unwrap().len(), 2);
        assert_eq!(doc.query_selector_all("#main > .lead").unwrap().len(), 1);
        assert_eq!(doc.query_selector_all("[data-kind~=price]").unwrap().len(), 1);
        assert_eq!(doc.query_selector_all("div p, span").unwrap().len(), 2);

        let lead = first(&doc, ".lead");
        assert!(doc.matches(lead, "div > p.lead").unwrap());
        assert!(!doc.matches(lead, "span").unwrap());
        assert!(doc.matches(doc.root(), "html").unwrap());
        assert!(matches!(
            doc.query_selector_all("p["),
            Err(DocumentError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_text_nodes_never_match() {
        let doc = MemoryDocument::parse("<p>words</p>");
        let p = first(&doc, "p");
        let text = doc.children(p)[0];
        assert!(!doc.matches(text, "*").unwrap());
        assert!(doc.matches(NodeId(999), "*").is_err());
    }

    #[test]
    fn test_document_order() {
        let doc = MemoryDocument::parse("<section><a><b></b></a><i></i></section>");
        let (a, b, i) = (first(&doc, "a"), first(&doc, "b"), first(&doc, "i"));
        assert_eq!(doc.document_order(a, b), Ordering::Less);
        assert_eq!(doc.document_order(b, a), Ordering::Greater);
        assert_eq!(doc.document_order(b, i), Ordering::Less);
        assert_eq!(doc.document_order(i, a), Ordering::Greater);
        assert_eq!(doc.document_order(i, i), Ordering::Equal);
    }

    #[test]
    fn test_rooted_at_excludes_outside_nodes() {
        let doc = MemoryDocument::parse("<section><a><b></b></a><b></b></section>");
        let a = first(&doc, "a");
        let sub = doc.rooted_at(a).unwrap();
        assert_eq!(sub.root(), a);
        assert_eq!(sub.query_selector_all("b").unwrap().len(), 1);
        assert!(sub.query_selector_all("a").unwrap().is_empty());
        assert!(sub.matches(a, "a").unwrap());

        let text_doc = MemoryDocument::parse("<p>t</p>");
        let text = text_doc.children(first(&text_doc, "p"))[0];
        let err = text_doc.rooted_at(text).unwrap_err();
        assert_eq!(err, DocumentError::NotAnElement { node: text.0 });
    }

    #[test]
    fn test_shadow_trees() {
        let mut doc =
            MemoryDocument::parse("<div id='host'><p id='light'></p></div><p id='after'></p>");
        let host = doc.by_id("host").unwrap();
        let shadow = doc.attach_shadow(host, "<p id='inner'>x</p><span></span>").unwrap();

        assert_eq!(doc.shadow_root(host), Some(shadow));
        assert_eq!(doc.parent(shadow), Some(host));
        assert!(!doc.children(host).contains(&shadow));
        assert_eq!(doc.tag_name(shadow), None);

        let inner = doc.by_id("inner").unwrap();
        assert_eq!(doc.parent(inner), Some(shadow));
        assert!(doc.contains(host, inner));
        assert!(doc.matches(inner, "p").unwrap());

        let (light, after) = (doc.by_id("light").unwrap(), doc.by_id("after").unwrap());
        assert_eq!(doc.query_selector_all("p").unwrap(), vec![light, after]);
        assert_eq!(doc.query_selector_all_deep("p").unwrap(), vec![inner, light, after]);

        assert_eq!(
            doc.attach_shadow(host, "<i></i>"),
            Err(DocumentError::ShadowRootExists { node: host.0 })
        );
        let text = doc.children(inner)[0];
        assert_eq!(doc.attach_shadow(text, ""), Err(DocumentError::NotAnElement { node: text.0 }));
    }

    #[test]
    fn test_nested_shadow_trees() {
        let mut doc = MemoryDocument::parse("<div id='outer'></div>");
        let outer = doc.by_id("outer").unwrap();
        doc.attach_shadow(outer, "<div id='middle'></div>").unwrap();
        let middle = doc.by_id("middle").unwrap();
        doc.attach_shadow(middle, "<b id='deepest'></b>").unwrap();

        let found = doc.query_selector_all_deep("b").unwrap();
        assert_eq!(found, vec![doc.by_id("deepest").unwrap()]);
        assert!(doc.query_selector_all("b").unwrap().is_empty());
    }
}
