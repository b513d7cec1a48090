//! End-to-end tests for rulesets bound to in-memory documents
//!
//! These exercise whole rule chains: tagging, scoring, aggregation, and the
//! transforms applied to outward results.

use plumb_core::{
    ClusterOptions, Datum, Document, Fact, Fnode, MemoryDocument, Rect, Ruleset, and, dom,
    dom_sort_data, element, nearest, nearest_with, out, page, props, rule, rule_named, score,
    type_,
};
use serde_json::json;
use std::rc::Rc;

fn candidates_ruleset() -> Ruleset {
    Ruleset::new(vec![
        rule_named(dom("p"), type_("candidate").score(1.0), "tag").expect("Failed to build tag"),
        rule_named(type_("candidate"), score(2.0), "boost").expect("Failed to build boost"),
        rule_named(dom("p.special"), type_("candidate").score(3.0), "special")
            .expect("Failed to build special"),
        rule(type_("candidate").max(), out("best")).expect("Failed to build best"),
    ])
    .expect("Failed to build ruleset")
}

fn four_paragraphs() -> MemoryDocument {
    MemoryDocument::parse(
        "<body><p id='a'></p><p id='b'></p><p id='c' class='special'></p><p id='d'></p></body>",
    )
}

/// The `data-x` attribute of an fnode's element, or zero
fn position(fnode: &Fnode) -> f64 {
    fnode
        .document()
        .ok()
        .and_then(|doc| doc.attribute(fnode.node(), "data-x").and_then(|x| x.parse().ok()))
        .unwrap_or(0.0)
}

#[test]
fn test_chain_selects_the_single_best_candidate() {
    let doc = four_paragraphs();
    let special = doc.by_id("c").expect("Missing node");
    let bound = candidates_ruleset().against(doc);

    let best = bound.get("best").expect("Query failed");
    assert_eq!(best.len(), 1);
    assert_eq!(best[0].node(), special);

    let scores = best[0].scores_so_far_for("candidate");
    assert_eq!(scores.get("tag"), Some(&1.0));
    assert_eq!(scores.get("boost"), Some(&2.0));
    assert_eq!(scores.get("special"), Some(&3.0));
    let score = best[0].score_for("candidate").expect("Score failed");
    assert!((score - plumb_core::sigmoid(6.0)).abs() < 1e-12);
}

#[test]
fn test_repeated_queries_do_not_rerun_inward_rules() {
    let bound = candidates_ruleset().against(four_paragraphs());

    let first = bound.get("best").expect("First query failed");
    let executed = bound.stats().inward_rules_executed;
    assert_eq!(executed, 3);

    let second = bound.get("best").expect("Second query failed");
    assert_eq!(first, second);
    let stats = bound.stats();
    assert_eq!(stats.inward_rules_executed, executed);
    assert_eq!(stats.outward_rules_evaluated, 2);
    assert_eq!(stats.queries_served, 2);
}

#[test]
fn test_each_binding_has_its_own_state() {
    let rules = candidates_ruleset();
    let first = rules.against(four_paragraphs());
    let second = rules.against(four_paragraphs());

    first.get("best").expect("Query failed");
    assert_eq!(first.stats().inward_rules_executed, 3);
    assert_eq!(second.stats().inward_rules_executed, 0);
}

#[test]
fn test_through_and_all_through_transform_results() {
    let doc =
        MemoryDocument::parse("<ul><li id='one'></li><li id='two'></li><li id='three'></li></ul>");
    let ids = doc.clone();
    let rules = Ruleset::new(vec![
        rule(dom("li"), type_("item")).expect("Failed to build item"),
        rule(
            type_("item"),
            out("ids").through(move |fnode| {
                let id = ids.attribute(fnode.node(), "id").unwrap_or_default();
                Ok(Datum::from(id))
            }),
        )
        .expect("Failed to build ids"),
        rule(
            type_("item"),
            out("reversed").all_through(|mut data| {
                data.reverse();
                Ok(data)
            }),
        )
        .expect("Failed to build reversed"),
        rule(type_("item"), out("sorted").all_through(dom_sort_data))
            .expect("Failed to build sorted"),
    ])
    .expect("Failed to build ruleset");
    let bound = rules.against(doc);

    let names: Vec<_> = bound
        .get_data("ids")
        .expect("Query failed")
        .iter()
        .filter_map(|datum| datum.as_json().cloned())
        .collect();
    assert_eq!(names, vec![json!("one"), json!("two"), json!("three")]);

    let reversed = bound.get("reversed").expect("Query failed");
    let sorted = bound.get("sorted").expect("Query failed");
    assert_eq!(reversed.len(), 3);
    assert_eq!(reversed.first(), sorted.last());
    assert!(sorted.windows(2).all(|pair| pair[0].node() < pair[1].node()));

    let err = bound.get("ids").expect_err("JSON results are not fnodes");
    assert_eq!(err.category(), "lookup");
}

#[test]
fn test_page_moves_scores_to_the_root() {
    let doc = MemoryDocument::parse("<html><head><title></title></head><body></body></html>");
    let root = doc.root();
    let rules = Ruleset::new(vec![
        rule(
            dom("title"),
            props(page(|_| Ok(Fact::new().with_type("titled").with_score(4.0))))
                .type_in(&["titled"]),
        )
        .expect("Failed to build page rule"),
        rule(type_("titled"), out("pages")).expect("Failed to build pages"),
    ])
    .expect("Failed to build ruleset");

    let pages = rules.against(doc).get("pages").expect("Query failed");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].node(), root);
    assert!(pages[0].scores_so_far_for("titled").values().all(|score| *score == 4.0));
}

#[test]
fn test_facts_outside_declared_types_are_rejected() {
    let rules = Ruleset::new(vec![
        rule(dom("p"), props(|_| Ok(Fact::new().with_type("other"))).type_in(&["a"]))
            .expect("Failed to build rule"),
        rule(type_("a"), out("as")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let err = rules.against(four_paragraphs()).get("as").expect_err("Fact should be rejected");
    assert_eq!(err.category(), "invalid_fact");
}

#[test]
fn test_at_most_caps_contributions() {
    let rules = Ruleset::new(vec![
        rule_named(dom("p"), type_("capped").score(5.0).at_most(2.0), "cap")
            .expect("Failed to build rule"),
        rule(type_("capped"), out("capped")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let capped = rules.against(four_paragraphs()).get("capped").expect("Query failed");
    assert_eq!(capped.len(), 4);
    for fnode in capped {
        assert_eq!(fnode.scores_so_far_for("capped").get("cap"), Some(&2.0));
    }
}

#[test]
fn test_conjunction_requires_every_type() {
    let doc = MemoryDocument::parse(
        "<body><p id='plain'></p><p id='both' class='x'></p><div class='x'></div></body>",
    );
    let both = doc.by_id("both").expect("Missing node");
    let rules = Ruleset::new(vec![
        rule(dom("p"), type_("para")).expect("Failed to build para"),
        rule(dom(".x"), type_("marked")).expect("Failed to build marked"),
        rule(and(&[type_("para"), type_("marked")]), type_("chosen"))
            .expect("Failed to build chosen"),
        rule(type_("chosen"), out("chosen")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let chosen = rules.against(doc).get("chosen").expect("Query failed");
    assert_eq!(chosen.len(), 1);
    assert_eq!(chosen[0].node(), both);
}

#[test]
fn test_max_returns_every_tied_fnode() {
    let doc = MemoryDocument::parse("<body><p class='hi'></p><p class='hi'></p><p></p></body>");
    let rules = Ruleset::new(vec![
        rule_named(dom("p"), type_("t").score(3.0), "base").expect("Failed to build base"),
        rule_named(dom(".hi"), type_("t").score(2.0), "bonus").expect("Failed to build bonus"),
        rule(type_("t").max(), out("top")).expect("Failed to build top"),
    ])
    .expect("Failed to build ruleset");

    let bound = rules.against(doc);
    let top = bound.get("top").expect("Query failed");
    assert_eq!(top.len(), 2);
    let doc = bound.document();
    for fnode in &top {
        assert_eq!(doc.attribute(fnode.node(), "class"), Some("hi"));
    }
    assert_eq!(bound.select(&type_("t")).expect("Select failed").len(), 3);
}

#[test]
fn test_nearest_pairs_each_image_with_the_closest_price() {
    let mut doc = MemoryDocument::parse(
        "<body><img id='i1'/><img id='i2'/><span id='s1'></span><span id='s2'></span></body>",
    );
    let [i1, i2, s1, s2] = ["i1", "i2", "s1", "s2"].map(|id| doc.by_id(id).expect("Missing node"));
    doc.set_rect(i1, Rect::new(0.0, 0.0, 10.0, 10.0));
    doc.set_rect(i2, Rect::new(500.0, 0.0, 10.0, 10.0));
    doc.set_rect(s1, Rect::new(0.0, 20.0, 10.0, 10.0));
    doc.set_rect(s2, Rect::new(500.0, 20.0, 10.0, 10.0));

    let priced = priced_ruleset(nearest(type_("image"), type_("price")))
        .against(doc)
        .get("priced")
        .expect("Query failed");
    assert_eq!(priced.len(), 2);
    for fnode in priced {
        let partner = match fnode.note_for("priced").expect("Note failed") {
            Some(Datum::Node(partner)) => partner.node(),
            other => panic!("expected a node note, got {other:?}"),
        };
        let expected = if fnode.node() == i1 { s1 } else { s2 };
        assert_eq!(partner, expected);
    }
}

#[test]
fn test_nearest_with_no_partners_emits_nothing() {
    let rules = Ruleset::new(vec![
        rule(dom("p"), type_("para")).expect("Failed to build para"),
        rule(dom("img"), type_("image")).expect("Failed to build image"),
        rule(nearest(type_("para"), type_("image")), type_("paired"))
            .expect("Failed to build paired"),
        rule(type_("paired"), out("paired")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let paired = rules.against(four_paragraphs()).get("paired").expect("Query failed");
    assert!(paired.is_empty());
}

fn priced_ruleset(pairing: plumb_core::Side) -> Ruleset {
    Ruleset::new(vec![
        rule(dom("img"), type_("image")).expect("Failed to build image"),
        rule(dom("span"), type_("price")).expect("Failed to build price"),
        rule(pairing, type_("priced")).expect("Failed to build priced"),
        rule(type_("priced"), out("priced")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset")
}

fn partner_of(fnode: &Fnode) -> plumb_core::NodeId {
    match fnode.note_for("priced").expect("Failed to read note") {
        Some(Datum::Node(partner)) => partner.node(),
        other => panic!("expected a node note, got {other:?}"),
    }
}

#[test]
fn test_nearest_with_uses_the_supplied_distance() {
    let doc = MemoryDocument::parse(
        "<body><img id='i1' data-x='0'/><img id='i2' data-x='10'/>\
         <span id='s1' data-x='9'></span><span id='s2' data-x='1'></span></body>",
    );
    let [i1, s1, s2] = ["i1", "s1", "s2"].map(|id| doc.by_id(id).expect("Missing node"));
    let by_position = Rc::new(|a: &Fnode, b: &Fnode| (position(a) - position(b)).abs());

    let priced = priced_ruleset(nearest_with(type_("image"), type_("price"), by_position))
        .against(doc)
        .get("priced")
        .expect("Query failed");
    assert_eq!(priced.len(), 2);
    for fnode in &priced {
        let expected = if fnode.node() == i1 { s2 } else { s1 };
        assert_eq!(partner_of(fnode), expected);
    }
}

#[test]
fn test_when_filters_the_nearest_left_operand() {
    let mut doc = MemoryDocument::parse(
        "<body><img id='i1'/><img id='i2'/><span id='s1'></span><span id='s2'></span></body>",
    );
    let [i1, i2, s1, s2] = ["i1", "i2", "s1", "s2"].map(|id| doc.by_id(id).expect("Missing node"));
    doc.set_rect(i1, Rect::new(0.0, 0.0, 10.0, 10.0));
    doc.set_rect(i2, Rect::new(500.0, 0.0, 10.0, 10.0));
    doc.set_rect(s1, Rect::new(0.0, 20.0, 10.0, 10.0));
    doc.set_rect(s2, Rect::new(500.0, 20.0, 10.0, 10.0));

    let pairing = nearest(type_("image"), type_("price")).when(move |fnode| Ok(fnode.node() == i2));
    let priced = priced_ruleset(pairing).against(doc).get("priced").expect("Query failed");
    assert_eq!(priced.len(), 1);
    assert_eq!(priced[0].node(), i2);
    assert_eq!(partner_of(&priced[0]), s2);
}

#[test]
fn test_when_filters_candidates_before_clustering() {
    let doc = MemoryDocument::parse(
        "<body><p id='near' data-x='0'></p><p id='mid' data-x='1'></p>\
         <p id='far' class='big' data-x='10'></p></body>",
    );
    let far = doc.by_id("far").expect("Missing node");
    let near = doc.by_id("near").expect("Missing node");
    let options = || {
        ClusterOptions::default()
            .with_splitting_distance(3.0)
            .with_distance(|a, b| (position(a) - position(b)).abs())
    };
    let build = |lhs: plumb_core::Side| {
        Ruleset::new(vec![
            rule_named(dom("p"), type_("para").score(1.0), "base").expect("Failed to build base"),
            rule_named(dom(".big"), type_("para").score(4.0), "big").expect("Failed to build big"),
            rule(lhs, out("cluster")).expect("Failed to build cluster"),
        ])
        .expect("Failed to build ruleset")
    };

    let unfiltered = build(type_("para").best_cluster(options()))
        .against(doc.clone())
        .get("cluster")
        .expect("Query failed");
    assert_eq!(unfiltered.len(), 2);
    assert!(unfiltered.iter().all(|fnode| fnode.node() != far));

    let filtered = build(type_("para").best_cluster(options()).when(move |f| Ok(f.node() != near)))
        .against(doc)
        .get("cluster")
        .expect("Query failed");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].node(), far);
}

#[test]
fn test_element_takes_the_root_only_when_it_matches() {
    let doc = MemoryDocument::parse("<body><form id='login'><input></form></body>");
    let form = doc.by_id("login").expect("Missing node");
    let rules = |selector: &str| {
        Ruleset::new(vec![
            rule(element(selector), type_("root")).expect("Failed to build root"),
            rule(type_("root"), out("root")).expect("Failed to build out"),
        ])
        .expect("Failed to build ruleset")
    };

    let whole = rules("html").against(doc.clone()).get("root").expect("Query failed");
    assert_eq!(whole.len(), 1);
    assert_eq!(whole[0].node(), doc.root());
    let none = rules("body").against(doc.clone()).get("root").expect("Query failed");
    assert!(none.is_empty());

    let subtree = doc.rooted_at(form).expect("Failed to root at the form");
    let matched = rules("form").against(subtree.clone()).get("root").expect("Query failed");
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].node(), form);
    let unmatched = rules("input").against(subtree).get("root").expect("Query failed");
    assert!(unmatched.is_empty());
}

#[test]
fn test_dom_selects_the_document_element() {
    let doc = MemoryDocument::parse("<p>hi</p>");
    let root = doc.root();
    let rules = Ruleset::new(vec![
        rule(dom("html"), type_("page")).expect("Failed to build page"),
        rule(dom("*"), type_("any")).expect("Failed to build any"),
        rule(type_("page"), out("page")).expect("Failed to build page out"),
        rule(type_("any"), out("any")).expect("Failed to build any out"),
    ])
    .expect("Failed to build ruleset");
    let bound = rules.against(doc);

    let page = bound.get("page").expect("Query failed");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].node(), root);
    let tags: Vec<_> = bound
        .get("any")
        .expect("Query failed")
        .iter()
        .filter_map(|fnode| bound.document().tag_name(fnode.node()).map(str::to_string))
        .collect();
    assert_eq!(tags, vec!["html", "head", "body", "p"]);
}

#[test]
fn test_dom_reaches_into_shadow_trees() {
    let mut doc = MemoryDocument::parse(
        "<body><div id='host'></div><button id='light'>Buy</button></body>",
    );
    let host = doc.by_id("host").expect("Missing node");
    doc.attach_shadow(host, "<button id='shadowed'>Add to cart</button>")
        .expect("Failed to attach shadow root");
    let shadowed = doc.by_id("shadowed").expect("Missing node");
    let light = doc.by_id("light").expect("Missing node");
    let rules = Ruleset::new(vec![
        rule(dom("button"), type_("button")).expect("Failed to build button"),
        rule(type_("button"), out("buttons")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let buttons: Vec<_> = rules
        .against(doc)
        .get("buttons")
        .expect("Query failed")
        .iter()
        .map(Fnode::node)
        .collect();
    assert_eq!(buttons, vec![shadowed, light]);
}

#[test]
fn test_conserved_score_is_added_once_per_source() {
    let rules = Ruleset::new(vec![
        rule_named(dom("p"), type_("seed").score(2.0), "seed").expect("Failed to build seed"),
        rule_named(type_("seed"), type_("grown").conserve_score(), "carry")
            .expect("Failed to build carry"),
        rule_named(type_("seed"), type_("grown").conserve_score(), "carry_again")
            .expect("Failed to build carry_again"),
        rule(type_("grown"), out("grown")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let grown = rules.against(four_paragraphs()).get("grown").expect("Query failed");
    assert_eq!(grown.len(), 4);
    for fnode in grown {
        let scores = fnode.scores_so_far_for("grown");
        let conserved: Vec<_> =
            scores.iter().filter(|(rule, _)| rule.starts_with("_conserved:")).collect();
        assert_eq!(conserved.len(), 1);
        assert!((conserved[0].1 - plumb_core::sigmoid(2.0)).abs() < 1e-12);
    }
}

#[test]
fn test_score_adds_to_a_conserved_score() {
    let rules = Ruleset::new(vec![
        rule_named(dom("p"), type_("image").score(1.0), "image").expect("Failed to build image"),
        rule_named(type_("image"), type_("priced_image").score(2.0).conserve_score(), "priced")
            .expect("Failed to build priced"),
        rule(type_("priced_image"), out("priced")).expect("Failed to build out"),
    ])
    .expect("Failed to build ruleset");

    let priced = rules.against(four_paragraphs()).get("priced").expect("Query failed");
    assert_eq!(priced.len(), 4);
    let expected = plumb_core::sigmoid(2.0 + plumb_core::sigmoid(1.0));
    for fnode in priced {
        let scores = fnode.scores_so_far_for("priced_image");
        assert_eq!(scores.get("priced"), Some(&2.0));
        assert_eq!(scores.len(), 2);
        let score = fnode.score_for("priced_image").expect("Failed to score");
        assert!((score - expected).abs() < 1e-12);
    }
}
