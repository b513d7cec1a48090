//! Helpers for writing rules

use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::types::{Datum, Fact};
use plumb_types::{Document, NodeId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const BLOCK_TAGS: &[&str] = &[
    "address", "blockquote", "body", "center", "dir", "div", "dl", "fieldset", "form", "h1", "h2",
    "h3", "h4", "h5", "h6", "hr", "isindex", "menu", "noframes", "noscript", "ol", "p", "pre",
    "table", "ul", "dd", "dt", "frameset", "li", "tbody", "td", "tfoot", "th", "thead", "tr",
    "html",
];

const RGBA_PATTERN: &str =
    r"(?i)^rgba?\s*\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*(?:,\s*(\d+(?:\.\d+)?)\s*)?\)$";

/// The logistic function, mapping any real to (0, 1)
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Scale `number` linearly so `zero_at` maps to 0 and `one_at` to 1, clamping
/// outside that range. Works in either direction.
pub fn linear_scale(number: f64, zero_at: f64, one_at: f64) -> f64 {
    let rising = zero_at < one_at;
    if rising {
        if number <= zero_at {
            return 0.0;
        } else if number >= one_at {
            return 1.0;
        }
    } else if number >= zero_at {
        return 0.0;
    } else if number <= one_at {
        return 1.0;
    }
    (number - zero_at) / (one_at - zero_at)
}

/// Every item sharing the greatest key, in input order
pub fn maxes<T>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> f64) -> Vec<T> {
    let mut best: Vec<T> = Vec::new();
    let mut best_key = f64::NEG_INFINITY;
    for item in items {
        let k = key(&item);
        if best.is_empty() || k > best_key {
            best_key = k;
            best.clear();
            best.push(item);
        } else if k == best_key {
            best.push(item);
        }
    }
    best
}

/// The first item with the greatest key
pub fn max_by_key<T>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> f64) -> Option<T> {
    first_by(items, key, |candidate, best| candidate > best)
}

/// The first item with the smallest key
pub fn min_by_key<T>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> f64) -> Option<T> {
    first_by(items, key, |candidate, best| candidate < best)
}

fn first_by<T>(
    items: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> f64,
    better: impl Fn(f64, f64) -> bool,
) -> Option<T> {
    let mut best: Option<(T, f64)> = None;
    for item in items {
        let k = key(&item);
        if best.as_ref().is_none_or(|(_, best_key)| better(k, *best_key)) {
            best = Some((item, k));
        }
    }
    best.map(|(item, _)| item)
}

/// Wrap a `props()` callback so that any fact carrying a score is written to
/// the document root instead of the selected node
///
/// Useful for page-level types derived from individual elements.
pub fn page(
    scoring: impl Fn(&Fnode) -> PlumbResult<Fact> + 'static,
) -> impl Fn(&Fnode) -> PlumbResult<Fact> + 'static {
    move |fnode| {
        let mut fact = scoring(fnode)?;
        if fact.score.is_some() {
            fact.node = Some(fnode.document()?.root());
        }
        Ok(fact)
    }
}

/// Sort fnodes into document order
pub fn dom_sort(mut fnodes: Vec<Fnode>) -> PlumbResult<Vec<Fnode>> {
    let Some(first) = fnodes.first() else {
        return Ok(fnodes);
    };
    let doc = first.document()?;
    fnodes.sort_by(|a, b| doc.document_order(a.node(), b.node()));
    Ok(fnodes)
}

/// Sort outward results into document order, for use with `all_through()`
///
/// Non-node data keeps its relative order after every node.
pub fn dom_sort_data(mut data: Vec<Datum>) -> PlumbResult<Vec<Datum>> {
    let Some(doc) = data.iter().find_map(Datum::as_fnode).map(Fnode::document).transpose()? else {
        return Ok(data);
    };
    data.sort_by(|a, b| match (a.as_fnode(), b.as_fnode()) {
        (Some(a), Some(b)) => doc.document_order(a.node(), b.node()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(data)
}

/// Whether a node would be seen by a user
///
/// Layout information is optional: checks that need a bounding box or a
/// computed style are skipped when the document cannot supply one.
pub fn is_visible(doc: &dyn Document, node: NodeId) -> bool {
    let style = |n: NodeId, property: &str| doc.computed_style(n, property);
    let rect = doc.bounding_box(node);
    let overflow_hidden = style(node, "overflow").as_deref() == Some("hidden");

    if let Some(rect) = rect {
        if rect.width == 0.0 && rect.height == 0.0 && !overflow_hidden {
            return false;
        }
        if rect.left + rect.width < 0.0 || rect.top + rect.height < 0.0 {
            return false;
        }
    }
    if style(node, "visibility").as_deref() == Some("hidden") {
        return false;
    }

    for ancestor in doc.ancestors(node) {
        if style(ancestor, "opacity").as_deref() == Some("0") {
            return false;
        }
        match style(ancestor, "display").as_deref() {
            Some("none") => return false,
            Some("contents") => continue,
            _ => {}
        }
        let collapsed =
            doc.bounding_box(ancestor).is_some_and(|r| r.width == 0.0 || r.height == 0.0);
        if collapsed && overflow_hidden {
            return false;
        }
    }
    true
}

/// Whether any of the named attributes of `node` satisfies `predicate`
pub fn attributes_match(
    doc: &dyn Document,
    node: NodeId,
    predicate: impl Fn(&str) -> bool,
    attributes: &[&str],
) -> bool {
    attributes
        .iter()
        .filter_map(|name| doc.attribute(node, name))
        .any(|value| !value.is_empty() && predicate(value))
}

/// `node` and every node below it, depth first
///
/// A child rejected by `should_traverse` is skipped along with everything
/// inside it. Shadow trees are not entered.
pub fn walk(
    doc: &dyn Document,
    node: NodeId,
    should_traverse: impl Fn(NodeId) -> bool,
) -> Vec<NodeId> {
    let mut visited = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        visited.push(current);
        let children = doc.children(current);
        stack.extend(children.into_iter().rev().filter(|&child| should_traverse(child)));
    }
    visited
}

/// Whether an element is a block element by default, ignoring styling
pub fn is_block(doc: &dyn Document, node: NodeId) -> bool {
    doc.tag_name(node)
        .is_some_and(|tag| BLOCK_TAGS.iter().any(|block| tag.eq_ignore_ascii_case(block)))
}

/// Text of the text nodes under `node`, without descending into contained
/// block, script or style elements
pub fn inline_texts<'a>(
    doc: &'a dyn Document,
    node: NodeId,
    should_traverse: impl Fn(NodeId) -> bool,
) -> Vec<&'a str> {
    let inline = |child: NodeId| {
        let excluded = is_block(doc, child)
            || doc.tag_name(child).is_some_and(|tag| {
                tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style")
            });
        !excluded && should_traverse(child)
    };
    walk(doc, node, inline).into_iter().filter_map(|n| doc.text(n)).collect()
}

/// Total length of the inline text under `node`, with whitespace collapsed
pub fn inline_text_length(
    doc: &dyn Document,
    node: NodeId,
    should_traverse: impl Fn(NodeId) -> bool,
) -> usize {
    inline_texts(doc, node, should_traverse)
        .into_iter()
        .map(|text| collapse_whitespace(text).chars().count())
        .sum()
}

/// Replace each run of two or more whitespace characters with one space
pub fn collapse_whitespace(text: &str) -> String {
    fn flush(out: &mut String, run: usize, first: char) {
        match run {
            0 => {}
            1 => out.push(first),
            _ => out.push(' '),
        }
    }

    let mut out = String::with_capacity(text.len());
    let (mut run, mut first) = (0, ' ');
    for c in text.chars() {
        if c.is_whitespace() {
            if run == 0 {
                first = c;
            }
            run += 1;
        } else {
            flush(&mut out, run, first);
            run = 0;
            out.push(c);
        }
    }
    flush(&mut out, run, first);
    out
}

/// Share of a node's inline text that sits inside links
///
/// Pass `inline_length` when the node's [`inline_text_length`] is already
/// known. A node with no inline text has a density of 0.
pub fn link_density(fnode: &Fnode, inline_length: Option<usize>) -> PlumbResult<f64> {
    let doc = fnode.document()?;
    let doc = doc.as_ref();
    let total = inline_length.unwrap_or_else(|| inline_text_length(doc, fnode.node(), |_| true));
    if total == 0 {
        return Ok(0.0);
    }
    let outside_links = inline_text_length(doc, fnode.node(), |node| {
        !doc.tag_name(node).is_some_and(|tag| tag.eq_ignore_ascii_case("a"))
    });
    Ok((total as f64 - outside_links as f64) / total as f64)
}

/// How many non-overlapping times `pattern` occurs in `haystack`
pub fn number_of_matches(pattern: &Regex, haystack: &str) -> usize {
    pattern.find_iter(haystack).count()
}

/// A color with channels scaled to 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    /// `None` when the color was written without an alpha channel
    pub alpha: Option<f64>,
}

impl Rgba {
    pub fn saturation(&self) -> f64 {
        saturation(self.red, self.green, self.blue)
    }
}

/// Parse a computed color such as `rgba(0, 5, 255, 0.8)`
///
/// Red, green and blue are divided by 255; alpha is kept as written.
pub fn rgba_from_string(color: &str) -> PlumbResult<Rgba> {
    let invalid = || PlumbError::InvalidColor { color: color.to_string() };
    let pattern = Regex::new(RGBA_PATTERN)?;
    let captures = pattern.captures(color).ok_or_else(invalid)?;
    let number = |index: usize| -> Option<f64> { captures.get(index)?.as_str().parse().ok() };
    let channel = |index: usize| number(index).map(|value| value / 255.0).ok_or_else(invalid);
    Ok(Rgba { red: channel(1)?, green: channel(2)?, blue: channel(3)?, alpha: number(4) })
}

/// HSL saturation of a color whose channels are scaled to 0..1
///
/// Black and white have no saturation.
pub fn saturation(red: f64, green: f64, blue: f64) -> f64 {
    let c_max = red.max(green).max(blue);
    let c_min = red.min(green).min(blue);
    let lightness = (c_max + c_min) / 2.0;
    let denominator = 1.0 - (2.0 * lightness - 1.0).abs();
    if denominator == 0.0 {
        0.0
    } else {
        (c_max - c_min) / denominator
    }
}
