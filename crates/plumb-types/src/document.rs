//! The capability interface the engine consumes from a document tree

use crate::error::DocumentResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque handle to one node of one document
///
/// Handles are only meaningful to the document that issued them. Two handles
/// are the same node iff they compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A rendered bounding box, in the document's own coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Distance from the left edge of the coordinate space
    pub left: f64,
    /// Distance from the top edge of the coordinate space
    pub top: f64,
    /// Horizontal extent
    pub width: f64,
    /// Vertical extent
    pub height: f64,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    /// The centre point as `(x, y)`
    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Whether the box has no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A tree of nodes the engine can select from and walk
///
/// Implementors supply topology and selector matching. Shadow trees, text,
/// geometry and style hooks are optional; they default to "none" and are
/// only consulted by deep queries, user predicates and the Euclidean
/// distance function.
///
/// Parent links follow the composed tree: a shadow root's parent is its host,
/// although the shadow root is not among the host's children.
pub trait Document {
    /// The root element the engine runs against
    ///
    /// For a whole document this is the document element (`<html>`).
    fn root(&self) -> NodeId;

    /// Parent of `node`, or `None` at the top of the tree
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Children of `node` in document order, including text nodes
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Tag name of an element, `None` for non-element nodes
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    /// Elements matching `selector`, in document order, without entering
    /// shadow trees
    ///
    /// A whole document is searched from above its root, so the root element
    /// itself can match. When the document stands for a subtree, the
    /// subtree's root is never returned.
    fn query_selector_all(&self, selector: &str) -> DocumentResult<Vec<NodeId>>;

    /// Whether `node` itself matches `selector`
    fn matches(&self, node: NodeId, selector: &str) -> DocumentResult<bool>;

    /// Shadow root attached to `host`, if any
    fn shadow_root(&self, _host: NodeId) -> Option<NodeId> {
        None
    }

    /// [`Document::query_selector_all`], also descending into every shadow
    /// tree reachable from the root
    ///
    /// Selectors are matched within the tree each element belongs to. Shadow
    /// content sorts directly after its host, before the host's children.
    fn query_selector_all_deep(&self, selector: &str) -> DocumentResult<Vec<NodeId>> {
        let mut found = self.query_selector_all(selector)?;
        let mut stack = vec![(self.root(), false)];
        let mut entered_shadow = false;
        while let Some((node, in_shadow)) = stack.pop() {
            if in_shadow && self.tag_name(node).is_some() && self.matches(node, selector)? {
                found.push(node);
            }
            if let Some(shadow) = self.shadow_root(node) {
                entered_shadow = true;
                stack.push((shadow, true));
            }
            stack.extend(self.children(node).into_iter().map(|child| (child, in_shadow)));
        }
        if entered_shadow {
            found.sort_by(|a, b| self.document_order(*a, *b));
        }
        Ok(found)
    }

    /// Contents of a text node, `None` for every other kind of node
    fn text(&self, _node: NodeId) -> Option<&str> {
        None
    }

    /// Whether `node` is a text node holding only whitespace
    fn is_whitespace(&self, node: NodeId) -> bool {
        self.text(node).is_some_and(|text| text.trim().is_empty())
    }

    /// Value of an attribute on an element
    fn attribute(&self, _node: NodeId, _name: &str) -> Option<&str> {
        None
    }

    /// Rendered bounding box, if the document has layout information
    fn bounding_box(&self, _node: NodeId) -> Option<Rect> {
        None
    }

    /// Computed value of a style property, if the document has style information
    fn computed_style(&self, _node: NodeId, _property: &str) -> Option<String> {
        None
    }

    /// Sibling immediately after `node`
    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&n| n == node)?;
        siblings.get(index + 1).copied()
    }

    /// Sibling immediately before `node`
    fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&n| n == node)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    /// `node` followed by each of its ancestors up to the top of the tree
    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `container` is `node` or one of its ancestors
    fn contains(&self, container: NodeId, node: NodeId) -> bool {
        self.ancestors(node).contains(&container)
    }

    /// Relative position of two nodes in document order
    ///
    /// A container sorts before anything inside it, and a host's shadow tree
    /// sorts before its children. Nodes from disconnected trees fall back to
    /// handle order.
    fn document_order(&self, a: NodeId, b: NodeId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let mut path_a = self.ancestors(a);
        let mut path_b = self.ancestors(b);
        path_a.reverse();
        path_b.reverse();

        let shared = path_a.iter().zip(path_b.iter()).take_while(|(x, y)| x == y).count();
        if shared == 0 {
            return a.cmp(&b);
        }
        if shared == path_a.len() {
            return Ordering::Less;
        }
        if shared == path_b.len() {
            return Ordering::Greater;
        }

        let siblings = self.children(path_a[shared - 1]);
        let index_a = siblings.iter().position(|&n| n == path_a[shared]);
        let index_b = siblings.iter().position(|&n| n == path_b[shared]);
        index_a.cmp(&index_b)
    }
}
