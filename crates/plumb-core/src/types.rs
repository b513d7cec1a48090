//! Shared value types and callback signatures
//!
//! User code plugs into rules through reference-counted closures. Every
//! callback that can fail returns [`PlumbResult`], and its error aborts the
//! query that triggered it.

use crate::error::PlumbResult;
use crate::fnode::Fnode;
use plumb_types::NodeId;
use std::fmt;
use std::rc::Rc;

/// Filters left-hand-side candidates (`when`)
pub type Predicate = Rc<dyn Fn(&Fnode) -> PlumbResult<bool>>;

/// Computes a raw score contribution (`score_with`)
pub type ScoreFn = Rc<dyn Fn(&Fnode) -> PlumbResult<f64>>;

/// Computes a note; `None` leaves the note unset (`note`)
pub type NoteFn = Rc<dyn Fn(&Fnode) -> PlumbResult<Option<Datum>>>;

/// Computes a whole fact at once (`props`)
pub type PropsFn = Rc<dyn Fn(&Fnode) -> PlumbResult<Fact>>;

/// Maps each outward result (`through`)
pub type ThroughFn = Rc<dyn Fn(&Fnode) -> PlumbResult<Datum>>;

/// Maps the whole outward result list (`all_through`)
pub type AllThroughFn = Rc<dyn Fn(Vec<Datum>) -> PlumbResult<Vec<Datum>>>;

/// Pairwise distance between two fnodes (`nearest`, clustering)
pub type DistanceFn = Rc<dyn Fn(&Fnode, &Fnode) -> f64>;

/// A note value or outward result
///
/// Equality compares fnodes by identity and JSON values structurally.
#[derive(Clone)]
pub enum Datum {
    Node(Fnode),
    Json(serde_json::Value),
}

impl Datum {
    pub fn as_fnode(&self) -> Option<&Fnode> {
        match self {
            Datum::Node(fnode) => Some(fnode),
            Datum::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Datum::Json(value) => Some(value),
            Datum::Node(_) => None,
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Node(a), Datum::Node(b)) => a == b,
            (Datum::Json(a), Datum::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Node(fnode) => write!(f, "Node({})", fnode.node()),
            Datum::Json(value) => write!(f, "Json({value})"),
        }
    }
}

impl From<Fnode> for Datum {
    fn from(fnode: Fnode) -> Self {
        Datum::Node(fnode)
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        Datum::Json(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Json(serde_json::Value::from(value))
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Json(serde_json::Value::from(value))
    }
}

/// What a right-hand side says about one selected node
///
/// Missing pieces are filled in by the rule: the type falls back to the
/// left-hand side's guaranteed type and the target falls back to the selected
/// node itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fact {
    pub ty: Option<String>,
    pub score: Option<f64>,
    pub note: Option<Datum>,
    /// Write the fact onto this node instead of the selected one
    pub node: Option<NodeId>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, ty: &str) -> Self {
        self.ty = Some(ty.to_string());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_note(mut self, note: impl Into<Datum>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }
}
