//! The rule expression language
//!
//! A [`Side`] records a chain of calls such as `type_("price").max()` without
//! interpreting it. When a rule is built, the chain is replayed once, either
//! as a left-hand side (which nodes to take) or as a right-hand side (what to
//! say about them), depending on the position it was passed in.
//!
//! Chains are persistent lists: extending one never affects the prefix it was
//! built from, so a common prefix can be factored out and branched freely.
//!
//! ```
//! use plumb_core::{dom, out, rule, type_};
//!
//! let paragraphs = rule(dom("p"), type_("paragraph").score(1.0)).unwrap();
//! let best = rule(type_("paragraph").max(), out("best")).unwrap();
//! # let _ = (paragraphs, best);
//! ```

use crate::clusters::{ClusterOptions, euclidean};
use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::lhs::Lhs;
use crate::rhs::{InwardRhs, OutwardRhs, Rhs};
use crate::types::{
    AllThroughFn, Datum, DistanceFn, Fact, NoteFn, Predicate, PropsFn, ScoreFn, ThroughFn,
};
use std::fmt;
use std::rc::Rc;

/// A fixed or computed score
#[derive(Clone)]
pub(crate) enum ScoreSource {
    Fixed(f64),
    Computed(ScoreFn),
}

impl ScoreSource {
    pub(crate) fn value(&self, fnode: &Fnode) -> PlumbResult<f64> {
        match self {
            ScoreSource::Fixed(score) => Ok(*score),
            ScoreSource::Computed(callback) => callback(fnode),
        }
    }
}

/// One recorded call
#[derive(Clone)]
pub(crate) enum Call {
    Dom(String),
    Element(String),
    Type(String),
    TypeIn(Vec<String>),
    Note(NoteFn),
    Score(ScoreSource),
    AtMost(f64),
    ConserveScore,
    Props(PropsFn),
    And(Vec<Side>),
    Nearest { a: Side, b: Side, distance: DistanceFn },
    When(Predicate),
    Max,
    BestCluster(ClusterOptions),
    Out(String),
    Through(ThroughFn),
    AllThrough(AllThroughFn),
}

impl Call {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Call::Dom(_) => "dom",
            Call::Element(_) => "element",
            Call::Type(_) => "type",
            Call::TypeIn(_) => "type_in",
            Call::Note(_) => "note",
            Call::Score(_) => "score",
            Call::AtMost(_) => "at_most",
            Call::ConserveScore => "conserve_score",
            Call::Props(_) => "props",
            Call::And(_) => "and",
            Call::Nearest { .. } => "nearest",
            Call::When(_) => "when",
            Call::Max => "max",
            Call::BestCluster(_) => "best_cluster",
            Call::Out(_) => "out",
            Call::Through(_) => "through",
            Call::AllThrough(_) => "all_through",
        }
    }
}

struct Link {
    call: Call,
    prev: Option<Rc<Link>>,
}

/// An immutable chain of calls that compiles into either half of a rule
#[derive(Clone, Default)]
pub struct Side {
    last: Option<Rc<Link>>,
}

impl Side {
    fn then(&self, call: Call) -> Side {
        Side { last: Some(Rc::new(Link { call, prev: self.last.clone() })) }
    }

    /// Recorded calls, first to last
    pub(crate) fn calls(&self) -> Vec<&Call> {
        let mut calls = Vec::new();
        let mut cursor = self.last.as_deref();
        while let Some(link) = cursor {
            calls.push(&link.call);
            cursor = link.prev.as_deref();
        }
        calls.reverse();
        calls
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// On the left, constrain to (or replace) an input type; on the right,
    /// emit this type.
    pub fn type_(&self, ty: &str) -> Side {
        self.then(Call::Type(ty.to_string()))
    }

    /// Declare every type a right-hand side might emit
    pub fn type_in(&self, types: &[&str]) -> Side {
        self.then(Call::TypeIn(types.iter().map(|t| t.to_string()).collect()))
    }

    pub fn note(&self, callback: impl Fn(&Fnode) -> PlumbResult<Option<Datum>> + 'static) -> Side {
        self.then(Call::Note(Rc::new(callback)))
    }

    pub fn score(&self, score: f64) -> Side {
        self.then(Call::Score(ScoreSource::Fixed(score)))
    }

    pub fn score_with(&self, callback: impl Fn(&Fnode) -> PlumbResult<f64> + 'static) -> Side {
        self.then(Call::Score(ScoreSource::Computed(Rc::new(callback))))
    }

    /// Cap emitted scores at `max`
    pub fn at_most(&self, max: f64) -> Side {
        self.then(Call::AtMost(max))
    }

    /// Carry the input node's score for its type into the emitted type
    ///
    /// The carried score is recorded as its own contribution, so a `score()`
    /// on the same right-hand side adds to it rather than replacing it.
    pub fn conserve_score(&self) -> Side {
        self.then(Call::ConserveScore)
    }

    /// Compute type, score, note, and target node in one callback
    pub fn props(&self, callback: impl Fn(&Fnode) -> PlumbResult<Fact> + 'static) -> Side {
        self.then(Call::Props(Rc::new(callback)))
    }

    /// Keep only the selected nodes satisfying `predicate`
    pub fn when(&self, predicate: impl Fn(&Fnode) -> PlumbResult<bool> + 'static) -> Side {
        self.then(Call::When(Rc::new(predicate)))
    }

    /// Keep only the highest-scoring nodes of the type; ties keep them all
    pub fn max(&self) -> Side {
        self.then(Call::Max)
    }

    /// Cluster the nodes of the type and keep the cluster with the best total score
    pub fn best_cluster(&self, options: ClusterOptions) -> Side {
        self.then(Call::BestCluster(options))
    }

    /// Map each outward result
    pub fn through(&self, callback: impl Fn(&Fnode) -> PlumbResult<Datum> + 'static) -> Side {
        self.then(Call::Through(Rc::new(callback)))
    }

    /// Map the whole list of outward results
    pub fn all_through(
        &self,
        callback: impl Fn(Vec<Datum>) -> PlumbResult<Vec<Datum>> + 'static,
    ) -> Side {
        self.then(Call::AllThrough(Rc::new(callback)))
    }

    /// Replay as a left-hand side
    pub fn as_lhs(&self) -> PlumbResult<Lhs> {
        let calls = self.calls();
        let (first, rest) = calls
            .split_first()
            .ok_or_else(|| PlumbError::construction("The left-hand side of a rule is empty."))?;
        rest.iter().try_fold(Lhs::from_first_call(first)?, |lhs, call| lhs.apply(call))
    }

    /// Replay as a right-hand side
    pub fn as_rhs(&self) -> PlumbResult<Rhs> {
        let calls = self.calls();
        match calls.split_first() {
            None => Err(PlumbError::construction("The right-hand side of a rule is empty.")),
            Some((Call::Out(key), rest)) => {
                let rhs = rest.iter().try_fold(OutwardRhs::new(key), |rhs, call| rhs.apply(call))?;
                Ok(Rhs::Outward(rhs))
            }
            Some(_) => {
                let rhs =
                    calls.iter().try_fold(InwardRhs::default(), |rhs, call| rhs.apply(call))?;
                Ok(Rhs::Inward(rhs))
            }
        }
    }
}

impl fmt::Debug for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.calls().iter().map(|call| call.name())).finish()
    }
}

/// Take the elements matching a selector, looking inside shadow trees too
///
/// When the ruleset is bound to a subtree, the subtree's root is not a
/// candidate; use [`element`] for that.
pub fn dom(selector: &str) -> Side {
    Side::default().then(Call::Dom(selector.to_string()))
}

/// Take the document root if it matches a selector
pub fn element(selector: &str) -> Side {
    Side::default().then(Call::Element(selector.to_string()))
}

pub fn type_(ty: &str) -> Side {
    Side::default().type_(ty)
}

pub fn type_in(types: &[&str]) -> Side {
    Side::default().type_in(types)
}

pub fn note(callback: impl Fn(&Fnode) -> PlumbResult<Option<Datum>> + 'static) -> Side {
    Side::default().note(callback)
}

pub fn score(score: f64) -> Side {
    Side::default().score(score)
}

pub fn score_with(callback: impl Fn(&Fnode) -> PlumbResult<f64> + 'static) -> Side {
    Side::default().score_with(callback)
}

pub fn at_most(max: f64) -> Side {
    Side::default().at_most(max)
}

pub fn conserve_score() -> Side {
    Side::default().conserve_score()
}

pub fn props(callback: impl Fn(&Fnode) -> PlumbResult<Fact> + 'static) -> Side {
    Side::default().props(callback)
}

/// Take nodes of the first operand's type that also carry every other
/// operand's type. Operands must be plain `type_()` expressions.
pub fn and(operands: &[Side]) -> Side {
    Side::default().then(Call::And(operands.to_vec()))
}

/// Pair each node of `a` with the closest node of `b` by rendered position,
/// storing it as the emitted fact's note
pub fn nearest(a: Side, b: Side) -> Side {
    let distance: DistanceFn = Rc::new(|left: &Fnode, right: &Fnode| match left.document() {
        Ok(doc) => euclidean(doc.as_ref(), left.node(), right.node()),
        Err(_) => f64::MAX,
    });
    nearest_with(a, b, distance)
}

/// [`nearest`] with a caller-supplied distance function
pub fn nearest_with(a: Side, b: Side, distance: DistanceFn) -> Side {
    Side::default().then(Call::Nearest { a, b, distance })
}

/// Expose the nodes selected by the left-hand side under `key`
pub fn out(key: &str) -> Side {
    Side::default().then(Call::Out(key.to_string()))
}
