//! Per-node fact storage
//!
//! An [`Fnode`] wraps one document node for the lifetime of the
//! [`BoundRuleset`](crate::BoundRuleset) that created it. It accumulates, per
//! type, the raw score contribution of every rule that touched it and at most
//! one note. Weighted scores are derived on demand, which is what lets
//! coefficients change without re-running any rule.
//!
//! The forcing accessors (`has_type`, `score_for`, `note_for`, `has_note_for`)
//! first run whatever rules are still pending for the requested type. The
//! `*_so_far` accessors never trigger execution.

use crate::error::{PlumbError, PlumbResult};
use crate::ruleset::BoundInner;
use crate::types::Datum;
use crate::utils::sigmoid;
use plumb_types::{Document, NodeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// A document node annotated with types, scores, and notes
///
/// Cloning is cheap and yields the same fnode; equality is identity.
#[derive(Clone)]
pub struct Fnode(Rc<FnodeInner>);

struct FnodeInner {
    node: NodeId,
    ruleset: Weak<BoundInner>,
    types: RefCell<BTreeMap<String, TypeRecord>>,
    /// (source node, source type, target type) triples already conserved
    conserved: RefCell<HashSet<(NodeId, String, String)>>,
}

#[derive(Debug, Clone, Default)]
struct TypeRecord {
    scores_by_rule: BTreeMap<String, f64>,
    note: Option<StoredNote>,
}

/// Notes that point at other fnodes are kept as node handles so fnodes never
/// own each other.
#[derive(Debug, Clone, PartialEq)]
enum StoredNote {
    Node(NodeId),
    Json(serde_json::Value),
}

impl From<Datum> for StoredNote {
    fn from(datum: Datum) -> Self {
        match datum {
            Datum::Node(fnode) => StoredNote::Node(fnode.node()),
            Datum::Json(value) => StoredNote::Json(value),
        }
    }
}

impl Fnode {
    pub(crate) fn new(node: NodeId, ruleset: Weak<BoundInner>) -> Self {
        Self(Rc::new(FnodeInner {
            node,
            ruleset,
            types: RefCell::new(BTreeMap::new()),
            conserved: RefCell::new(HashSet::new()),
        }))
    }

    /// The wrapped document node
    pub fn node(&self) -> NodeId {
        self.0.node
    }

    /// The document this fnode belongs to, for geometry and style lookups
    pub fn document(&self) -> PlumbResult<Rc<dyn Document>> {
        Ok(self.bound()?.document())
    }

    /// Whether the node carries `ty` once every rule that could emit it has run
    pub fn has_type(&self, ty: &str) -> PlumbResult<bool> {
        self.compute_type(ty)?;
        Ok(self.has_type_so_far(ty))
    }

    /// Confidence in (0, 1) that the node is of type `ty`
    pub fn score_for(&self, ty: &str) -> PlumbResult<f64> {
        self.compute_type(ty)?;
        let bound = self.bound()?;
        let weighted = bound.weighted_score(&self.scores_so_far_for(ty));
        Ok(sigmoid(weighted + bound.bias_for(ty)))
    }

    pub fn note_for(&self, ty: &str) -> PlumbResult<Option<Datum>> {
        self.compute_type(ty)?;
        self.note_so_far_for(ty)
    }

    pub fn has_note_for(&self, ty: &str) -> PlumbResult<bool> {
        self.compute_type(ty)?;
        Ok(self.has_note_so_far_for(ty))
    }

    /// Types recorded so far, in name order
    pub fn types_so_far(&self) -> Vec<String> {
        self.0.types.borrow().keys().cloned().collect()
    }

    pub fn has_type_so_far(&self, ty: &str) -> bool {
        self.0.types.borrow().contains_key(ty)
    }

    /// Raw per-rule contributions recorded so far for `ty`
    pub fn scores_so_far_for(&self, ty: &str) -> BTreeMap<String, f64> {
        self.0
            .types
            .borrow()
            .get(ty)
            .map(|record| record.scores_by_rule.clone())
            .unwrap_or_default()
    }

    pub fn note_so_far_for(&self, ty: &str) -> PlumbResult<Option<Datum>> {
        let stored = self.0.types.borrow().get(ty).and_then(|record| record.note.clone());
        match stored {
            None => Ok(None),
            Some(StoredNote::Json(value)) => Ok(Some(Datum::Json(value))),
            Some(StoredNote::Node(node)) => Ok(Some(Datum::Node(self.bound()?.fnode_for(node)))),
        }
    }

    fn has_note_so_far_for(&self, ty: &str) -> bool {
        self.0.types.borrow().get(ty).is_some_and(|record| record.note.is_some())
    }

    /// Record one rule's raw contribution to `ty`, creating the type if needed
    ///
    /// A second contribution from the same rule replaces the first.
    pub fn add_score_contribution(&self, ty: &str, rule: &str, value: f64) {
        trace!(node = %self.node(), ty, rule, value, "Adding score contribution");
        self.0
            .types
            .borrow_mut()
            .entry(ty.to_string())
            .or_default()
            .scores_by_rule
            .insert(rule.to_string(), value);
    }

    /// Attach a note to `ty`, creating the type if needed
    ///
    /// Notes are write-once: replacing a note with a different one is a
    /// [`PlumbError::NoteConflict`], while `None` never clears an existing note.
    pub fn set_note(&self, ty: &str, note: Option<Datum>) -> PlumbResult<()> {
        let incoming = note.map(StoredNote::from);
        let mut types = self.0.types.borrow_mut();
        let record = types.entry(ty.to_string()).or_default();
        match (&record.note, incoming) {
            (Some(existing), Some(new)) if *existing != new => Err(PlumbError::NoteConflict {
                type_name: ty.to_string(),
                node: self.node(),
            }),
            (Some(_), _) => Ok(()),
            (None, new) => {
                record.note = new;
                Ok(())
            }
        }
    }

    /// Add `source`'s score for `source_type` into `target_type` on this node
    ///
    /// Each (source node, source type, target type) combination is conserved
    /// at most once.
    pub fn conserve_score_from(
        &self,
        source: &Fnode,
        source_type: &str,
        target_type: &str,
    ) -> PlumbResult<()> {
        let key = (source.node(), source_type.to_string(), target_type.to_string());
        if self.0.conserved.borrow().contains(&key) {
            return Ok(());
        }
        let score = source.score_for(source_type)?;
        self.0.conserved.borrow_mut().insert(key);
        let rule = format!("_conserved:{}:{}", source.node().0, source_type);
        self.add_score_contribution(target_type, &rule, score);
        Ok(())
    }

    fn bound(&self) -> PlumbResult<Rc<BoundInner>> {
        self.0.ruleset.upgrade().ok_or(PlumbError::RulesetDropped)
    }

    fn compute_type(&self, ty: &str) -> PlumbResult<()> {
        let bound = self.bound()?;
        if !bound.is_type_settled(ty) {
            bound.ensure_type(ty)?;
        }
        Ok(())
    }
}

impl PartialEq for Fnode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Fnode {}

impl fmt::Debug for Fnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fnode")
            .field("node", &self.node())
            .field("types", &self.types_so_far())
            .finish()
    }
}
