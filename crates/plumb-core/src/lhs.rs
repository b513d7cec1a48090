//! Left-hand sides: which nodes feed a rule
//!
//! Each variant knows how to select its fnodes from a bound ruleset and how to
//! describe itself to the dependency planner: the type its output is
//! guaranteed to carry, the type it aggregates over (if any), and every type it
//! mentions.

use crate::clusters::{ClusterOptions, clusters, distance};
use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::ruleset::BoundInner;
use crate::side::{Call, Side};
use crate::types::{DistanceFn, Fact, Predicate};
use crate::utils::{maxes, min_by_key};
use std::collections::BTreeSet;

/// One selected node, plus the partner `nearest()` paired it with
pub(crate) struct LeftResult {
    pub(crate) fnode: Fnode,
    pub(crate) nearest: Option<Fnode>,
}

impl LeftResult {
    fn plain(fnode: Fnode) -> Self {
        Self { fnode, nearest: None }
    }
}

/// The selection strategy of a left-hand side
#[derive(Clone)]
pub enum LhsKind {
    Dom(String),
    Element(String),
    Type(String),
    TypeMax(String),
    BestCluster { ty: String, options: ClusterOptions },
    And(Vec<Lhs>),
    Nearest { a: Box<Lhs>, b: Box<Lhs>, distance: DistanceFn },
}

/// A compiled left-hand side
#[derive(Clone)]
pub struct Lhs {
    kind: LhsKind,
    predicate: Option<Predicate>,
}

impl Lhs {
    fn of(kind: LhsKind) -> Self {
        Self { kind, predicate: None }
    }

    pub fn kind(&self) -> &LhsKind {
        &self.kind
    }

    pub(crate) fn from_first_call(call: &Call) -> PlumbResult<Self> {
        match call {
            Call::Dom(selector) => Ok(Self::of(LhsKind::Dom(selector.clone()))),
            Call::Element(selector) => Ok(Self::of(LhsKind::Element(selector.clone()))),
            Call::Type(ty) => Ok(Self::of(LhsKind::Type(ty.clone()))),
            Call::And(operands) => {
                if operands.is_empty() {
                    return Err(PlumbError::construction("and() needs at least one operand."));
                }
                let operands =
                    operands.iter().map(plain_type_operand).collect::<PlumbResult<Vec<_>>>()?;
                Ok(Self::of(LhsKind::And(operands)))
            }
            Call::Nearest { a, b, distance } => Ok(Self::of(LhsKind::Nearest {
                a: Box::new(plain_type_operand(a)?),
                b: Box::new(plain_type_operand(b)?),
                distance: distance.clone(),
            })),
            other => Err(PlumbError::construction(format!(
                "The left-hand side of a rule must start with dom(), element(), type(), and(), \
                 or nearest(), not {}().",
                other.name()
            ))),
        }
    }

    pub(crate) fn apply(self, call: &Call) -> PlumbResult<Self> {
        if let Call::When(predicate) = call {
            return Ok(Self { predicate: Some(predicate.clone()), ..self });
        }
        let kind = match (self.kind, call) {
            (LhsKind::Type(_), Call::Type(ty)) => LhsKind::Type(ty.clone()),
            (LhsKind::TypeMax(_), Call::Type(ty)) => LhsKind::TypeMax(ty.clone()),
            (LhsKind::BestCluster { options, .. }, Call::Type(ty)) => {
                LhsKind::BestCluster { ty: ty.clone(), options }
            }
            (LhsKind::Type(ty) | LhsKind::TypeMax(ty), Call::Max) => LhsKind::TypeMax(ty),
            (LhsKind::Type(ty), Call::BestCluster(options)) => {
                LhsKind::BestCluster { ty, options: options.clone() }
            }
            (_, Call::Type(_)) => {
                return Err(PlumbError::construction(
                    "type() can follow only another type() on the left-hand side of a rule.",
                ));
            }
            (_, Call::Max | Call::BestCluster(_)) => {
                return Err(PlumbError::construction(format!(
                    "{}() can follow only type() on the left-hand side of a rule.",
                    call.name()
                )));
            }
            (_, other) => {
                return Err(PlumbError::construction(format!(
                    "{}() cannot be used on the left-hand side of a rule.",
                    other.name()
                )));
            }
        };
        Ok(Self { kind, predicate: self.predicate })
    }

    /// The single type every selected node is guaranteed to carry
    pub fn guaranteed_type(&self) -> Option<&str> {
        match &self.kind {
            LhsKind::Type(ty) | LhsKind::TypeMax(ty) | LhsKind::BestCluster { ty, .. } => Some(ty),
            LhsKind::Nearest { a, .. } => a.guaranteed_type(),
            LhsKind::Dom(_) | LhsKind::Element(_) | LhsKind::And(_) => None,
        }
    }

    /// The type this side aggregates over, which must be complete before it runs
    pub fn aggregated_type(&self) -> Option<&str> {
        match &self.kind {
            LhsKind::TypeMax(ty) | LhsKind::BestCluster { ty, .. } => Some(ty),
            _ => None,
        }
    }

    pub fn types_mentioned(&self) -> BTreeSet<String> {
        match &self.kind {
            LhsKind::Dom(_) | LhsKind::Element(_) => BTreeSet::new(),
            LhsKind::Type(ty) | LhsKind::TypeMax(ty) | LhsKind::BestCluster { ty, .. } => {
                BTreeSet::from([ty.clone()])
            }
            LhsKind::And(operands) => operands.iter().flat_map(Lhs::types_mentioned).collect(),
            LhsKind::Nearest { a, b, .. } => {
                a.types_mentioned().into_iter().chain(b.types_mentioned()).collect()
            }
        }
    }

    /// Each set of types a selected node could be constrained to carry by this side alone
    pub fn possible_type_combinations(&self) -> Vec<BTreeSet<String>> {
        match &self.kind {
            LhsKind::Dom(_) | LhsKind::Element(_) => Vec::new(),
            LhsKind::Nearest { a, .. } => vec![a.types_mentioned()],
            _ => vec![self.types_mentioned()],
        }
    }

    /// Reject facts this kind of side cannot make use of
    pub(crate) fn check_fact(&self, fact: &Fact, rule: &str) -> PlumbResult<()> {
        match &self.kind {
            LhsKind::Dom(_) | LhsKind::Element(_) if fact.ty.is_none() => {
                Err(PlumbError::invalid_fact(
                    rule,
                    "the right-hand side of a dom() or element() rule did not specify a type",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Select this side's nodes
    ///
    /// Rules this side depends on must already have run.
    pub(crate) fn fnodes(&self, bound: &BoundInner) -> PlumbResult<Vec<LeftResult>> {
        match &self.kind {
            LhsKind::Dom(selector) => {
                let nodes = bound.document().query_selector_all_deep(selector)?;
                let fnodes = nodes.into_iter().map(|node| bound.fnode_for(node)).collect();
                self.plain_results(fnodes)
            }
            LhsKind::Element(selector) => {
                let doc = bound.document();
                let root = doc.root();
                let fnodes =
                    if doc.matches(root, selector)? { vec![bound.fnode_for(root)] } else { vec![] };
                self.plain_results(fnodes)
            }
            LhsKind::Type(ty) => self.plain_results(bound.typed_fnodes(ty)),
            LhsKind::TypeMax(ty) => self.max_fnodes(bound, ty),
            LhsKind::BestCluster { ty, options } => self.best_cluster(bound, ty, options),
            LhsKind::And(operands) => self.conjunction(bound, operands),
            LhsKind::Nearest { a, b, distance } => self.nearest_pairs(bound, a, b, distance),
        }
    }

    fn fnode_list(&self, bound: &BoundInner) -> PlumbResult<Vec<Fnode>> {
        Ok(self.fnodes(bound)?.into_iter().map(|result| result.fnode).collect())
    }

    fn satisfying_when(&self, fnodes: Vec<Fnode>) -> PlumbResult<Vec<Fnode>> {
        let Some(predicate) = &self.predicate else {
            return Ok(fnodes);
        };
        let mut kept = Vec::with_capacity(fnodes.len());
        for fnode in fnodes {
            if predicate(&fnode)? {
                kept.push(fnode);
            }
        }
        Ok(kept)
    }

    fn plain_results(&self, fnodes: Vec<Fnode>) -> PlumbResult<Vec<LeftResult>> {
        Ok(self.satisfying_when(fnodes)?.into_iter().map(LeftResult::plain).collect())
    }

    fn max_fnodes(&self, bound: &BoundInner, ty: &str) -> PlumbResult<Vec<LeftResult>> {
        let cacheable = self.predicate.is_none();
        if cacheable {
            if let Some(cached) = bound.cached_maxes(ty) {
                return Ok(cached.into_iter().map(LeftResult::plain).collect());
            }
        }
        let candidates = self.satisfying_when(bound.typed_fnodes(ty))?;
        let best = maxes(candidates, |fnode| bound.weighted_score(&fnode.scores_so_far_for(ty)));
        if cacheable {
            bound.store_maxes(ty, best.clone());
        }
        Ok(best.into_iter().map(LeftResult::plain).collect())
    }

    fn best_cluster(
        &self,
        bound: &BoundInner,
        ty: &str,
        options: &ClusterOptions,
    ) -> PlumbResult<Vec<LeftResult>> {
        let candidates = self.satisfying_when(bound.typed_fnodes(ty))?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let groups = match options.distance() {
            Some(custom) => clusters(&candidates, options.splitting_distance, |a, b| custom(a, b)),
            None => {
                let doc = bound.document();
                clusters(&candidates, options.splitting_distance, |a, b| {
                    distance(doc.as_ref(), a.node(), b.node(), &options.costs)
                        + options.additional_cost(a, b)
                })
            }
        };

        let mut best: Option<(Vec<Fnode>, f64)> = None;
        for group in groups {
            let mut total = 0.0;
            for fnode in &group {
                total += fnode.score_for(ty)?;
            }
            if best.as_ref().is_none_or(|(_, best_total)| total > *best_total) {
                best = Some((group, total));
            }
        }
        let winner = best.map(|(group, _)| group).unwrap_or_default();
        Ok(winner.into_iter().map(LeftResult::plain).collect())
    }

    fn conjunction(&self, bound: &BoundInner, operands: &[Lhs]) -> PlumbResult<Vec<LeftResult>> {
        let Some((first, rest)) = operands.split_first() else {
            return Ok(Vec::new());
        };
        let mut matching = Vec::new();
        'candidates: for fnode in first.fnode_list(bound)? {
            for other in rest {
                if let Some(ty) = other.guaranteed_type() {
                    if !fnode.has_type(ty)? {
                        continue 'candidates;
                    }
                }
            }
            matching.push(fnode);
        }
        self.plain_results(matching)
    }

    fn nearest_pairs(
        &self,
        bound: &BoundInner,
        a: &Lhs,
        b: &Lhs,
        distance: &DistanceFn,
    ) -> PlumbResult<Vec<LeftResult>> {
        let partners = b.fnode_list(bound)?;
        if partners.is_empty() {
            return Ok(Vec::new());
        }
        let mut pairs = Vec::new();
        for fnode in self.satisfying_when(a.fnode_list(bound)?)? {
            let nearest =
                min_by_key(partners.iter(), |partner| distance(&fnode, *partner)).cloned();
            pairs.push(LeftResult { fnode, nearest });
        }
        Ok(pairs)
    }
}

fn plain_type_operand(side: &Side) -> PlumbResult<Lhs> {
    let lhs = side.as_lhs()?;
    match lhs.kind {
        LhsKind::Type(_) => Ok(lhs),
        _ => Err(PlumbError::construction(
            "and() and nearest() support only simple type() calls as arguments.",
        )),
    }
}
