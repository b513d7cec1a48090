//! Rules: a left-hand side paired with a right-hand side
//!
//! Inward rules write facts back onto fnodes and take part in dependency
//! planning. Outward rules expose results under a key and are never needed by
//! other rules.

use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::lhs::Lhs;
use crate::rhs::{InwardRhs, OutwardRhs, Rhs};
use crate::ruleset::{BoundInner, RulesetInner};
use crate::side::Side;
use crate::types::{Datum, Fact};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

static UNNAMED_RULES: AtomicUsize = AtomicUsize::new(0);

/// Position of an inward rule within its ruleset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RuleId(pub(crate) usize);

/// A compiled rule
#[derive(Clone)]
pub enum Rule {
    Inward(InwardRule),
    Outward(OutwardRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Inward(rule) => &rule.name,
            Rule::Outward(rule) => &rule.name,
        }
    }
}

/// Build a rule with a generated name
///
/// Give rules that contribute scores a stable name with [`rule_named`] so
/// coefficients can refer to them.
pub fn rule(lhs: Side, rhs: Side) -> PlumbResult<Rule> {
    let name = format!("_{}", UNNAMED_RULES.fetch_add(1, Ordering::Relaxed));
    build(lhs, rhs, name)
}

pub fn rule_named(lhs: Side, rhs: Side, name: &str) -> PlumbResult<Rule> {
    build(lhs, rhs, name.to_string())
}

fn build(lhs: Side, rhs: Side, name: String) -> PlumbResult<Rule> {
    let lhs = lhs.as_lhs()?;
    match rhs.as_rhs()? {
        Rhs::Inward(rhs) => Ok(Rule::Inward(InwardRule::new(name, lhs, rhs)?)),
        Rhs::Outward(rhs) => Ok(Rule::Outward(OutwardRule { name, lhs, rhs })),
    }
}

/// Collect the rules that must run before a side mentioning `mentioned` can be
/// evaluated, given the types it needs complete
fn prerequisites_for(
    finalized: &BTreeSet<String>,
    mentioned: &BTreeSet<String>,
    ruleset: &RulesetInner,
) -> PlumbResult<Vec<RuleId>> {
    let mut prerequisites = BTreeSet::new();
    for ty in finalized {
        let emitters = ruleset.rules_that_could_emit(ty);
        if emitters.is_empty() {
            return Err(PlumbError::MissingProducer { type_name: ty.clone(), verb: "emits" });
        }
        prerequisites.extend(emitters.iter().copied());
    }
    for ty in mentioned {
        prerequisites.extend(ruleset.rules_that_could_add(ty).iter().copied());
    }
    Ok(prerequisites.into_iter().collect())
}

/// The prerequisites of an ad hoc query for every node of `ty`
pub(crate) fn prerequisites_of_type(ty: &str, ruleset: &RulesetInner) -> PlumbResult<Vec<RuleId>> {
    let types = BTreeSet::from([ty.to_string()]);
    prerequisites_for(&types, &types, ruleset)
}

/// A rule whose facts are written back onto fnodes
#[derive(Clone)]
pub struct InwardRule {
    name: String,
    lhs: Lhs,
    rhs: InwardRhs,
    could_emit: BTreeSet<String>,
    could_add: BTreeSet<String>,
    finalized: BTreeSet<String>,
}

impl InwardRule {
    fn new(name: String, lhs: Lhs, rhs: InwardRhs) -> PlumbResult<Self> {
        let could_emit = Self::types_emitted_by(&lhs, &rhs)?;
        let constrained: BTreeSet<String> =
            lhs.possible_type_combinations().into_iter().flatten().collect();
        let could_add = could_emit.difference(&constrained).cloned().collect();

        let mut finalized = BTreeSet::new();
        if let Some(ty) = lhs.aggregated_type() {
            finalized.insert(ty.to_string());
        }
        let emits_only_input_type = could_emit.len() == 1
            && lhs.guaranteed_type().is_some_and(|ty| could_emit.contains(ty));
        if !emits_only_input_type {
            finalized.extend(lhs.types_mentioned());
        }

        if rhs.conserves_score() && lhs.guaranteed_type().is_none() {
            return Err(PlumbError::construction(format!(
                "Rule {name:?} calls conserve_score(), but its left-hand side has no single \
                 type to conserve."
            )));
        }

        Ok(Self { name, lhs, rhs, could_emit, could_add, finalized })
    }

    fn types_emitted_by(lhs: &Lhs, rhs: &InwardRhs) -> PlumbResult<BTreeSet<String>> {
        let emissions = rhs.possible_emissions();
        if !emissions.possible_types.is_empty() {
            return Ok(emissions.possible_types);
        }
        if let Some(ty) = lhs.guaranteed_type() {
            return Ok(BTreeSet::from([ty.to_string()]));
        }
        if emissions.could_change_type {
            Err(PlumbError::construction(
                "A right-hand side calls props() without type_in(), and its left-hand side has \
                 no single type, so the types it emits are unknown.",
            ))
        } else {
            Err(PlumbError::construction(
                "The right-hand side of a rule must specify a type when its left-hand side is \
                 dom(), element(), or and().",
            ))
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lhs(&self) -> &Lhs {
        &self.lhs
    }

    /// Every type a fact from this rule may carry
    pub fn types_it_could_emit(&self) -> &BTreeSet<String> {
        &self.could_emit
    }

    /// Emittable types the selected nodes do not already carry
    pub fn types_it_could_add(&self) -> &BTreeSet<String> {
        &self.could_add
    }

    /// Types that must be complete before this rule runs
    pub fn types_finalized(&self) -> &BTreeSet<String> {
        &self.finalized
    }

    pub(crate) fn prerequisites(&self, ruleset: &RulesetInner) -> PlumbResult<Vec<RuleId>> {
        prerequisites_for(&self.finalized, &self.lhs.types_mentioned(), ruleset)
    }

    /// Validate a fact and resolve the type it is written under
    fn target_type(&self, fact: &Fact) -> PlumbResult<String> {
        self.lhs.check_fact(fact, &self.name)?;
        let ty = fact
            .ty
            .clone()
            .or_else(|| self.lhs.guaranteed_type().map(str::to_string))
            .ok_or_else(|| PlumbError::invalid_fact(&self.name, "the fact has no type"))?;
        if !self.could_emit.contains(&ty) {
            return Err(PlumbError::invalid_fact(
                &self.name,
                format!("emitted type {ty:?}, but may only emit {:?}", self.could_emit),
            ));
        }
        Ok(ty)
    }

    /// Run the rule, returning every fnode it wrote to
    pub(crate) fn apply(&self, bound: &BoundInner) -> PlumbResult<Vec<Fnode>> {
        let input_type = self.lhs.guaranteed_type();
        let mut touched = Vec::new();
        let mut seen = HashSet::new();

        for left in self.lhs.fnodes(bound)? {
            let mut fact = self.rhs.fact(&left.fnode)?;
            if fact.note.is_none() {
                fact.note = left.nearest.map(Datum::Node);
            }
            let ty = self.target_type(&fact)?;
            let target = match fact.node {
                Some(node) => bound.fnode_for(node),
                None => left.fnode.clone(),
            };
            trace!(
                rule = %self.name,
                node = %target.node(),
                ty = %ty,
                score = ?fact.score,
                "Applying fact"
            );

            if let (true, Some(input_type)) = (self.rhs.conserves_score(), input_type) {
                target.conserve_score_from(&left.fnode, input_type, &ty)?;
            }
            if let Some(score) = fact.score {
                target.add_score_contribution(&ty, &self.name, score);
            }
            if fact.ty.is_some() || fact.note.is_some() {
                target.set_note(&ty, fact.note)?;
            }
            if seen.insert(target.node()) {
                touched.push(target);
            }
        }
        Ok(touched)
    }
}

/// A terminal rule queried by key
#[derive(Clone)]
pub struct OutwardRule {
    name: String,
    lhs: Lhs,
    rhs: OutwardRhs,
}

impl OutwardRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        self.rhs.key()
    }

    pub fn lhs(&self) -> &Lhs {
        &self.lhs
    }

    /// Every type an outward rule mentions must be complete before it runs
    pub(crate) fn prerequisites(&self, ruleset: &RulesetInner) -> PlumbResult<Vec<RuleId>> {
        let mentioned = self.lhs.types_mentioned();
        prerequisites_for(&mentioned, &mentioned, ruleset)
    }

    pub(crate) fn results(&self, bound: &BoundInner) -> PlumbResult<Vec<Datum>> {
        let fnodes = self.lhs.fnodes(bound)?.into_iter().map(|left| left.fnode).collect();
        self.rhs.results(fnodes)
    }
}
