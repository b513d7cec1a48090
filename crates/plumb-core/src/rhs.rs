//! Right-hand sides: what a rule says about each selected node

use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::side::{Call, ScoreSource};
use crate::types::{AllThroughFn, Datum, Fact, NoteFn, PropsFn, ThroughFn};
use std::collections::BTreeSet;

/// A compiled right-hand side
#[derive(Clone)]
pub enum Rhs {
    /// Writes facts back onto fnodes
    Inward(InwardRhs),
    /// Exposes results under a key
    Outward(OutwardRhs),
}

#[derive(Clone)]
enum FactCall {
    Type(String),
    Note(NoteFn),
    Score(ScoreSource),
    Props(PropsFn),
}

impl FactCall {
    /// Index into the per-kind "already consulted" flags
    fn kind(&self) -> usize {
        match self {
            FactCall::Type(_) => 0,
            FactCall::Note(_) => 1,
            FactCall::Score(_) => 2,
            FactCall::Props(_) => 3,
        }
    }
}

/// What a right-hand side could emit, as far as can be told without running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emissions {
    /// A `props()` callback has the last word on the type
    pub could_change_type: bool,
    pub possible_types: BTreeSet<String>,
}

/// Right-hand side of an inward rule
#[derive(Clone, Default)]
pub struct InwardRhs {
    calls: Vec<FactCall>,
    max: Option<f64>,
    types: BTreeSet<String>,
    conserve: bool,
}

impl InwardRhs {
    pub(crate) fn apply(mut self, call: &Call) -> PlumbResult<Self> {
        match call {
            Call::Type(ty) => self.calls.push(FactCall::Type(ty.clone())),
            Call::Note(callback) => self.calls.push(FactCall::Note(callback.clone())),
            Call::Score(source) => self.calls.push(FactCall::Score(source.clone())),
            Call::Props(callback) => self.calls.push(FactCall::Props(callback.clone())),
            Call::TypeIn(types) => self.types = types.iter().cloned().collect(),
            Call::AtMost(max) => self.max = Some(*max),
            Call::ConserveScore => self.conserve = true,
            other => {
                return Err(PlumbError::construction(format!(
                    "{}() cannot be used on the right-hand side of a rule.",
                    other.name()
                )));
            }
        }
        Ok(self)
    }

    pub fn conserves_score(&self) -> bool {
        self.conserve
    }

    /// The declared `type_in()` set
    pub fn declared_types(&self) -> &BTreeSet<String> {
        &self.types
    }

    /// A `type()` to the right of every `props()` commits the emitted type;
    /// otherwise only the `type_in()` set is known.
    pub fn possible_emissions(&self) -> Emissions {
        for call in self.calls.iter().rev() {
            match call {
                FactCall::Props(_) => {
                    return Emissions {
                        could_change_type: true,
                        possible_types: self.types.clone(),
                    };
                }
                FactCall::Type(ty) => {
                    return Emissions {
                        could_change_type: false,
                        possible_types: BTreeSet::from([ty.clone()]),
                    };
                }
                _ => {}
            }
        }
        Emissions { could_change_type: false, possible_types: self.types.clone() }
    }

    /// Work out the fact for one selected node
    ///
    /// Calls are consulted right to left. Only the rightmost call of each kind
    /// counts, and a call runs only if it could fill a part still missing.
    pub(crate) fn fact(&self, fnode: &Fnode) -> PlumbResult<Fact> {
        let mut fact = Fact::default();
        let mut consulted = [false; 4];
        for call in self.calls.iter().rev() {
            if std::mem::replace(&mut consulted[call.kind()], true) {
                continue;
            }
            match call {
                FactCall::Type(ty) => {
                    if fact.ty.is_none() {
                        fact.ty = Some(ty.clone());
                    }
                }
                FactCall::Note(callback) => {
                    if fact.note.is_none() {
                        fact.note = callback(fnode)?;
                    }
                }
                FactCall::Score(source) => {
                    if fact.score.is_none() {
                        fact.score = Some(source.value(fnode)?);
                    }
                }
                FactCall::Props(callback) => {
                    let whole = callback(fnode)?;
                    fact.ty = fact.ty.or(whole.ty);
                    fact.score = fact.score.or(whole.score);
                    fact.note = fact.note.or(whole.note);
                    fact.node = fact.node.or(whole.node);
                }
            }
        }
        if let (Some(max), Some(score)) = (self.max, fact.score) {
            fact.score = Some(score.min(max));
        }
        Ok(fact)
    }
}

/// Right-hand side of an outward rule
#[derive(Clone)]
pub struct OutwardRhs {
    key: String,
    through: Option<ThroughFn>,
    all_through: Option<AllThroughFn>,
}

impl OutwardRhs {
    pub(crate) fn new(key: &str) -> Self {
        Self { key: key.to_string(), through: None, all_through: None }
    }

    pub(crate) fn apply(mut self, call: &Call) -> PlumbResult<Self> {
        match call {
            Call::Through(callback) => self.through = Some(callback.clone()),
            Call::AllThrough(callback) => self.all_through = Some(callback.clone()),
            other => {
                return Err(PlumbError::construction(format!(
                    "Only through() and all_through() may follow out(), not {}().",
                    other.name()
                )));
            }
        }
        Ok(self)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Turn the selected fnodes into the rule's results
    pub(crate) fn results(&self, fnodes: Vec<Fnode>) -> PlumbResult<Vec<Datum>> {
        let mut results = Vec::with_capacity(fnodes.len());
        for fnode in fnodes {
            results.push(match &self.through {
                Some(callback) => callback(&fnode)?,
                None => Datum::Node(fnode),
            });
        }
        match &self.all_through {
            Some(callback) => callback(results),
            None => Ok(results),
        }
    }
}
