//! Prerequisite graphs and their execution order
//!
//! A graph maps each not-yet-run inward rule to the rules that need it. It is
//! ordered by [`RuleId`], which is the rule's position in the ruleset, so the
//! execution order is reproducible for a fixed rule list.

use crate::error::{PlumbError, PlumbResult};
use crate::rule::RuleId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Finished,
}

/// Edges from each prerequisite to the rules that need it
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    needers: BTreeMap<RuleId, Vec<RuleId>>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.needers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.needers.len()
    }

    pub(crate) fn contains(&self, rule: RuleId) -> bool {
        self.needers.contains_key(&rule)
    }

    /// Record `prerequisite`, and that `needer` needs it if given
    pub(crate) fn add_prerequisite(&mut self, prerequisite: RuleId, needer: Option<RuleId>) {
        let needers = self.needers.entry(prerequisite).or_default();
        if let Some(needer) = needer {
            if !needers.contains(&needer) {
                needers.push(needer);
            }
        }
    }

    /// Every rule in the graph, prerequisites before the rules that need them
    ///
    /// Fails with [`PlumbError::Cycle`] naming the rules on the first cycle
    /// found.
    pub(crate) fn execution_order(
        &self,
        name_of: impl Fn(RuleId) -> String,
    ) -> PlumbResult<Vec<RuleId>> {
        let mut marks: HashMap<RuleId, Mark> = HashMap::with_capacity(self.needers.len());
        let mut finished = Vec::with_capacity(self.needers.len());

        for &start in self.needers.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            marks.insert(start, Mark::InProgress);
            let mut stack: Vec<(RuleId, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let (rule, next_index) = *frame;
                let next = self.needers.get(&rule).and_then(|needers| needers.get(next_index));
                let Some(&needer) = next else {
                    marks.insert(rule, Mark::Finished);
                    finished.push(rule);
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                match marks.get(&needer) {
                    Some(Mark::Finished) => {}
                    Some(Mark::InProgress) => {
                        let from = stack.iter().position(|(r, _)| *r == needer).unwrap_or(0);
                        let mut rules: Vec<String> =
                            stack[from..].iter().map(|(r, _)| name_of(*r)).collect();
                        rules.push(name_of(needer));
                        return Err(PlumbError::Cycle { rules });
                    }
                    None if self.needers.contains_key(&needer) => {
                        marks.insert(needer, Mark::InProgress);
                        stack.push((needer, 0));
                    }
                    None => {}
                }
            }
        }

        finished.reverse();
        Ok(finished)
    }
}
