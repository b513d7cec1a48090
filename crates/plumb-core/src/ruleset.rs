//! Rulesets and the per-document execution engine
//!
//! A [`Ruleset`] is an immutable collection of rules that can be bound to any
//! number of documents. Binding yields a [`BoundRuleset`], which owns every
//! fnode and cache for that document and runs rules lazily:
//!
//! ```text
//! query ─► prerequisite walk ─► execution order ─► run pending rules ─► results
//!           (skips done and     (cycle check        (each inward rule
//!            running rules)      before any write)   runs at most once)
//! ```
//!
//! Inward rules are marked done after running and never run again for the
//! same document. Outward rules write nothing, so they are evaluated afresh on
//! every query.

use crate::config::Coefficients;
use crate::dependency::DependencyGraph;
use crate::error::{PlumbError, PlumbResult};
use crate::fnode::Fnode;
use crate::rule::{InwardRule, OutwardRule, Rule, RuleId, prerequisites_of_type, rule_named};
use crate::side::{Side, out};
use crate::types::Datum;
use plumb_types::{Document, NodeId};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::{debug, info, instrument, warn};

/// Build a ruleset from rules plus coefficient and bias pairs
pub fn ruleset(
    rules: Vec<Rule>,
    coeffs: &[(&str, f64)],
    biases: &[(&str, f64)],
) -> PlumbResult<Ruleset> {
    Ruleset::with_coefficients(
        rules,
        Coefficients::from_pairs(coeffs.iter().copied(), biases.iter().copied()),
    )
}

pub(crate) struct RulesetInner {
    inward: Vec<InwardRule>,
    outward: Vec<OutwardRule>,
    out_keys: HashMap<String, usize>,
    could_emit: HashMap<String, Vec<RuleId>>,
    could_add: HashMap<String, Vec<RuleId>>,
    coefficients: Coefficients,
}

impl RulesetInner {
    pub(crate) fn rules_that_could_emit(&self, ty: &str) -> &[RuleId] {
        self.could_emit.get(ty).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn rules_that_could_add(&self, ty: &str) -> &[RuleId] {
        self.could_add.get(ty).map_or(&[], Vec::as_slice)
    }

    fn inward_rule(&self, id: RuleId) -> &InwardRule {
        &self.inward[id.0]
    }

    fn outward_rule(&self, key: &str) -> Option<&OutwardRule> {
        self.out_keys.get(key).map(|&index| &self.outward[index])
    }
}

/// An unbound, reusable set of rules
#[derive(Clone)]
pub struct Ruleset {
    inner: Rc<RulesetInner>,
}

impl std::fmt::Debug for Ruleset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ruleset").finish_non_exhaustive()
    }
}

impl Ruleset {
    pub fn new(rules: Vec<Rule>) -> PlumbResult<Self> {
        Self::with_coefficients(rules, Coefficients::default())
    }

    /// Index rules by what they could emit and add, and outward rules by key
    #[instrument(skip(rules))]
    pub fn with_coefficients(rules: Vec<Rule>, coefficients: Coefficients) -> PlumbResult<Self> {
        let mut inward: Vec<InwardRule> = Vec::new();
        let mut outward: Vec<OutwardRule> = Vec::new();
        let mut out_keys = HashMap::new();
        let mut could_emit: HashMap<String, Vec<RuleId>> = HashMap::new();
        let mut could_add: HashMap<String, Vec<RuleId>> = HashMap::new();

        for rule in rules {
            match rule {
                Rule::Inward(rule) => {
                    let id = RuleId(inward.len());
                    for ty in rule.types_it_could_emit() {
                        could_emit.entry(ty.clone()).or_default().push(id);
                    }
                    for ty in rule.types_it_could_add() {
                        could_add.entry(ty.clone()).or_default().push(id);
                    }
                    inward.push(rule);
                }
                Rule::Outward(rule) => {
                    if out_keys.contains_key(rule.key()) {
                        return Err(PlumbError::construction(format!(
                            "More than one out() rule uses the key {:?}.",
                            rule.key()
                        )));
                    }
                    out_keys.insert(rule.key().to_string(), outward.len());
                    outward.push(rule);
                }
            }
        }

        info!(inward = inward.len(), outward = outward.len(), "Built ruleset");
        Ok(Self {
            inner: Rc::new(RulesetInner {
                inward,
                outward,
                out_keys,
                could_emit,
                could_add,
                coefficients,
            }),
        })
    }

    /// Every rule, inward ones first, for composing a larger ruleset
    pub fn rules(&self) -> Vec<Rule> {
        let inward = self.inner.inward.iter().cloned().map(Rule::Inward);
        let outward = self.inner.outward.iter().cloned().map(Rule::Outward);
        inward.chain(outward).collect()
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.inner.coefficients
    }

    /// Bind to a document
    pub fn against<D: Document + 'static>(&self, doc: D) -> BoundRuleset {
        self.against_shared(Rc::new(doc))
    }

    /// Bind to a document that is also used elsewhere
    pub fn against_shared(&self, doc: Rc<dyn Document>) -> BoundRuleset {
        let ruleset = Rc::clone(&self.inner);
        let coeffs = ruleset.coefficients.coeff_map();
        let biases = ruleset.coefficients.bias_map();
        debug!(root = %doc.root(), "Binding ruleset to document");
        let inner = Rc::new_cyclic(|this| BoundInner {
            this: this.clone(),
            doc,
            ruleset,
            coeffs: RefCell::new(coeffs),
            biases: RefCell::new(biases),
            element_cache: RefCell::new(HashMap::new()),
            type_cache: RefCell::new(HashMap::new()),
            max_cache: RefCell::new(HashMap::new()),
            done: RefCell::new(DoneRules::default()),
            executing: RefCell::new(HashSet::new()),
            stats: Cell::new(ExecutionStats::default()),
            selections: Cell::new(0),
        });
        BoundRuleset { inner }
    }
}

/// Counters for observing how much work queries caused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub inward_rules_executed: usize,
    pub outward_rules_evaluated: usize,
    pub queries_served: usize,
}

#[derive(Default)]
struct DoneRules {
    order: Vec<RuleId>,
    set: HashSet<RuleId>,
}

/// Every fnode known to carry a type, in discovery order
#[derive(Default)]
struct TypeEntry {
    fnodes: Vec<Fnode>,
    members: HashSet<NodeId>,
}

/// Execution state for one document
pub(crate) struct BoundInner {
    this: Weak<BoundInner>,
    doc: Rc<dyn Document>,
    ruleset: Rc<RulesetInner>,
    coeffs: RefCell<HashMap<String, f64>>,
    biases: RefCell<HashMap<String, f64>>,
    element_cache: RefCell<HashMap<NodeId, Fnode>>,
    type_cache: RefCell<HashMap<String, TypeEntry>>,
    max_cache: RefCell<HashMap<String, Vec<Fnode>>>,
    done: RefCell<DoneRules>,
    /// Rules partway through execution; nested queries must not wait on them
    executing: RefCell<HashSet<RuleId>>,
    stats: Cell<ExecutionStats>,
    selections: Cell<usize>,
}

impl BoundInner {
    pub(crate) fn document(&self) -> Rc<dyn Document> {
        Rc::clone(&self.doc)
    }

    pub(crate) fn fnode_for(&self, node: NodeId) -> Fnode {
        self.element_cache
            .borrow_mut()
            .entry(node)
            .or_insert_with(|| Fnode::new(node, self.this.clone()))
            .clone()
    }

    pub(crate) fn weighted_score(&self, scores: &BTreeMap<String, f64>) -> f64 {
        let coeffs = self.coeffs.borrow();
        scores.iter().map(|(rule, score)| score * coeffs.get(rule).copied().unwrap_or(1.0)).sum()
    }

    pub(crate) fn bias_for(&self, ty: &str) -> f64 {
        self.biases.borrow().get(ty).copied().unwrap_or(0.0)
    }

    /// Every fnode carrying `ty` so far
    pub(crate) fn typed_fnodes(&self, ty: &str) -> Vec<Fnode> {
        self.type_cache.borrow().get(ty).map(|entry| entry.fnodes.clone()).unwrap_or_default()
    }

    pub(crate) fn cached_maxes(&self, ty: &str) -> Option<Vec<Fnode>> {
        self.max_cache.borrow().get(ty).cloned()
    }

    pub(crate) fn store_maxes(&self, ty: &str, fnodes: Vec<Fnode>) {
        self.max_cache.borrow_mut().insert(ty.to_string(), fnodes);
    }

    fn is_done(&self, id: RuleId) -> bool {
        self.done.borrow().set.contains(&id)
    }

    fn is_executing(&self, id: RuleId) -> bool {
        self.executing.borrow().contains(&id)
    }

    /// Whether no rule that could still change `ty` is pending
    pub(crate) fn is_type_settled(&self, ty: &str) -> bool {
        self.ruleset
            .rules_that_could_emit(ty)
            .iter()
            .chain(self.ruleset.rules_that_could_add(ty))
            .all(|&id| self.is_done(id) || self.is_executing(id))
    }

    /// Run every pending rule that could emit or add `ty`
    pub(crate) fn ensure_type(&self, ty: &str) -> PlumbResult<()> {
        debug!(ty, "Forcing type");
        self.run_prerequisites(prerequisites_of_type(ty, &self.ruleset)?)
    }

    /// Walk from `direct` to every pending rule they transitively need
    fn undone_prerequisites(&self, direct: Vec<RuleId>) -> PlumbResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        let mut pending: Vec<(RuleId, Option<RuleId>)> =
            direct.into_iter().rev().map(|id| (id, None)).collect();

        while let Some((prerequisite, needer)) = pending.pop() {
            if self.is_done(prerequisite) || self.is_executing(prerequisite) {
                continue;
            }
            let expanded = graph.contains(prerequisite);
            graph.add_prerequisite(prerequisite, needer);
            if !expanded {
                let rule = self.ruleset.inward_rule(prerequisite);
                for next in rule.prerequisites(&self.ruleset)?.into_iter().rev() {
                    pending.push((next, Some(prerequisite)));
                }
            }
        }
        Ok(graph)
    }

    fn run_prerequisites(&self, direct: Vec<RuleId>) -> PlumbResult<()> {
        let graph = self.undone_prerequisites(direct)?;
        if graph.is_empty() {
            return Ok(());
        }
        let order = graph
            .execution_order(|id| self.ruleset.inward_rule(id).name().to_string())
            .inspect_err(|err| warn!(error = %err, "Refusing to run rules"))?;
        debug!(rules = graph.len(), "Running pending rules");

        for id in order {
            // A callback in an earlier rule may have forced this one already.
            if self.is_done(id) {
                continue;
            }
            self.execute_inward(id)?;
        }
        Ok(())
    }

    fn execute_inward(&self, id: RuleId) -> PlumbResult<()> {
        let rule = self.ruleset.inward_rule(id);
        self.executing.borrow_mut().insert(id);
        let outcome = rule.apply(self);
        self.executing.borrow_mut().remove(&id);
        let touched = outcome?;

        {
            let mut done = self.done.borrow_mut();
            done.set.insert(id);
            done.order.push(id);
        }
        let mut stats = self.stats.get();
        stats.inward_rules_executed += 1;
        self.stats.set(stats);

        let mut cache = self.type_cache.borrow_mut();
        for fnode in &touched {
            for ty in fnode.types_so_far() {
                let entry = cache.entry(ty).or_default();
                if entry.members.insert(fnode.node()) {
                    entry.fnodes.push(fnode.clone());
                }
            }
        }
        debug!(rule = %rule.name(), fnodes = touched.len(), "Executed inward rule");
        Ok(())
    }

    fn evaluate_outward(&self, rule: &OutwardRule) -> PlumbResult<Vec<Datum>> {
        self.run_prerequisites(rule.prerequisites(&self.ruleset)?)?;
        let results = rule.results(self)?;
        let mut stats = self.stats.get();
        stats.outward_rules_evaluated += 1;
        self.stats.set(stats);
        debug!(rule = %rule.name(), results = results.len(), "Evaluated outward rule");
        Ok(results)
    }

    fn count_query(&self) {
        let mut stats = self.stats.get();
        stats.queries_served += 1;
        self.stats.set(stats);
    }
}

/// A ruleset bound to one document
///
/// Cloning shares the same execution state.
#[derive(Clone)]
pub struct BoundRuleset {
    inner: Rc<BoundInner>,
}

impl BoundRuleset {
    /// Results of the outward rule registered under `key`, as fnodes
    pub fn get(&self, key: &str) -> PlumbResult<Vec<Fnode>> {
        self.get_data(key)?
            .into_iter()
            .map(|datum| match datum {
                Datum::Node(fnode) => Ok(fnode),
                Datum::Json(_) => Err(PlumbError::NonFnodeOutput { key: key.to_string() }),
            })
            .collect()
    }

    /// Results of the outward rule registered under `key`, after any
    /// `through()` and `all_through()` transforms
    #[instrument(skip(self))]
    pub fn get_data(&self, key: &str) -> PlumbResult<Vec<Datum>> {
        let rule = self
            .inner
            .ruleset
            .outward_rule(key)
            .ok_or_else(|| PlumbError::UnknownOutput { key: key.to_string() })?;
        self.inner.count_query();
        self.inner.evaluate_outward(rule)
    }

    /// The fnode for a document node; nothing is run until it is asked about a type
    pub fn fnode_for(&self, node: NodeId) -> Fnode {
        self.inner.fnode_for(node)
    }

    /// Evaluate an ad hoc left-hand-side expression, such as `type_("title").max()`
    #[instrument(skip(self))]
    pub fn select(&self, expr: &Side) -> PlumbResult<Vec<Fnode>> {
        let index = self.inner.selections.get();
        self.inner.selections.set(index + 1);
        let key = format!("_select_{index}");

        let Rule::Outward(rule) = rule_named(expr.clone(), out(&key), &key)? else {
            return Err(PlumbError::construction("A selection must compile to an out() rule."));
        };
        self.inner.count_query();
        self.inner
            .evaluate_outward(&rule)?
            .into_iter()
            .filter_map(|datum| match datum {
                Datum::Node(fnode) => Some(Ok(fnode)),
                Datum::Json(_) => None,
            })
            .collect()
    }

    /// Replace coefficients and biases
    ///
    /// Scores are recomputed from stored contributions on demand, so no rule
    /// runs again; only cached maxima are dropped.
    #[instrument(skip(self))]
    pub fn set_coeffs_and_biases(&self, coefficients: &Coefficients) {
        *self.inner.coeffs.borrow_mut() = coefficients.coeff_map();
        *self.inner.biases.borrow_mut() = coefficients.bias_map();
        self.inner.max_cache.borrow_mut().clear();
        info!(
            coeffs = coefficients.coeffs.len(),
            biases = coefficients.biases.len(),
            "Replaced coefficients and biases"
        );
    }

    /// Sum of raw contributions, each multiplied by its rule's coefficient
    pub fn weighted_score(&self, scores: &BTreeMap<String, f64>) -> f64 {
        self.inner.weighted_score(scores)
    }

    pub fn bias_for(&self, ty: &str) -> f64 {
        self.inner.bias_for(ty)
    }

    pub fn stats(&self) -> ExecutionStats {
        self.inner.stats.get()
    }

    /// Names of the inward rules run so far, in execution order
    pub fn executed_rules(&self) -> Vec<String> {
        let done = self.inner.done.borrow();
        done.order.iter().map(|&id| self.inner.ruleset.inward_rule(id).name().to_string()).collect()
    }

    pub fn document(&self) -> Rc<dyn Document> {
        self.inner.document()
    }
}
