#![deny(warnings)]
#![allow(missing_docs)]
//! Core functionality for the Plumb rule engine.
//!
//! Plumb classifies and scores the nodes of a document tree with declarative
//! rules. Each rule pairs a left-hand side that selects nodes (by selector, by
//! a type earlier rules assigned, by the best-scoring or best-clustered nodes
//! of a type) with a right-hand side that either records facts on those nodes
//! or exposes them under an output key.
//!
//! Rules run lazily. Asking a [`BoundRuleset`] for an output runs exactly the
//! rules it depends on, in dependency order, and each rule runs at most once
//! per document.
//!
//! ```
//! use plumb_core::{Ruleset, dom, out, rule, type_};
//! use plumb_types::MemoryDocument;
//!
//! let rules = Ruleset::new(vec![
//!     rule(dom("p"), type_("paragraph").score(2.0))?,
//!     rule(type_("paragraph").max(), out("best"))?,
//! ])?;
//! let doc = MemoryDocument::parse("<body><p></p></body>");
//! assert_eq!(rules.against(doc).get("best")?.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Single-linkage clustering over tree and geometric distances
pub mod clusters;
/// Coefficients and biases
pub mod config;
mod dependency;
/// Error types for the rule engine
pub mod error;
/// Per-node fact storage
pub mod fnode;
/// Left-hand sides: which nodes a rule considers
pub mod lhs;
/// Tracing subscriber setup
pub mod logging;
/// Right-hand sides: what a rule does with them
pub mod rhs;
pub mod rule;
/// Rulesets and per-document execution
pub mod ruleset;
/// The chainable rule-building vocabulary
pub mod side;
pub mod types;
/// Helpers for writing rules
pub mod utils;

pub use clusters::{ClusterOptions, DistanceCosts, clusters, distance, euclidean};
pub use config::Coefficients;
pub use error::{PlumbError, PlumbResult};
pub use fnode::Fnode;
pub use lhs::{Lhs, LhsKind};
pub use logging::{LoggingConfig, init_logging};
pub use rhs::{Emissions, InwardRhs, OutwardRhs, Rhs};
pub use rule::{InwardRule, OutwardRule, Rule, rule, rule_named};
pub use ruleset::{BoundRuleset, ExecutionStats, Ruleset, ruleset};
pub use side::{
    Side, and, at_most, conserve_score, dom, element, nearest, nearest_with, note, out, props,
    score, score_with, type_, type_in,
};
pub use types::{
    AllThroughFn, Datum, DistanceFn, Fact, NoteFn, Predicate, PropsFn, ScoreFn, ThroughFn,
};
pub use utils::{
    Rgba, attributes_match, collapse_whitespace, dom_sort, dom_sort_data, inline_text_length,
    inline_texts, is_block, is_visible, linear_scale, link_density, max_by_key, maxes, min_by_key,
    number_of_matches, page, rgba_from_string, saturation, sigmoid, walk,
};

// Re-export the document boundary so embedders need only one dependency
pub use plumb_types::{Document, DocumentError, MemoryDocument, NodeId, Rect};
pub use regex::Regex;

