//! Error handling for the Plumb engine
//!
//! Every failure the engine can raise is a [`PlumbError`]. Construction errors
//! surface while rules and rulesets are being built; cycle, lookup, and
//! note-conflict errors surface from the query that triggered them. Nothing is
//! retried internally.

use plumb_types::{DocumentError, NodeId};
use thiserror::Error;

/// Error type for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlumbError {
    /// A rule or ruleset was malformed
    #[error("Construction error: {message}")]
    Construction { message: String },

    /// The prerequisites of a query form a cycle
    #[error("There is a cyclic dependency in the ruleset: {}", rules.join(" -> "))]
    Cycle { rules: Vec<String> },

    /// A rule tried to replace an existing note
    #[error(
        "A note of type {type_name:?} already exists on node {node}. Overwriting notes is \
         not allowed, since it would make the order of rules matter."
    )]
    NoteConflict { type_name: String, node: NodeId },

    /// No outward rule is registered under the key
    #[error("There is no out() rule with key {key:?}")]
    UnknownOutput { key: String },

    /// A rule needs a type that no rule can provide
    #[error("No rule {verb} the {type_name:?} type, but another rule needs it as input")]
    MissingProducer { type_name: String, verb: &'static str },

    /// A right-hand side produced a fact it is not allowed to produce
    #[error("Rule {rule:?} produced an invalid fact: {message}")]
    InvalidFact { rule: String, message: String },

    /// An outward rule's results were asked for as fnodes but hold other data
    #[error("The out() rule with key {key:?} produced results that are not fnodes")]
    NonFnodeOutput { key: String },

    /// A fnode outlived the bound ruleset that created it
    #[error("The bound ruleset that created this fnode no longer exists")]
    RulesetDropped,

    /// A user-supplied callback failed
    #[error("Callback error: {message}")]
    Callback { message: String },

    /// A color string was not of the form `rgb(r, g, b)` or `rgba(r, g, b, a)`
    #[error("Color {color:?} did not match pattern rgb[a](r, g, b[, a])")]
    InvalidColor { color: String },

    /// Coefficients or other configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The document adapter failed
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl PlumbError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            PlumbError::Construction { .. } => "construction",
            PlumbError::Cycle { .. } => "cycle",
            PlumbError::NoteConflict { .. } => "note_conflict",
            PlumbError::UnknownOutput { .. } | PlumbError::NonFnodeOutput { .. } => "lookup",
            PlumbError::MissingProducer { .. } => "missing_producer",
            PlumbError::InvalidFact { .. } => "invalid_fact",
            PlumbError::RulesetDropped => "lifetime",
            PlumbError::Callback { .. } => "callback",
            PlumbError::InvalidColor { .. } => "invalid_color",
            PlumbError::Configuration { .. } => "configuration",
            PlumbError::Document(_) => "document",
        }
    }

    /// Whether this is the distinguished cycle error
    pub fn is_cycle(&self) -> bool {
        matches!(self, PlumbError::Cycle { .. })
    }

    /// Create a construction error
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction { message: message.into() }
    }

    /// Create a callback error, for use inside scoring and note callbacks
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub(crate) fn invalid_fact(rule: &str, message: impl Into<String>) -> Self {
        Self::InvalidFact { rule: rule.to_string(), message: message.into() }
    }
}

impl From<serde_json::Error> for PlumbError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<regex::Error> for PlumbError {
    fn from(err: regex::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Result type alias for engine operations
pub type PlumbResult<T> = Result<T, PlumbError>;
