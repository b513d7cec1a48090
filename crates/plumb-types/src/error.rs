//! Errors raised by document adapters

use thiserror::Error;

/// Errors produced while querying or building a document tree
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// A selector string could not be parsed
    #[error("Invalid selector {selector:?}: {message}")]
    InvalidSelector {
        /// The offending selector text
        selector: String,
        /// What went wrong
        message: String,
    },

    /// A node handle does not belong to the document
    #[error("Unknown node {node}")]
    UnknownNode {
        /// The raw handle value
        node: usize,
    },

    /// An element was required but the handle names some other kind of node
    #[error("Node {node} is not an element")]
    NotAnElement {
        /// The raw handle value
        node: usize,
    },

    /// The element already hosts a shadow tree
    #[error("Node {node} already has a shadow root")]
    ShadowRootExists {
        /// The raw handle value of the host
        node: usize,
    },
}

impl DocumentError {
    /// Create a selector parse error
    pub fn invalid_selector(selector: &str, message: impl Into<String>) -> Self {
        Self::InvalidSelector { selector: selector.to_string(), message: message.into() }
    }
}

/// Result alias for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;
