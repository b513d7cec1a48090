//! Plumb Types
//!
//! This crate defines the boundary between the Plumb rule engine and the
//! document trees it classifies. The engine never looks inside a concrete tree;
//! it talks to one through the [`Document`] capability trait and refers to nodes
//! by opaque [`NodeId`] handles.
//!
//! [`MemoryDocument`] implements [`Document`] over HTML parsed with `scraper`,
//! including attached shadow trees. Tests, benchmarks, and embedders with no
//! DOM of their own use it.

#![deny(warnings)]
#![deny(missing_docs)]

mod document;
mod error;
mod memory;

pub use document::{Document, NodeId, Rect};
pub use error::{DocumentError, DocumentResult};
pub use memory::MemoryDocument;
