//! Document model: line table, versioned snapshots, and storage.
//!
//! This module provides:
//! - `LineIndex` for byte offset <-> position conversion
//! - `TextDocument` and `TextLine` for immutable-per-version content access
//! - `DocumentStore` for uri-keyed document lifecycle management

mod state;
mod text;

pub use state::{TextDocument, TextLine};
pub use text::{EndOfLine, LineIndex};

pub(crate) use state::DocumentStore;
