//! Error types for document and edit operations.

use thiserror::Error;
use url::Url;

use crate::position::Range;

/// Errors surfaced synchronously by document queries and edit application.
///
/// Listener failures are deliberately absent: a failing subscriber never
/// turns into an error for the caller of `fire`; it is reported through
/// the host's listener-failure channel instead (see [`crate::event`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A line index was outside `[0, line_count)`.
    ///
    /// Character indices never produce this error; they clamp to the end
    /// of their line.
    #[error("line {line} out of range (document has {line_count} lines)")]
    OutOfRange { line: u32, line_count: u32 },

    /// The operation targeted a uri with no open document, or a document
    /// that has been closed.
    #[error("no open document for {uri}")]
    DocumentNotFound { uri: Url },

    /// Two edits in the same apply call cover overlapping ranges. The whole
    /// workspace edit is rejected; no document is mutated.
    #[error("conflicting edits in {uri}: {first} overlaps {second}")]
    EditConflict { uri: Url, first: Range, second: Range },

    /// A create or rename targeted a uri that already has an open document.
    #[error("document already exists for {uri}")]
    DocumentExists { uri: Url },
}

pub type Result<T> = std::result::Result<T, HostError>;
