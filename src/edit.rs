//! Declarative text and file edits, applied transactionally.
//!
//! A [`TextEdit`] describes one replacement; a [`WorkspaceEdit`] batches
//! edits across documents together with file-level create/delete/rename
//! operations. Application itself is orchestrated by the host (all-or-
//! nothing across every referenced document); this module holds the edit
//! types and the pure clamp/sort/conflict-check/splice passes.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::document::{LineIndex, TextDocument};
use crate::error::{HostError, Result};
use crate::position::{Position, Range};

/// "Replace the content addressed by `range` with `new_text`."
///
/// Inserts have an empty range; deletes have empty `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    pub fn replace(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    pub fn insert(position: Position, new_text: impl Into<String>) -> Self {
        Self::replace(Range::empty(position), new_text)
    }

    pub fn delete(range: Range) -> Self {
        Self::replace(range, "")
    }
}

/// A file-level operation carried by a [`WorkspaceEdit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    /// Open a new document at `uri`. Fails with `DocumentExists` when a
    /// document is already open there, unless `overwrite` is set.
    Create {
        uri: Url,
        contents: String,
        overwrite: bool,
    },
    /// Close the document at `uri`. Fails with `DocumentNotFound` when
    /// nothing is open there, unless `ignore_if_not_exists` is set.
    Delete {
        uri: Url,
        ignore_if_not_exists: bool,
    },
    /// Re-key the document at `from` under `to`, preserving content and
    /// version. Fails when `from` is unknown, or when `to` is already open
    /// and `overwrite` is not set.
    Rename { from: Url, to: Url, overwrite: bool },
}

/// A transactional batch of content mutations across one or more documents.
///
/// Text edits are grouped per uri in insertion order; file operations keep
/// their own recorded order. Nothing happens until the batch is handed to
/// the host for application.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceEdit {
    text_edits: IndexMap<Url, Vec<TextEdit>>,
    file_operations: Vec<FileOperation>,
}

impl WorkspaceEdit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a replacement of `range` in `uri`.
    pub fn replace(&mut self, uri: Url, range: Range, new_text: impl Into<String>) -> &mut Self {
        self.text_edits
            .entry(uri)
            .or_default()
            .push(TextEdit::replace(range, new_text));
        self
    }

    /// Queue an insertion at `position` in `uri`.
    pub fn insert(&mut self, uri: Url, position: Position, new_text: impl Into<String>) -> &mut Self {
        self.replace(uri, Range::empty(position), new_text)
    }

    /// Queue a deletion of `range` in `uri`.
    pub fn delete(&mut self, uri: Url, range: Range) -> &mut Self {
        self.replace(uri, range, "")
    }

    /// Replace the queued edits for `uri` wholesale.
    pub fn set(&mut self, uri: Url, edits: Vec<TextEdit>) -> &mut Self {
        self.text_edits.insert(uri, edits);
        self
    }

    pub fn get(&self, uri: &Url) -> Option<&[TextEdit]> {
        self.text_edits.get(uri).map(Vec::as_slice)
    }

    pub fn has(&self, uri: &Url) -> bool {
        self.text_edits.contains_key(uri)
    }

    /// Per-document edit lists in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Url, &[TextEdit])> {
        self.text_edits.iter().map(|(uri, e)| (uri, e.as_slice()))
    }

    pub fn create_file(&mut self, uri: Url, contents: impl Into<String>, overwrite: bool) -> &mut Self {
        self.file_operations.push(FileOperation::Create {
            uri,
            contents: contents.into(),
            overwrite,
        });
        self
    }

    pub fn delete_file(&mut self, uri: Url, ignore_if_not_exists: bool) -> &mut Self {
        self.file_operations.push(FileOperation::Delete {
            uri,
            ignore_if_not_exists,
        });
        self
    }

    pub fn rename_file(&mut self, from: Url, to: Url, overwrite: bool) -> &mut Self {
        self.file_operations
            .push(FileOperation::Rename { from, to, overwrite });
        self
    }

    pub fn file_operations(&self) -> &[FileOperation] {
        &self.file_operations
    }

    /// Total number of queued text edits and file operations.
    pub fn size(&self) -> usize {
        self.text_edits.values().map(Vec::len).sum::<usize>() + self.file_operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// One applied change, as delivered by the document-change event: the old
/// range (clamped), its byte offset and length, and the replacement text,
/// in applied order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentContentChange {
    pub range: Range,
    pub range_offset: usize,
    pub range_length: usize,
    pub text: String,
}

/// Payload of the document-change event: the post-edit snapshot plus the
/// changes that produced it.
#[derive(Debug, Clone)]
pub struct DocumentChangeEvent {
    pub document: Arc<TextDocument>,
    pub content_changes: Vec<TextDocumentContentChange>,
}

/// A clamped edit with byte offsets resolved against one content version.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedEdit {
    start: usize,
    end: usize,
    range: Range,
    new_text: String,
}

/// Clamp, resolve, and order a document's edits, rejecting overlaps.
///
/// Edits whose ranges merely touch are fine; two edits overlap only when
/// the earlier one ends strictly after the later one starts. Same-position
/// inserts keep their given order (the sort is stable).
pub(crate) fn resolve_edits(
    uri: &Url,
    index: &LineIndex,
    edits: &[TextEdit],
) -> Result<Vec<ResolvedEdit>> {
    let mut resolved: Vec<ResolvedEdit> = edits
        .iter()
        .map(|edit| {
            let range = index.clamp_range(edit.range);
            let start = index.position_to_offset(range.start()).unwrap_or(0);
            let end = index
                .position_to_offset(range.end())
                .unwrap_or_else(|| index.len());
            ResolvedEdit {
                start,
                end,
                range,
                new_text: edit.new_text.clone(),
            }
        })
        .collect();

    resolved.sort_by_key(|edit| (edit.start, edit.end));

    for pair in resolved.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(HostError::EditConflict {
                uri: uri.clone(),
                first: pair[0].range,
                second: pair[1].range,
            });
        }
    }

    Ok(resolved)
}

/// Rewrite `source` from a sorted, non-overlapping edit list in one pass,
/// returning the new content and the change descriptions in applied order.
pub(crate) fn splice(
    source: &str,
    resolved: &[ResolvedEdit],
) -> (String, Vec<TextDocumentContentChange>) {
    let added: usize = resolved.iter().map(|e| e.new_text.len()).sum();
    let mut out = String::with_capacity(source.len() + added);
    let mut changes = Vec::with_capacity(resolved.len());
    let mut cursor = 0;

    for edit in resolved {
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.new_text);
        changes.push(TextDocumentContentChange {
            range: edit.range,
            range_offset: edit.start,
            range_length: edit.end - edit.start,
            text: edit.new_text.clone(),
        });
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);

    (out, changes)
}
