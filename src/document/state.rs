//! Document state and lifecycle management.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::{HostError, Result};
use crate::position::{Position, Range};

use super::text::{EndOfLine, LineIndex};

/// A single line of a document.
///
/// `text` excludes the line terminator; `range_including_line_break` covers
/// it (on the last line the two ranges coincide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    line_number: u32,
    text: String,
    range: Range,
    range_including_line_break: Range,
}

impl TextLine {
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn range_including_line_break(&self) -> Range {
        self.range_including_line_break
    }

    /// UTF-16 index of the first non-whitespace character, or the line
    /// length if the line is blank.
    pub fn first_non_whitespace_character_index(&self) -> u32 {
        let mut col = 0u32;
        for c in self.text.chars() {
            if !c.is_whitespace() {
                break;
            }
            col += c.len_utf16() as u32;
        }
        col
    }

    pub fn is_empty_or_whitespace(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One version of an open document.
///
/// A `TextDocument` is immutable: applying an edit produces a new snapshot
/// with `version + 1` and a rebuilt line table. The closed flag is shared
/// across every snapshot of the same document, so once the document is
/// closed even previously-held versions reject content queries instead of
/// serving stale data.
#[derive(Debug, Clone)]
pub struct TextDocument {
    uri: Url,
    language_id: String,
    version: i32,
    eol: EndOfLine,
    index: LineIndex,
    word_pattern: Arc<Regex>,
    closed: Arc<AtomicBool>,
}

impl TextDocument {
    pub(crate) fn new(
        uri: Url,
        language_id: String,
        text: String,
        eol: EndOfLine,
        word_pattern: Arc<Regex>,
    ) -> Self {
        Self {
            uri,
            language_id,
            version: 1,
            eol,
            index: LineIndex::new(text),
            word_pattern,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Next version of this document with new content. Shares the closed
    /// flag with all earlier snapshots.
    pub(crate) fn with_content(&self, text: String) -> Self {
        Self {
            uri: self.uri.clone(),
            language_id: self.language_id.clone(),
            version: self.version + 1,
            eol: self.eol,
            index: LineIndex::new(text),
            word_pattern: Arc::clone(&self.word_pattern),
            closed: Arc::clone(&self.closed),
        }
    }

    /// The same document content re-keyed under a new uri. Version is
    /// preserved; the renamed document gets a fresh closed flag since the
    /// old uri's snapshots are closed independently.
    pub(crate) fn renamed(&self, uri: Url) -> Self {
        Self {
            uri,
            language_id: self.language_id.clone(),
            version: self.version,
            eol: self.eol,
            index: self.index.clone(),
            word_pattern: Arc::clone(&self.word_pattern),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    // Identity and metadata stay readable after close.

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn eol(&self) -> EndOfLine {
        self.eol
    }

    pub fn line_count(&self) -> u32 {
        self.index.line_count()
    }

    /// Content length in bytes.
    pub fn text_len(&self) -> usize {
        self.index.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn line_index(&self) -> &LineIndex {
        &self.index
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::DocumentNotFound {
                uri: self.uri.clone(),
            });
        }
        Ok(())
    }

    fn out_of_range(&self, line: u32) -> HostError {
        HostError::OutOfRange {
            line,
            line_count: self.line_count(),
        }
    }

    /// The line at the given index.
    ///
    /// Line indices outside `[0, line_count)` are hard errors; unlike
    /// character indices they never clamp.
    pub fn line_at(&self, line: u32) -> Result<TextLine> {
        self.ensure_open()?;
        let text = self
            .index
            .line_text(line)
            .ok_or_else(|| self.out_of_range(line))?
            .to_string();

        let utf16_len = self.index.line_utf16_len(line).unwrap_or(0);
        let range = Range::from_coords(line, 0, line, utf16_len);
        let range_including_line_break = if line + 1 < self.line_count() {
            Range::from_coords(line, 0, line + 1, 0)
        } else {
            range
        };

        Ok(TextLine {
            line_number: line,
            text,
            range,
            range_including_line_break,
        })
    }

    /// The line containing the given position.
    pub fn line_at_position(&self, position: Position) -> Result<TextLine> {
        self.line_at(position.line)
    }

    /// Byte offset of a position.
    ///
    /// The position's character clamps to the end of its line; a line index
    /// outside the document is an `OutOfRange` error.
    pub fn offset_at(&self, position: Position) -> Result<usize> {
        self.ensure_open()?;
        self.index
            .position_to_offset(position)
            .ok_or_else(|| self.out_of_range(position.line))
    }

    /// Position of a byte offset; offsets outside `[0, len]` clamp.
    pub fn position_at(&self, offset: usize) -> Result<Position> {
        self.ensure_open()?;
        Ok(self.index.offset_to_position(offset))
    }

    /// The full document content.
    pub fn get_text(&self) -> Result<&str> {
        self.ensure_open()?;
        Ok(self.index.source())
    }

    /// The exact substring spanned by `range`, embedded line terminators
    /// included. The range is validated (clamped) first.
    pub fn get_text_range(&self, range: Range) -> Result<&str> {
        self.ensure_open()?;
        let range = self.index.clamp_range(range);
        // Clamped positions always resolve to offsets.
        let start = self.index.position_to_offset(range.start()).unwrap_or(0);
        let end = self
            .index
            .position_to_offset(range.end())
            .unwrap_or_else(|| self.index.len());
        Ok(&self.index.source()[start..end])
    }

    /// A copy of `position` clamped into the document's current bounds.
    pub fn validate_position(&self, position: Position) -> Result<Position> {
        self.ensure_open()?;
        Ok(self.index.clamp_position(position))
    }

    /// A copy of `range` with both ends clamped into the current bounds.
    pub fn validate_range(&self, range: Range) -> Result<Range> {
        self.ensure_open()?;
        Ok(self.index.clamp_range(range))
    }

    /// The range of the word containing `position` per the document's word
    /// pattern, or `None` when the position is not on a word.
    pub fn word_range_at_position(&self, position: Position) -> Result<Option<Range>> {
        let pattern = Arc::clone(&self.word_pattern);
        self.word_range_with_pattern(position, &pattern)
    }

    /// As [`word_range_at_position`](Self::word_range_at_position), with an
    /// explicit word pattern.
    pub fn word_range_with_pattern(
        &self,
        position: Position,
        pattern: &Regex,
    ) -> Result<Option<Range>> {
        self.ensure_open()?;
        let position = self.index.clamp_position(position);
        let line_text = self
            .index
            .line_text(position.line)
            .ok_or_else(|| self.out_of_range(position.line))?;

        // Line-local byte column of the position.
        let line_start = self
            .index
            .line_span(position.line)
            .map(|s| s.start)
            .unwrap_or(0);
        let byte_col = self
            .index
            .position_to_offset(position)
            .unwrap_or(line_start)
            - line_start;

        for m in pattern.find_iter(line_text) {
            if m.start() <= byte_col && byte_col <= m.end() {
                let start_col = utf16_col(line_text, m.start());
                let end_col = utf16_col(line_text, m.end());
                return Ok(Some(Range::from_coords(
                    position.line,
                    start_col,
                    position.line,
                    end_col,
                )));
            }
            if m.start() > byte_col {
                break;
            }
        }
        Ok(None)
    }
}

/// UTF-16 column of a byte offset within a single line's text.
fn utf16_col(line_text: &str, byte: usize) -> u32 {
    line_text[..byte].chars().map(|c| c.len_utf16() as u32).sum()
}

/// Uri-keyed storage for open documents.
#[derive(Debug, Default)]
pub(crate) struct DocumentStore {
    documents: DashMap<Url, Arc<TextDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    pub fn insert(&self, doc: Arc<TextDocument>) {
        self.documents.insert(doc.uri().clone(), doc);
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<TextDocument>> {
        self.documents.get(uri).map(|r| Arc::clone(&r))
    }

    /// The open document at `uri`, or `DocumentNotFound`.
    pub fn get_open(&self, uri: &Url) -> Result<Arc<TextDocument>> {
        match self.get(uri) {
            Some(doc) if !doc.is_closed() => Ok(doc),
            _ => Err(HostError::DocumentNotFound { uri: uri.clone() }),
        }
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    /// Remove and close the document at `uri`, returning its final snapshot.
    pub fn close(&self, uri: &Url) -> Result<Arc<TextDocument>> {
        let (_, doc) = self
            .documents
            .remove(uri)
            .ok_or_else(|| HostError::DocumentNotFound { uri: uri.clone() })?;
        doc.mark_closed();
        debug!(%uri, version = doc.version(), "closed document");
        Ok(doc)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<TextDocument>> {
        self.documents.iter().map(|r| Arc::clone(&r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> TextDocument {
        TextDocument::new(
            Url::parse("test:doc").unwrap(),
            "plaintext".to_string(),
            text.to_string(),
            EndOfLine::detect(text),
            Arc::new(Regex::new(r"\w+").unwrap()),
        )
    }

    #[test]
    fn initial_version_is_one() {
        let d = doc("ab\ncd");
        assert_eq!(d.version(), 1);
        assert_eq!(d.with_content("x".to_string()).version(), 2);
    }

    #[test]
    fn line_at_out_of_range() {
        let d = doc("ab\ncd");
        assert!(d.line_at(0).is_ok());
        assert!(d.line_at(1).is_ok());
        assert_eq!(
            d.line_at(2),
            Err(HostError::OutOfRange {
                line: 2,
                line_count: 2
            })
        );
    }

    #[test]
    fn line_ranges_cover_terminator() {
        let d = doc("ab\ncd");
        let first = d.line_at(0).unwrap();
        assert_eq!(first.text(), "ab");
        assert_eq!(first.range(), Range::from_coords(0, 0, 0, 2));
        assert_eq!(
            first.range_including_line_break(),
            Range::from_coords(0, 0, 1, 0)
        );

        let last = d.line_at(1).unwrap();
        assert_eq!(last.range(), last.range_including_line_break());
    }

    #[test]
    fn first_non_whitespace() {
        let d = doc("  two\n\t\n");
        assert_eq!(
            d.line_at(0).unwrap().first_non_whitespace_character_index(),
            2
        );
        let blank = d.line_at(1).unwrap();
        assert!(blank.is_empty_or_whitespace());
        assert_eq!(blank.first_non_whitespace_character_index(), 1);
    }

    #[test]
    fn offset_and_position_scenario() {
        // "ab\ncd": positionAt(3) is (1,0); offsetAt((1,1)) is 4
        let d = doc("ab\ncd");
        assert_eq!(d.position_at(3).unwrap(), Position::new(1, 0));
        assert_eq!(d.offset_at(Position::new(1, 1)).unwrap(), 4);
    }

    #[test]
    fn offset_at_rejects_bad_line_but_clamps_character() {
        let d = doc("ab\ncd");
        assert_eq!(d.offset_at(Position::new(0, 99)).unwrap(), 2);
        assert!(matches!(
            d.offset_at(Position::new(9, 0)),
            Err(HostError::OutOfRange { line: 9, .. })
        ));
    }

    #[test]
    fn get_text_range_spans_terminators() {
        let d = doc("ab\ncd");
        assert_eq!(d.get_text().unwrap(), "ab\ncd");
        assert_eq!(
            d.get_text_range(Range::from_coords(0, 1, 1, 1)).unwrap(),
            "b\nc"
        );
        // out-of-bounds coordinates clamp instead of failing
        assert_eq!(
            d.get_text_range(Range::from_coords(0, 0, 9, 9)).unwrap(),
            "ab\ncd"
        );
    }

    #[test]
    fn validate_clamps_without_mutating_input() {
        let d = doc("ab\ncd");
        let p = Position::new(7, 7);
        assert_eq!(d.validate_position(p).unwrap(), Position::new(1, 2));
        assert_eq!(p, Position::new(7, 7));
        assert_eq!(
            d.validate_range(Range::from_coords(0, 5, 9, 0)).unwrap(),
            Range::from_coords(0, 2, 1, 2)
        );
    }

    #[test]
    fn closed_document_rejects_queries() {
        let d = doc("ab\ncd");
        let snapshot = d.with_content("ab\ncd!".to_string());
        d.mark_closed();

        assert!(d.get_text().is_err());
        assert!(d.line_at(0).is_err());
        assert!(d.offset_at(Position::new(0, 0)).is_err());
        // the shared flag closes every snapshot of the document
        assert!(snapshot.get_text().is_err());
        // identity metadata stays readable
        assert_eq!(d.version(), 1);
        assert!(d.is_closed());
    }

    #[test]
    fn word_ranges() {
        let d = doc("let foo = bar_baz;");
        assert_eq!(
            d.word_range_at_position(Position::new(0, 5)).unwrap(),
            Some(Range::from_coords(0, 4, 0, 7))
        );
        // cursor at the word's end boundary still matches
        assert_eq!(
            d.word_range_at_position(Position::new(0, 7)).unwrap(),
            Some(Range::from_coords(0, 4, 0, 7))
        );
        assert_eq!(
            d.word_range_at_position(Position::new(0, 10)).unwrap(),
            Some(Range::from_coords(0, 10, 0, 17))
        );
        // '=' is not a word character
        assert_eq!(d.word_range_at_position(Position::new(0, 8)).unwrap(), None);
    }

    #[test]
    fn word_range_with_custom_pattern() {
        let d = doc("a-b c-d");
        let dashed = Regex::new(r"[\w-]+").unwrap();
        assert_eq!(
            d.word_range_with_pattern(Position::new(0, 1), &dashed)
                .unwrap(),
            Some(Range::from_coords(0, 0, 0, 3))
        );
    }

    #[test]
    fn store_lookup_and_close() {
        let store = DocumentStore::new();
        let uri = Url::parse("test:a").unwrap();
        let d = Arc::new(doc(""));
        store.insert(Arc::clone(&d));

        assert!(store.contains(d.uri()));
        assert!(store.get_open(d.uri()).is_ok());
        assert!(matches!(
            store.get_open(&uri),
            Err(HostError::DocumentNotFound { .. })
        ));

        let closed = store.close(d.uri()).unwrap();
        assert!(closed.is_closed());
        assert!(store.get(d.uri()).is_none());
        assert!(store.close(d.uri()).is_err());
    }
}
