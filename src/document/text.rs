//! Line table and offset/position conversion for document content.
//!
//! Offsets are byte offsets into the content; positions pair a zero-based
//! line with a UTF-16 column. The table pre-computes line start offsets for
//! O(log n) line lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::position::{Position, Range};

/// End-of-line sequence of a document, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfLine {
    Lf,
    Crlf,
}

impl EndOfLine {
    /// Detect the terminator used by `source`; content without any line
    /// break (or with bare `\n`) counts as LF.
    pub fn detect(source: &str) -> EndOfLine {
        if source.contains("\r\n") {
            EndOfLine::Crlf
        } else {
            EndOfLine::Lf
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EndOfLine::Lf => "\n",
            EndOfLine::Crlf => "\r\n",
        }
    }
}

impl fmt::Display for EndOfLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndOfLine::Lf => write!(f, "LF"),
            EndOfLine::Crlf => write!(f, "CRLF"),
        }
    }
}

/// Byte bounds of one line.
///
/// `text_end` excludes the line terminator, `full_end` includes it. They
/// coincide on the last line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineSpan {
    pub start: usize,
    pub text_end: usize,
    pub full_end: usize,
}

/// Pre-computed line index over a document's content.
///
/// Rebuilt in full whenever content changes; a document version owns
/// exactly one index.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset where each line starts.
    line_starts: Vec<usize>,
    source: String,
}

impl LineIndex {
    /// Build a line index from source text.
    pub fn new(source: String) -> Self {
        let mut line_starts = vec![0];

        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }

        Self {
            line_starts,
            source,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Number of lines. Content ending in a terminator has a final empty
    /// line, so this is always at least 1.
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    pub(crate) fn line_span(&self, line: u32) -> Option<LineSpan> {
        let start = *self.line_starts.get(line as usize)?;
        let full_end = self
            .line_starts
            .get(line as usize + 1)
            .copied()
            .unwrap_or(self.source.len());

        let text_end = if full_end > start && self.source[start..full_end].ends_with('\n') {
            if self.source[start..full_end].ends_with("\r\n") {
                full_end - 2
            } else {
                full_end - 1
            }
        } else {
            full_end
        };

        Some(LineSpan {
            start,
            text_end,
            full_end,
        })
    }

    /// The text of a line, without its terminator.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let span = self.line_span(line)?;
        Some(&self.source[span.start..span.text_end])
    }

    /// UTF-16 length of a line's text, terminator excluded.
    pub fn line_utf16_len(&self, line: u32) -> Option<u32> {
        let text = self.line_text(line)?;
        Some(text.chars().map(|c| c.len_utf16() as u32).sum())
    }

    /// Convert a byte offset to a position.
    ///
    /// Offsets outside `[0, len]` clamp to the nearest bound; offsets inside
    /// a line terminator resolve to the end of that line's text, so the
    /// returned position is always canonical.
    pub fn offset_to_position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());

        // Binary search to find the line.
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };

        let span = match self.line_span(line as u32) {
            Some(span) => span,
            None => return Position::new(0, 0),
        };

        let mut col = 0u32;
        for (i, c) in self.source[span.start..span.text_end].char_indices() {
            if span.start + i >= offset {
                break;
            }
            col += c.len_utf16() as u32;
        }

        Position::new(line as u32, col)
    }

    /// Convert a position to a byte offset.
    ///
    /// Returns `None` if the line does not exist. A character index past the
    /// end of the line clamps to the end of the line's text.
    pub fn position_to_offset(&self, position: Position) -> Option<usize> {
        let span = self.line_span(position.line)?;

        let mut utf16_col = 0u32;
        for (i, c) in self.source[span.start..span.text_end].char_indices() {
            if utf16_col >= position.character {
                return Some(span.start + i);
            }
            utf16_col += c.len_utf16() as u32;
        }

        // Position is at or past end of line text.
        Some(span.text_end)
    }

    /// Clamp a position into the valid bounds of this content.
    pub fn clamp_position(&self, position: Position) -> Position {
        let last = self.line_count() - 1;
        if position.line > last {
            return Position::new(last, self.line_utf16_len(last).unwrap_or(0));
        }
        let len = self.line_utf16_len(position.line).unwrap_or(0);
        Position::new(position.line, position.character.min(len))
    }

    /// Clamp both ends of a range into the valid bounds of this content.
    pub fn clamp_range(&self, range: Range) -> Range {
        Range::new(
            self.clamp_position(range.start()),
            self.clamp_position(range.end()),
        )
    }
}
