use std::fmt;

use serde::{Deserialize, Serialize};

/// A contiguous region of source text.
///
/// Offsets count Unicode scalar values, not bytes, so that spans survive
/// transport between front-ends with different string representations.
/// Every CST node carries exactly one span; the tree builder rejects
/// nodes without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Offset of the first code point covered by this span.
    pub char_index: u64,
    /// Number of code points covered.
    pub length: u32,
}

impl Span {
    #[must_use]
    pub fn new(char_index: u64, length: u32) -> Self {
        Self { char_index, length }
    }

    /// One-past-the-end offset.
    #[must_use]
    pub fn end(self) -> u64 {
        self.char_index + u64::from(self.length)
    }

    /// Whether `other` lies entirely within this span.
    ///
    /// Used by the tree builder to enforce the child-within-parent
    /// invariant and by tests.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.char_index <= other.char_index && other.end() <= self.end()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.char_index, self.end())
    }
}

/// A human-readable source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps span offsets back to `(line, column)` pairs.
///
/// Built once per module from the source text; `line_starts` holds the
/// code-point offset of the first character of each line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineIndex {
    line_starts: Vec<u64>,
    /// Total number of code points in the indexed source.
    char_len: u64,
}

impl LineIndex {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        let mut offset = 0u64;
        for c in source.chars() {
            offset += 1;
            if c == '\n' {
                line_starts.push(offset);
            }
        }
        Self {
            line_starts,
            char_len: offset,
        }
    }

    /// Resolves the start of `span` to a 1-based line/column pair.
    ///
    /// Offsets past the end of the indexed source clamp to the last line;
    /// synthetic trees (built without real source text) stay renderable.
    #[must_use]
    pub fn location(&self, span: Span) -> SourceLocation {
        let offset = span.char_index.min(self.char_len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        SourceLocation {
            line: u32::try_from(line).unwrap_or(u32::MAX).saturating_add(1),
            column: u32::try_from(offset - self.line_starts[line])
                .unwrap_or(u32::MAX)
                .saturating_add(1),
        }
    }

    /// Code-point offset of the first character of the given 1-based line.
    #[must_use]
    pub fn line_start(&self, line: u32) -> Option<u64> {
        self.line_starts.get(line.checked_sub(1)? as usize).copied()
    }

    #[must_use]
    pub fn line_count(&self) -> u32 {
        u32::try_from(self.line_starts.len()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_of_multi_line_source() {
        let index = LineIndex::new("abc\ndef\n\nxyz");
        assert_eq!(index.location(Span::new(0, 1)), SourceLocation { line: 1, column: 1 });
        assert_eq!(index.location(Span::new(5, 1)), SourceLocation { line: 2, column: 2 });
        assert_eq!(index.location(Span::new(8, 0)), SourceLocation { line: 3, column: 1 });
        assert_eq!(index.location(Span::new(9, 3)), SourceLocation { line: 4, column: 1 });
    }

    #[test]
    fn location_counts_code_points_not_bytes() {
        // Two code points before the newline even though they take 5 bytes.
        let index = LineIndex::new("é⇒\nx");
        assert_eq!(index.location(Span::new(3, 1)), SourceLocation { line: 2, column: 1 });
    }

    #[test]
    fn span_containment() {
        let outer = Span::new(2, 10);
        assert!(outer.contains(Span::new(2, 10)));
        assert!(outer.contains(Span::new(4, 3)));
        assert!(!outer.contains(Span::new(0, 4)));
        assert!(!outer.contains(Span::new(10, 5)));
    }

    #[test]
    fn offsets_past_the_end_clamp() {
        let index = LineIndex::new("ab");
        assert_eq!(index.location(Span::new(99, 1)), SourceLocation { line: 1, column: 3 });
    }
}
