use std::fmt;

use crate::literals::OffsetMap;

/// 1-based line/column location in pipeline source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Locate a byte offset in `source`. Columns count characters, not bytes.
    pub fn locate(source: &str, offset: usize) -> Self {
        let before = &source[..floor_boundary(source, offset)];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map_or(0, |tail| tail.chars().count())
            + 1;
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source range of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.start.line, self.start.column)
    }
}

/// Syntax error in pipeline or expression source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub start: Position,
    pub end: Position,
    /// What the parser would have accepted at `start`.
    pub expected: Vec<String>,
    /// The offending token, or `end of input`.
    pub found: String,
    /// Full text of the source line containing `start`.
    pub line_text: String,
}

impl ParseError {
    /// Build an error for the byte range `start..end` of `source`. An empty
    /// range is widened to cover the token found at `start`.
    pub fn at<S: Into<String>>(
        source: &str,
        start: usize,
        end: usize,
        expected: impl IntoIterator<Item = S>,
    ) -> Self {
        let start = floor_boundary(source, start);
        let found = token_at(source, start);
        let end = if end > start {
            floor_boundary(source, end)
        } else {
            start + found.len()
        };
        let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[start..]
            .find('\n')
            .map_or(source.len(), |i| start + i);
        Self {
            start: Position::locate(source, start),
            end: Position::locate(source, end),
            expected: expected.into_iter().map(Into::into).collect(),
            found: if found.is_empty() {
                "end of input".to_string()
            } else {
                found.to_string()
            },
            line_text: source[line_start..line_end].to_string(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: ", self.start)?;
        match self.expected.as_slice() {
            [] => write!(f, "unexpected {:?}", self.found)?,
            [one] => write!(f, "expected {one}, found {:?}", self.found)?,
            many => write!(f, "expected one of {}, found {:?}", many.join(", "), self.found)?,
        }
        if !self.line_text.trim().is_empty() {
            write!(f, "\n  | {}", self.line_text)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Error location in intermediate (tokenized or rewritten) text. Converted
/// to a [`ParseError`] once mapped back to source coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub offset: usize,
    pub end: usize,
    pub expected: Vec<String>,
}

impl Fault {
    pub fn new<S: Into<String>>(offset: usize, expected: impl IntoIterator<Item = S>) -> Self {
        Self {
            offset,
            end: offset,
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shift(mut self, base: usize) -> Self {
        self.offset += base;
        self.end += base;
        self
    }

    pub fn map(mut self, map: &OffsetMap) -> Self {
        self.offset = map.to_input(self.offset);
        self.end = map.to_input(self.end);
        self
    }

    pub fn into_error(self, source: &str) -> ParseError {
        ParseError::at(source, self.offset, self.end, self.expected)
    }
}

fn floor_boundary(source: &str, offset: usize) -> usize {
    let mut offset = offset.min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn token_at(source: &str, start: usize) -> &str {
    let rest = &source[start..];
    let Some(first) = rest.chars().next() else {
        return "";
    };
    if !(first.is_alphanumeric() || first == '_') {
        let len = ["===", "!==", "**", "<=", ">=", "==", "!=", "&&", "||", ">>", "<<"]
            .iter()
            .find(|op| rest.starts_with(**op))
            .map_or(first.len_utf8(), |op| op.len());
        return &rest[..len];
    }
    let len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(rest.len());
    &rest[..len]
}
