//! String-literal extraction.
//!
//! Quoted literals are lifted out of the source before any structural
//! scanning, so separators, brackets and operators inside strings can never
//! confuse the statement splitter or the expression grammar. Each literal is
//! replaced by a `#N` placeholder that indexes the literal table.

use std::fmt::Write as _;

use crate::error::ParseError;

#[cfg(test)]
mod tests;

/// Tokenized text plus the literal table it refers to.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Source with every quoted literal replaced by `#N`.
    pub text: String,
    /// Literal table; `#N` refers to `literals[N]` (unescaped contents).
    pub literals: Vec<String>,
    /// Maps offsets in `text` back to offsets in the source.
    pub map: OffsetMap,
}

/// Piecewise-linear mapping from offsets in rewritten text back to the text
/// it was produced from.
#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    /// `(output offset, input offset)` pairs, ascending in both.
    anchors: Vec<(usize, usize)>,
}

impl OffsetMap {
    pub(crate) fn anchor(&mut self, output: usize, input: usize) {
        self.anchors.push((output, input));
    }

    /// Translate an offset in the rewritten text into the original text.
    pub fn to_input(&self, output: usize) -> usize {
        match self.anchors.partition_point(|(out, _)| *out <= output) {
            0 => output,
            i => {
                let (out, input) = self.anchors[i - 1];
                input + (output - out)
            }
        }
    }
}

/// Replace every single- or double-quoted literal with a `#N` placeholder.
///
/// Inside quotes a backslash escapes the next character; `\n`, `\t` and `\r`
/// produce control characters, anything else stands for itself.
pub fn extract_literals(source: &str) -> Result<Extracted, ParseError> {
    let mut out = Extracted {
        text: String::with_capacity(source.len()),
        ..Extracted::default()
    };
    let mut chars = source.char_indices();

    while let Some((start, c)) = chars.next() {
        if c != '"' && c != '\'' {
            out.text.push(c);
            continue;
        }

        let mut value = String::new();
        let mut closed_at = None;
        while let Some((i, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, escaped)) => value.push(unescape(escaped)),
                    None => break,
                },
                quote if quote == c => {
                    closed_at = Some(i + quote.len_utf8());
                    break;
                }
                other => value.push(other),
            }
        }
        let Some(end) = closed_at else {
            return Err(ParseError::at(
                source,
                start,
                source.len(),
                [format!("closing {c} for string literal")],
            ));
        };

        out.map.anchor(out.text.len(), start);
        let _ = write!(out.text, "#{}", out.literals.len());
        out.map.anchor(out.text.len(), end);
        out.literals.push(value);
    }

    Ok(out)
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}
