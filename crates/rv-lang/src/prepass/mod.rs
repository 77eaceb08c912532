//! Structural prepass: object and list literal sugar.
//!
//! Runs on tokenized text (quoted literals already replaced by `#N`) and
//! rewrites `{k: v, ...}` into `obj(#K, v, ...)` and `[a, b]` into
//! `list(a, b)` so the expression grammar only ever sees calls. Bare object
//! keys are appended to the literal table.

use crate::error::{Fault, ParseError};
use crate::literals::OffsetMap;


/// Rewrite object/list literals in `text` into constructor calls.
///
/// Errors are reported against `text` itself.
pub fn rewrite_structures(
    text: &str,
    literals: &mut Vec<String>,
) -> Result<(String, OffsetMap), ParseError> {
    rewrite(text, literals).map_err(|fault| fault.into_error(text))
}

enum Frame {
    Object { parens: usize },
    List { parens: usize },
}

impl Frame {
    fn parens(&mut self) -> &mut usize {
        match self {
            Frame::Object { parens } | Frame::List { parens } => parens,
        }
    }
}

pub(crate) fn rewrite(text: &str, literals: &mut Vec<String>) -> Result<(String, OffsetMap), Fault> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut map = OffsetMap::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0;

    while let Some(c) = text[i..].chars().next() {
        match c {
            '{' => {
                splice(&mut out, &mut map, i, i + 1, "obj(");
                stack.push(Frame::Object { parens: 0 });
                i = object_key(text, i + 1, literals, &mut out, &mut map)?;
                continue;
            }
            '[' => {
                splice(&mut out, &mut map, i, i + 1, "list(");
                stack.push(Frame::List { parens: 0 });
            }
            '}' if matches!(stack.last(), Some(Frame::Object { parens: 0 })) => {
                stack.pop();
                if out.ends_with(',') {
                    out.pop();
                }
                splice(&mut out, &mut map, i, i + 1, ")");
            }
            ']' if matches!(stack.last(), Some(Frame::List { parens: 0 })) => {
                stack.pop();
                splice(&mut out, &mut map, i, i + 1, ")");
            }
            '}' | ']' => return Err(unbalanced(i, stack.last())),
            '(' => {
                if let Some(frame) = stack.last_mut() {
                    *frame.parens() += 1;
                }
                out.push(c);
            }
            ')' => {
                if matches!(
                    stack.last(),
                    Some(Frame::Object { parens: 0 } | Frame::List { parens: 0 })
                ) {
                    return Err(unbalanced(i, stack.last()));
                }
                if let Some(frame) = stack.last_mut() {
                    *frame.parens() -= 1;
                }
                out.push(c);
            }
            ',' if matches!(stack.last(), Some(Frame::Object { parens: 0 })) => {
                out.push(',');
                i = object_key(text, i + 1, literals, &mut out, &mut map)?;
                continue;
            }
            _ => out.push(c),
        }
        i += c.len_utf8();
    }

    match stack.last() {
        Some(Frame::Object { .. }) => Err(Fault::new(text.len(), ["'}'"])),
        Some(Frame::List { .. }) => Err(Fault::new(text.len(), ["']'"])),
        None => Ok((out, map)),
    }
}

/// Parse an object key starting at `from` (after `{` or `,`) through its
/// `:`; emits `#K,`. Returns the offset just past the colon, or the offset of
/// the closing `}` for empty objects and trailing commas.
fn object_key(
    text: &str,
    from: usize,
    literals: &mut Vec<String>,
    out: &mut String,
    map: &mut OffsetMap,
) -> Result<usize, Fault> {
    let start = skip_ws(text, from);
    if text[start..].starts_with('}') {
        return Ok(start);
    }

    let len = text[start..]
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '#'))
        .unwrap_or(text.len() - start);
    let key = &text[start..start + len];
    if key.is_empty() {
        return Err(Fault::new(start, ["object key"]));
    }

    let colon = skip_ws(text, start + len);
    if !text[colon..].starts_with(':') {
        return Err(Fault::new(colon, ["':' after object key"]));
    }
    let value = skip_ws(text, colon + 1);
    if value == text.len() || text[value..].starts_with([',', '}']) {
        return Err(Fault::new(value, ["object value"]));
    }

    let placeholder = if is_placeholder(key) {
        key.to_string()
    } else {
        literals.push(key.to_string());
        format!("#{}", literals.len() - 1)
    };
    splice(out, map, start, colon + 1, &format!("{placeholder},"));
    Ok(colon + 1)
}

fn splice(out: &mut String, map: &mut OffsetMap, from: usize, to: usize, replacement: &str) {
    map.anchor(out.len(), from);
    out.push_str(replacement);
    map.anchor(out.len(), to);
}

fn is_placeholder(key: &str) -> bool {
    key.strip_prefix('#')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn skip_ws(text: &str, from: usize) -> usize {
    text[from..]
        .find(|c: char| !c.is_whitespace())
        .map_or(text.len(), |n| from + n)
}

fn unbalanced(at: usize, open: Option<&Frame>) -> Fault {
    match open {
        Some(Frame::Object { parens: 0 }) => Fault::new(at, ["'}'"]),
        Some(Frame::List { parens: 0 }) => Fault::new(at, ["']'"]),
        Some(_) => Fault::new(at, ["')'"]),
        None => Fault::new(at, ["expression"]),
    }
}
