use winnow::ascii::multispace0;
use winnow::combinator::{cut_err, fail};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

pub fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    // First character must be alphabetic or underscore (not digit).
    if !input.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

/// Dotted identifier used as a method name, e.g. `Math.max`.
pub fn ident_path<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    let start = *input;
    ident.parse_next(input)?;
    while input.starts_with('.') {
        let checkpoint = *input;
        *input = &input[1..];
        if ident.parse_next(input).is_err() {
            *input = checkpoint;
            break;
        }
    }
    Ok(&start[..start.len() - input.len()])
}

/// One segment of a `@.a.b` / `$.a.b` path: letters, digits, underscores.
pub fn path_segment<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '^')
        .parse_next(input)
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

pub fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.parse_next(input).map(|_| ())
}

// ---------------------------------------------------------------------------
// Keyword matching with word boundary
// ---------------------------------------------------------------------------

/// Match an exact keyword string, ensuring it's not a prefix of a longer
/// identifier (i.e. the next character is not alphanumeric or `_`).
pub fn kw<'a>(keyword: &'static str) -> impl FnMut(&mut &'a str) -> ModalResult<()> {
    move |input: &mut &'a str| {
        let saved = *input;
        literal(keyword).parse_next(input)?;
        if input.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            *input = saved;
            return Err(ErrMode::Backtrack(ContextError::new()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Number literal
// ---------------------------------------------------------------------------

/// Parse a number literal: a run of digits and dots that forms a valid
/// decimal (`12`, `1.5`, `.5`).
pub fn number_literal(input: &mut &str) -> ModalResult<f64> {
    let saved = *input;
    let text = take_while(1.., |c: char| c.is_ascii_digit() || c == '.').parse_next(input)?;
    match text.parse::<f64>() {
        Ok(v) => Ok(v),
        Err(_) => {
            *input = saved;
            reject(input, "number")
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

/// Fail without backtracking, recording what was expected at this point.
pub fn reject<T>(input: &mut &str, what: &'static str) -> ModalResult<T> {
    cut_err(fail).context(expected(what)).parse_next(input)
}
