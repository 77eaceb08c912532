use winnow::combinator::cut_err;
use winnow::error::StrContext;
use winnow::prelude::*;
use winnow::token::literal;

use crate::error::{Fault, ParseError};
use crate::literals::extract_literals;
use crate::logic::{Logic, VarRef};
use crate::parse_utils::{
    expected, ident_path, kw, number_literal, path_segment, reject, ws,
};
use crate::prepass;

#[cfg(test)]
mod tests;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Compile one expression into a logic tree.
///
/// Runs literal extraction and the structural prepass first, so `"..."`,
/// `{k: v}` and `[a, b]` are all accepted. Errors carry source positions.
pub fn compile_expr(source: &str) -> Result<Logic, ParseError> {
    let extracted = extract_literals(source)?;
    let mut literals = extracted.literals;
    compile_fragment(&extracted.text, &mut literals)
        .map_err(|fault| fault.map(&extracted.map).into_error(source))
}

/// Prepass and parse tokenized text. Fault offsets are relative to `text`.
pub(crate) fn compile_fragment(text: &str, literals: &mut Vec<String>) -> Result<Logic, Fault> {
    let (rewritten, map) = prepass::rewrite(text, literals)?;
    parse_tokenized(&rewritten, literals).map_err(|fault| fault.map(&map))
}

fn parse_tokenized(text: &str, literals: &[String]) -> Result<Logic, Fault> {
    let mut expression = |input: &mut &str| -> ModalResult<Logic> {
        ws(input)?;
        let logic = tier(input, literals, 0)?;
        ws(input)?;
        Ok(logic)
    };
    expression.parse(text).map_err(|e| {
        let mut wanted: Vec<String> = e
            .inner()
            .context()
            .filter_map(|c| match c {
                StrContext::Expected(v) => Some(v.to_string()),
                _ => None,
            })
            .collect();
        if wanted.is_empty() {
            wanted.push("operator or end of expression".to_string());
        }
        Fault::new(e.offset(), wanted)
    })
}

// ---------------------------------------------------------------------------
// Binary operators, lowest precedence first
// ---------------------------------------------------------------------------

const TIERS: &[&[(&str, &str)]] = &[
    &[("||", "or")],
    &[("&&", "and")],
    &[("===", "eeq"), ("!==", "neeq"), ("==", "eq"), ("!=", "ne")],
    &[("<=", "lte"), (">=", "gte"), ("<", "lt"), (">", "gt")],
    &[("+", "add"), ("-", "sub")],
    &[("%", "mod")],
    &[("*", "mul"), ("/", "div")],
    &[("**", "exp")],
];

/// Longest operator symbol at the start of `input`, across all tiers. A
/// shorter symbol is never matched where a longer one starts (`*` in `**`,
/// `<` in `<=`, `==` in `===`).
fn operator_at(input: &str) -> Option<&'static str> {
    TIERS
        .iter()
        .flat_map(|tier| tier.iter())
        .map(|(symbol, _)| *symbol)
        .filter(|symbol| input.starts_with(symbol))
        .max_by_key(|symbol| symbol.len())
}

/// `tier(n) = tier(n+1) { op(n) tier(n+1) }`, left-associative.
fn tier(input: &mut &str, literals: &[String], level: usize) -> ModalResult<Logic> {
    let Some(operators) = TIERS.get(level) else {
        return unary(input, literals);
    };
    let mut left = tier(input, literals, level + 1)?;
    loop {
        let checkpoint = *input;
        ws(input)?;
        let call = operator_at(input)
            .and_then(|symbol| operators.iter().find(|(s, _)| *s == symbol));
        let Some(&(symbol, name)) = call else {
            *input = checkpoint;
            break;
        };
        *input = &input[symbol.len()..];
        ws(input)?;
        let right = cut_err(|i: &mut &str| tier(i, literals, level + 1))
            .context(expected("operand"))
            .parse_next(input)?;
        left = Logic::call(name, vec![left, right]);
    }
    Ok(left)
}

/// `unary = "!" unary | postfix`
fn unary(input: &mut &str, literals: &[String]) -> ModalResult<Logic> {
    if input.starts_with('!') && !input.starts_with("!=") {
        *input = &input[1..];
        ws(input)?;
        let operand = cut_err(|i: &mut &str| unary(i, literals))
            .context(expected("operand after '!'"))
            .parse_next(input)?;
        return Ok(Logic::call("not", vec![operand]));
    }
    postfix(input, literals)
}

/// `postfix = primary { "." segment }` where the primary is a call or a
/// parenthesised expression; `f(x).a` reads as `get(f(x), "a")`.
fn postfix(input: &mut &str, literals: &[String]) -> ModalResult<Logic> {
    let (mut logic, chainable) = primary(input, literals)?;
    if !chainable {
        return Ok(logic);
    }
    while input.starts_with('.') {
        *input = &input[1..];
        let segment = cut_err(path_segment)
            .context(expected("property name after '.'"))
            .parse_next(input)?;
        logic = Logic::call("get", vec![logic, Logic::Str(segment.to_string())]);
    }
    Ok(logic)
}

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

fn primary(input: &mut &str, literals: &[String]) -> ModalResult<(Logic, bool)> {
    ws(input)?;
    match input.chars().next() {
        Some('(') => {
            *input = &input[1..];
            ws(input)?;
            let inner = cut_err(|i: &mut &str| tier(i, literals, 0))
                .context(expected("expression"))
                .parse_next(input)?;
            ws(input)?;
            cut_err(literal(")"))
                .context(expected("')'"))
                .parse_next(input)?;
            Ok((inner, true))
        }
        Some(c) if c.is_ascii_digit() || c == '.' => {
            number_literal.parse_next(input).map(|n| (Logic::Number(n), false))
        }
        Some('#') => placeholder(input, literals).map(|s| (Logic::Str(s), false)),
        Some('@') => variable(input).map(|v| (v, false)),
        Some('$') => {
            *input = &input[1..];
            let path = segments(input, false)?;
            Ok((Logic::Context(path), false))
        }
        Some(c) if c.is_ascii_alphabetic() || c == '_' => word(input, literals),
        _ => reject(input, "expression"),
    }
}

/// `#N` reference into the literal table.
fn placeholder(input: &mut &str, literals: &[String]) -> ModalResult<String> {
    let start = *input;
    *input = &input[1..];
    let digits = cut_err(winnow::token::take_while(1.., |c: char| c.is_ascii_digit()))
        .context(expected("string literal"))
        .parse_next(input)?;
    match digits.parse::<usize>().ok().and_then(|n| literals.get(n)) {
        Some(s) => Ok(s.clone()),
        None => {
            *input = start;
            reject(input, "string literal")
        }
    }
}

/// `@`, `@group`, `@.a.b`, `@.^.a`
fn variable(input: &mut &str) -> ModalResult<Logic> {
    *input = &input[1..];
    if kw("group").parse_next(input).is_ok() {
        return Ok(Logic::Group);
    }
    let path = segments(input, true)?;
    let ascend = path.iter().take_while(|s| s.as_str() == "^").count();
    Ok(Logic::Var(VarRef {
        ascend,
        path: path[ascend..].to_vec(),
    }))
}

/// `{ "." segment }`; `^` segments are only valid before named ones.
fn segments(input: &mut &str, allow_ascend: bool) -> ModalResult<Vec<String>> {
    let mut path: Vec<String> = Vec::new();
    while input.starts_with('.') {
        *input = &input[1..];
        let checkpoint = *input;
        let segment = cut_err(path_segment)
            .context(expected("path segment after '.'"))
            .parse_next(input)?;
        let ascend = segment == "^";
        let misplaced = ascend && path.last().is_some_and(|s| s != "^");
        if segment.contains('^') && (!ascend || !allow_ascend || misplaced) {
            *input = checkpoint;
            return reject(input, "path segment after '.'");
        }
        path.push(segment.to_string());
    }
    Ok(path)
}

/// Call (`name(...)`, `Math.max(...)`) or keyword literal.
fn word(input: &mut &str, literals: &[String]) -> ModalResult<(Logic, bool)> {
    let start = *input;
    let name = ident_path.parse_next(input)?;
    if input.starts_with('(') {
        *input = &input[1..];
        let args = call_args(input, literals)?;
        return Ok((Logic::call(name, args), true));
    }
    let logic = match name {
        "true" => Logic::Bool(true),
        "false" => Logic::Bool(false),
        "null" => Logic::Null,
        "undefined" => Logic::Undefined,
        "Infinity" => Logic::Number(f64::INFINITY),
        _ => {
            *input = start;
            return reject(input, "function call or literal");
        }
    };
    Ok((logic, false))
}

fn call_args(input: &mut &str, literals: &[String]) -> ModalResult<Vec<Logic>> {
    ws(input)?;
    if input.starts_with(')') {
        *input = &input[1..];
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    loop {
        ws(input)?;
        let arg = cut_err(|i: &mut &str| tier(i, literals, 0))
            .context(expected("argument"))
            .parse_next(input)?;
        args.push(arg);
        ws(input)?;
        if input.starts_with(',') {
            *input = &input[1..];
            continue;
        }
        cut_err(literal(")"))
            .context(expected("',' or ')'"))
            .parse_next(input)?;
        return Ok(args);
    }
}
