//! Variable preprocessing for pipeline source text.
//!
//! Performs `$VAR` / `${VAR:default}` text substitution before parsing.
//! Quoted string literals are copied verbatim, and so is every `$` that is
//! not followed by an identifier, `{` or `$`: the context references `$` and
//! `$.path` pass through untouched. Use `$$` for a literal `$`.

use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
mod tests;

/// Error during variable preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessError {
    /// Byte offset in the original source where the error occurred.
    pub position: usize,
    pub message: String,
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "preprocess error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for PreprocessError {}

/// Substitute variables in pipeline source.
///
/// - `$IDENT` is replaced by its value in `vars`; undefined is an error.
/// - `${IDENT}` is the same, braced for disambiguation.
/// - `${IDENT:default}` falls back to `default` when undefined.
/// - `$$` produces a literal `$`.
///
/// IDENT matches `[A-Za-z_][A-Za-z0-9_]*`. An unterminated `${...` is an
/// error.
pub fn preprocess_vars(
    source: &str,
    vars: &HashMap<String, String>,
) -> Result<String, PreprocessError> {
    Substitutor {
        vars,
        env_fallback: false,
    }
    .run(source)
}

/// Like [`preprocess_vars`], but falls back to environment variables for
/// names missing from `vars`. Used by `rivulet explain`, where variables may
/// come from the shell rather than a config file.
pub fn preprocess_vars_with_env(
    source: &str,
    vars: &HashMap<String, String>,
) -> Result<String, PreprocessError> {
    Substitutor {
        vars,
        env_fallback: true,
    }
    .run(source)
}

struct Substitutor<'a> {
    vars: &'a HashMap<String, String>,
    env_fallback: bool,
}

impl Substitutor<'_> {
    fn run(&self, source: &str) -> Result<String, PreprocessError> {
        let bytes = source.as_bytes();
        let len = bytes.len();
        let mut out = String::with_capacity(len);
        let mut i = 0;
        // Start of the pending verbatim run, flushed before each substitution.
        let mut copied = 0;

        while i < len {
            match bytes[i] {
                quote @ (b'"' | b'\'') => {
                    i += 1;
                    while i < len && bytes[i] != quote {
                        i += if bytes[i] == b'\\' { 2 } else { 1 };
                    }
                    i = (i + 1).min(len);
                }
                b'$' => {
                    let dollar = i;
                    match bytes.get(i + 1) {
                        Some(b'$') => {
                            out.push_str(&source[copied..dollar]);
                            out.push('$');
                            i += 2;
                            copied = i;
                        }
                        Some(b'{') => {
                            let (value, next) = self.braced(source, dollar)?;
                            out.push_str(&source[copied..dollar]);
                            out.push_str(&value);
                            i = next;
                            copied = i;
                        }
                        Some(&b) if is_ident_start(b) => {
                            let end = ident_end(bytes, i + 1);
                            let value = self.resolve(&source[i + 1..end], None, dollar)?;
                            out.push_str(&source[copied..dollar]);
                            out.push_str(&value);
                            i = end;
                            copied = i;
                        }
                        _ => i += 1,
                    }
                }
                _ => i += 1,
            }
        }
        out.push_str(&source[copied.min(len)..]);
        Ok(out)
    }

    /// `${IDENT}` or `${IDENT:default}` starting at `dollar`; returns the
    /// substituted value and the offset just past the closing `}`.
    fn braced(&self, source: &str, dollar: usize) -> Result<(String, usize), PreprocessError> {
        let bytes = source.as_bytes();
        let start = dollar + 2;
        if !bytes.get(start).copied().is_some_and(is_ident_start) {
            return Err(PreprocessError {
                position: dollar,
                message: "expected variable name after ${".to_string(),
            });
        }
        let end = ident_end(bytes, start);
        let ident = &source[start..end];

        let mut i = end;
        let default = if bytes.get(i) == Some(&b':') {
            let default_start = i + 1;
            i = source[default_start..]
                .find('}')
                .map_or(bytes.len(), |p| default_start + p);
            Some(&source[default_start..i])
        } else {
            None
        };
        if bytes.get(i) != Some(&b'}') {
            return Err(PreprocessError {
                position: dollar,
                message: format!("unterminated variable reference '${{{ident}': missing '}}'"),
            });
        }
        let value = self.resolve(ident, default, dollar)?;
        Ok((value, i + 1))
    }

    fn resolve(
        &self,
        ident: &str,
        default: Option<&str>,
        position: usize,
    ) -> Result<String, PreprocessError> {
        if let Some(value) = self.vars.get(ident) {
            return Ok(value.clone());
        }
        if let Some(default) = default {
            return Ok(default.to_string());
        }
        if self.env_fallback {
            return std::env::var(ident).map_err(|_| PreprocessError {
                position,
                message: format!("undefined variable '{ident}' (not in --var or environment)"),
            });
        }
        Err(PreprocessError {
            position,
            message: format!("undefined variable '{ident}'"),
        })
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn ident_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}
