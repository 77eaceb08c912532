//! Relational joins over arrays of JSON rows.
//!
//! Both joins fold N tables left to right with N-1 clauses. Matching rows
//! are merged shallowly, right over left.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EvalError;
use crate::value::lookup;


#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JoinError {
    #[error("{tables} tables need {} join clauses, got {clauses}", .tables.saturating_sub(1))]
    Arity { tables: usize, clauses: usize },
    #[error("join predicate failed: {0}")]
    Predicate(EvalError),
}

impl From<JoinError> for EvalError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Predicate(inner) => inner,
            other => EvalError::Join(other.to_string()),
        }
    }
}

pub type JoinPredicate<'a> = Box<dyn Fn(&Value, &Value) -> Result<bool, EvalError> + 'a>;

/// Number of tables in a flat `t1, ..., tn, c1, ..., cn-1` argument list.
pub fn table_count(args: usize) -> usize {
    args.div_ceil(2)
}

pub fn check_arity(tables: usize, clauses: usize) -> Result<(), JoinError> {
    if tables == 0 || clauses + 1 != tables {
        return Err(JoinError::Arity { tables, clauses });
    }
    Ok(())
}

/// Merge `right` over `left`. A non-object left side yields the right row.
pub fn merge_rows(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            merged.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        _ => right.clone(),
    }
}

/// For every accumulated row and every row of the next table, keep the
/// merged pair when the clause accepts it.
pub fn nested_loop_join(
    tables: &[Vec<Value>],
    predicates: &[JoinPredicate<'_>],
) -> Result<Vec<Value>, JoinError> {
    check_arity(tables.len(), predicates.len())?;
    let mut rows = tables[0].clone();
    for (table, predicate) in tables[1..].iter().zip(predicates) {
        let mut next = Vec::new();
        for left in &rows {
            for right in table {
                if predicate(left, right).map_err(JoinError::Predicate)? {
                    next.push(merge_rows(left, right));
                }
            }
        }
        rows = next;
    }
    Ok(rows)
}

/// Equality join on `(left field, right field)` pairs. Each step indexes
/// the next table by its right field, then looks up every accumulated
/// row's left field. Fields are dotted paths; rows missing the field never
/// match. Keys compare like `===`: `1` matches `1.0` but not `"1"`, and
/// objects match regardless of field order.
pub fn hash_join(tables: &[Vec<Value>], keys: &[(String, String)]) -> Result<Vec<Value>, JoinError> {
    check_arity(tables.len(), keys.len())?;
    let mut rows = tables[0].clone();
    for (table, (left_key, right_key)) in tables[1..].iter().zip(keys) {
        let right_path: Vec<&str> = right_key.split('.').collect();
        let left_path: Vec<&str> = left_key.split('.').collect();

        let mut index: HashMap<String, Vec<&Value>> = HashMap::new();
        for row in table {
            if let Some(key) = join_key(row, &right_path) {
                index.entry(key).or_default().push(row);
            }
        }

        let mut next = Vec::new();
        for left in &rows {
            let Some(matches) = join_key(left, &left_path).and_then(|k| index.get(&k)) else {
                continue;
            };
            next.extend(matches.iter().map(|right| merge_rows(left, right)));
        }
        rows = next;
    }
    Ok(rows)
}

fn join_key(row: &Value, path: &[&str]) -> Option<String> {
    lookup(row, path).filter(|v| !v.is_null()).map(|v| {
        let mut key = String::new();
        encode_key(v, &mut key);
        key
    })
}

/// Two values encode alike exactly when `strict_eq` holds for them.
fn encode_key(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('z'),
        Value::Bool(b) => out.push(if *b { 't' } else { 'f' }),
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or(f64::NAN) + 0.0;
            out.push_str(&format!("n{n};"));
        }
        Value::String(s) => encode_text(s, out),
        Value::Array(items) => {
            out.push('[');
            items.iter().for_each(|item| encode_key(item, out));
            out.push(']');
        }
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (name, field) in fields {
                encode_text(name, out);
                encode_key(field, out);
            }
            out.push('}');
        }
    }
}

fn encode_text(text: &str, out: &mut String) {
    out.push_str(&format!("s{}:", text.len()));
    out.push_str(text);
}
