//! Loose-typing helpers over `serde_json::Value`.
//!
//! Expressions follow JavaScript-flavoured coercion: `null` is falsy and
//! reads as `0` in arithmetic, numeric strings compare equal to numbers under
//! `==`, and `+` concatenates when either side is a string.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) if items.is_empty() => 0.0,
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Numeric value of `value` when it is a number or a numeric string.
pub fn as_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Convert a computed float back into JSON. Integral values become integers;
/// infinities saturate to the largest finite float and NaN becomes `null`.
pub fn num(f: f64) -> Value {
    if f.is_nan() {
        return Value::Null;
    }
    let f = f.clamp(f64::MIN, f64::MAX);
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Value::from(f as i64);
    }
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Text form used for string concatenation, object keys and CSV cells.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// `==`: numbers, numeric strings and booleans compare by numeric value.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            a == b
        }
        _ => to_number(a) == to_number(b),
    }
}

/// `===`: same type and value; `1` and `1.0` are the same number.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| strict_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| strict_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Ordering for `<` and friends: strings compare lexically with each other,
/// everything else numerically. `None` when either side is NaN.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

/// Walk `path` into `value`; objects by key, arrays by index. Missing
/// segments yield `null`.
pub fn lookup<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(value, |cur, segment| {
        let segment = segment.as_ref();
        match cur {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

pub fn lookup_or_null<S: AsRef<str>>(value: &Value, path: &[S]) -> Value {
    lookup(value, path).cloned().unwrap_or(Value::Null)
}

/// `{accumulator, current}` pair seen by reducer expressions.
pub fn reducer_pair(accumulator: Value, current: Value) -> Value {
    let mut map = Map::with_capacity(2);
    map.insert("accumulator".to_string(), accumulator);
    map.insert("current".to_string(), current);
    Value::Object(map)
}
