use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{Engine, EvalResult, LazyArgs, Method};
use crate::bins::{BinReducer, BinStats, Sample};
use crate::error::EvalError;
use crate::joins::{JoinPredicate, check_arity, hash_join, nested_loop_join, table_count};
use crate::value::{
    as_numeric, compare, loose_eq, lookup, num, reducer_pair, strict_eq, to_number, to_text,
    truthy,
};

static NULL: Value = Value::Null;

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&NULL)
}

fn number(args: &[Value], i: usize) -> f64 {
    to_number(arg(args, i))
}

pub(super) fn install(engine: &mut Engine) {
    install_arithmetic(engine);
    install_logic(engine);
    install_data(engine);
    install_math(engine);
    install_bins(engine);
    install_joins(engine);
}

// ---------------------------------------------------------------------------
// Arithmetic & comparison
// ---------------------------------------------------------------------------

fn install_arithmetic(engine: &mut Engine) {
    engine
        .add_pure("add", |args| {
            if args.iter().any(Value::is_string) {
                return Ok(Value::String(args.iter().map(to_text).collect()));
            }
            Ok(num(args.iter().map(to_number).sum()))
        })
        .add_pure("sub", |args| match args {
            [] => Ok(num(0.0)),
            [only] => Ok(num(-to_number(only))),
            [a, b, ..] => Ok(num(to_number(a) - to_number(b))),
        })
        .add_pure("mul", |args| Ok(num(args.iter().map(to_number).product())))
        .add_pure("div", |args| Ok(num(number(args, 0) / number(args, 1))))
        .add_pure("mod", |args| Ok(num(number(args, 0) % number(args, 1))))
        .add_pure("exp", |args| Ok(num(number(args, 0).powf(number(args, 1)))));

    engine
        .add_pure("lt", ordering(|o| o == Ordering::Less))
        .add_pure("lte", ordering(|o| o != Ordering::Greater))
        .add_pure("gt", ordering(|o| o == Ordering::Greater))
        .add_pure("gte", ordering(|o| o != Ordering::Less))
        .add_pure("eq", |args| Ok(Value::Bool(loose_eq(arg(args, 0), arg(args, 1)))))
        .add_pure("ne", |args| Ok(Value::Bool(!loose_eq(arg(args, 0), arg(args, 1)))))
        .add_pure("eeq", |args| Ok(Value::Bool(strict_eq(arg(args, 0), arg(args, 1)))))
        .add_pure("neeq", |args| Ok(Value::Bool(!strict_eq(arg(args, 0), arg(args, 1)))));
}

/// Comparison against `compare`; NaN operands compare false both ways.
fn ordering(accept: fn(Ordering) -> bool) -> impl Fn(&[Value]) -> EvalResult + Send + Sync {
    move |args: &[Value]| Ok(Value::Bool(compare(arg(args, 0), arg(args, 1)).is_some_and(accept)))
}

// ---------------------------------------------------------------------------
// Short-circuit logic
// ---------------------------------------------------------------------------

fn install_logic(engine: &mut Engine) {
    engine
        .add_pure("not", |args| Ok(Value::Bool(!truthy(arg(args, 0)))))
        .add_lazy("and", |args| short_circuit(args, false))
        .add_lazy("or", |args| short_circuit(args, true))
        .add_lazy("if", |args| {
            let mut i = 0;
            while i + 1 < args.len() {
                if truthy(&args.eval(i)?) {
                    return args.eval(i + 1);
                }
                i += 2;
            }
            args.eval(i)
        });
}

/// Returns the first operand whose truthiness equals `stop_on`, or the last.
fn short_circuit(args: &LazyArgs<'_>, stop_on: bool) -> EvalResult {
    let mut last = Value::Null;
    for i in 0..args.len() {
        last = args.eval(i)?;
        if truthy(&last) == stop_on {
            break;
        }
    }
    Ok(last)
}

// ---------------------------------------------------------------------------
// Data access & construction
// ---------------------------------------------------------------------------

fn install_data(engine: &mut Engine) {
    engine
        .add_pure("get", |args| {
            let path: Vec<String> = match arg(args, 1) {
                Value::String(s) if s.is_empty() => Vec::new(),
                Value::String(s) => s.split('.').map(str::to_string).collect(),
                Value::Array(segments) => segments.iter().map(to_text).collect(),
                other => vec![to_text(other)],
            };
            Ok(lookup(arg(args, 0), &path)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| arg(args, 2).clone()))
        })
        .add_pure("obj", |args| {
            let map = args
                .chunks(2)
                .map(|pair| (to_text(&pair[0]), pair.get(1).cloned().unwrap_or(Value::Null)))
                .collect::<Map<_, _>>();
            Ok(Value::Object(map))
        })
        .add_pure("list", |args| Ok(Value::Array(args.to_vec())))
        .add_pure("merge", |args| {
            let mut out = Vec::new();
            for item in args {
                match item {
                    Value::Array(items) => out.extend(items.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        })
        .add_pure("from", |args| {
            let mut map = Map::with_capacity(1);
            map.insert(to_text(arg(args, 0)), arg(args, 1).clone());
            Ok(Value::Object(map))
        })
        .add_pure("combine", |args| {
            let mut map = Map::new();
            for side in args.iter().take(2) {
                if let Value::Object(fields) = side {
                    map.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Ok(Value::Object(map))
        })
        .add_pure("overwrite", |args| {
            let mut map = match arg(args, 0) {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            map.insert(to_text(arg(args, 1)), arg(args, 2).clone());
            Ok(Value::Object(map))
        })
        .add_pure("snakeCase", |args| Ok(Value::String(snake_case(&to_text(arg(args, 0))))))
        .add_pure("toPairs", |args| {
            let pair = |k: String, v: &Value| Value::Array(vec![Value::String(k), v.clone()]);
            Ok(Value::Array(match arg(args, 0) {
                Value::Object(map) => map.iter().map(|(k, v)| pair(k.clone(), v)).collect(),
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| pair(i.to_string(), v))
                    .collect(),
                _ => Vec::new(),
            }))
        })
        .add_pure("fromPairs", |args| {
            let Value::Array(pairs) = arg(args, 0) else {
                return Ok(Value::Object(Map::new()));
            };
            let map = pairs
                .iter()
                .filter_map(|pair| match pair {
                    Value::Array(kv) if !kv.is_empty() => Some((
                        to_text(&kv[0]),
                        kv.get(1).cloned().unwrap_or(Value::Null),
                    )),
                    _ => None,
                })
                .collect::<Map<_, _>>();
            Ok(Value::Object(map))
        })
        .add_pure("split", |args| {
            let text = to_text(arg(args, 0));
            let sep = to_text(arg(args, 1));
            let parts: Vec<Value> = if sep.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(sep.as_str()).map(|s| Value::String(s.to_string())).collect()
            };
            Ok(Value::Array(parts))
        })
        .add_pure("startsWith", |args| {
            Ok(Value::Bool(
                to_text(arg(args, 0)).starts_with(to_text(arg(args, 1)).as_str()),
            ))
        })
        .add_pure("stringify", |args| {
            serde_json::to_string(arg(args, 0))
                .map(Value::String)
                .map_err(|e| EvalError::method("stringify", e.to_string()))
        })
        .add_pure("first", |args| {
            Ok(match arg(args, 0) {
                Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                Value::String(s) => s.chars().next().map_or(Value::Null, |c| c.to_string().into()),
                _ => Value::Null,
            })
        })
        .add_pure("last", |args| {
            Ok(match arg(args, 0) {
                Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
                Value::String(s) => s.chars().last().map_or(Value::Null, |c| c.to_string().into()),
                _ => Value::Null,
            })
        })
        .add_pure("length", |args| {
            Ok(match arg(args, 0) {
                Value::Array(items) => Value::from(items.len()),
                Value::String(s) => Value::from(s.chars().count()),
                Value::Object(map) => Value::from(map.len()),
                _ => Value::from(0),
            })
        })
        .add_pure("csvify", |args| {
            let item = arg(args, 0);
            let cells: Vec<String> = to_text(arg(args, 1))
                .split(',')
                .map(|attr| {
                    let cell = match item.get(attr) {
                        None | Some(Value::Null) => String::new(),
                        Some(v) => to_text(v),
                    };
                    format!("\"{}\"", cell.replace('"', "\"\""))
                })
                .collect();
            Ok(Value::String(cells.join(",")))
        })
        .add_pure("xy", |args| {
            let mut map = Map::with_capacity(2);
            map.insert("x".into(), arg(args, 0).clone());
            map.insert("y".into(), arg(args, 1).clone());
            Ok(Value::Object(map))
        })
        .add_lazy("each", |args| {
            Ok(match args.eval(0)? {
                Value::Object(map) => Value::Object(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), args.eval_in(1, v)?)))
                        .collect::<Result<Map<_, _>, EvalError>>()?,
                ),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|v| args.eval_in(1, v))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                other => other,
            })
        })
        .add_lazy("groupBy", |args| {
            // groupBy(accumulator, current, key, transform?, default?)
            let mut acc = match args.eval(0)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let current = args.eval(1)?;
            let key = to_text(&args.eval_in(2, &current)?);
            let entry = match acc.remove(&key) {
                Some(existing) => existing,
                None if args.len() > 4 => args.eval(4)?,
                None => Value::Array(Vec::new()),
            };
            let entry = if args.len() > 3 {
                args.eval_in(3, &reducer_pair(entry, current))?
            } else {
                match entry {
                    Value::Array(mut items) => {
                        items.push(current);
                        Value::Array(items)
                    }
                    other => {
                        return Err(EvalError::method(
                            "groupBy",
                            format!("group '{key}' holds {other}, expected an array"),
                        ));
                    }
                }
            };
            acc.insert(key, entry);
            Ok(Value::Object(acc))
        });
}

/// Lowercase words joined by `_`. Words break at non-alphanumerics, at a
/// lower-to-upper step, between letters and digits, and before the capital
/// that starts a word after an acronym (`XMLHttp` is `xml_http`).
fn snake_case(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            continue;
        }
        // a non-empty word means the previous char was part of it
        let boundary = !word.is_empty() && {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            (prev.is_lowercase() && c.is_uppercase())
                || prev.is_alphabetic() != c.is_alphabetic()
                || (prev.is_uppercase() && c.is_uppercase() && next_lower)
        };
        if boundary {
            words.push(std::mem::take(&mut word));
        }
        word.extend(c.to_lowercase());
    }
    if !word.is_empty() {
        words.push(word);
    }
    words.join("_")
}

// ---------------------------------------------------------------------------
// Math module
// ---------------------------------------------------------------------------

fn install_math(engine: &mut Engine) {
    engine
        .add_pure("Math.min", |args| {
            Ok(num(args.iter().map(to_number).fold(f64::INFINITY, f64::min)))
        })
        .add_pure("Math.max", |args| {
            Ok(num(args.iter().map(to_number).fold(f64::NEG_INFINITY, f64::max)))
        })
        .add_pure("Math.abs", |args| Ok(num(number(args, 0).abs())))
        .add_pure("Math.floor", |args| Ok(num(number(args, 0).floor())))
        .add_pure("Math.ceil", |args| Ok(num(number(args, 0).ceil())))
        .add_pure("Math.round", |args| Ok(num((number(args, 0) + 0.5).floor())))
        .add_pure("Math.sqrt", |args| Ok(num(number(args, 0).sqrt())));
}

// ---------------------------------------------------------------------------
// Binning
// ---------------------------------------------------------------------------

fn install_bins(engine: &mut Engine) {
    engine
        .add_method("dynamicBin", bin_method("dynamicBin", BinReducer::numeric()))
        .add_method("dynamicTimeBin", bin_method("dynamicTimeBin", BinReducer::time()))
        .add_pure("aggregate", |args| {
            let mut stats = BinStats::from_value(arg(args, 0)).unwrap_or_default();
            stats.push(number(args, 1));
            Ok(stats.to_value())
        })
        .add_pure("processBin", |args| {
            BinStats::from_value(arg(args, 0))
                .map(|stats| stats.summary())
                .ok_or_else(|| EvalError::method("processBin", "expected a bin with a count"))
        })
        .add_pure("processBins", |args| {
            let Value::Object(bins) = arg(args, 0) else {
                return Err(EvalError::method("processBins", "expected an object of bins"));
            };
            bins.iter()
                .map(|(key, bin)| {
                    BinStats::from_value(bin)
                        .map(|stats| (key.clone(), stats.summary()))
                        .ok_or_else(|| {
                            EvalError::method("processBins", format!("bin '{key}' has no count"))
                        })
                })
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object)
        });
}

/// `name(aggregate, {x, y}, limit?)` backed by a shared reducer.
pub(super) fn bin_method(name: &str, reducer: BinReducer) -> Method {
    let name = name.to_string();
    let reducer = Arc::new(reducer);
    Method::Pure(Arc::new(move |args: &[Value]| {
        let agg = reducer.decode(arg(args, 0)).map_err(|m| EvalError::method(&name, m))?;
        let sample = Sample::from_value(arg(args, 1))
            .ok_or_else(|| EvalError::method(&name, "expected a sample of the form {x, y}"))?;
        let limit = as_numeric(arg(args, 2))
            .filter(|n| *n >= 1.0)
            .map_or(reducer.max_buckets(), |n| n as usize);
        Ok(reducer.push_limited(agg, sample, limit).to_value())
    }))
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

fn as_table(method: &str, value: Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Array(rows) => Ok(rows),
        other => Err(EvalError::method(
            method,
            format!("expected an array of rows, got {other}"),
        )),
    }
}

fn install_joins(engine: &mut Engine) {
    engine
        .add_lazy("ijoin", |args| {
            let tables = table_count(args.len());
            let rows = (0..tables)
                .map(|i| as_table("ijoin", args.eval(i)?))
                .collect::<Result<Vec<_>, _>>()?;
            let predicates: Vec<JoinPredicate<'_>> = (tables..args.len())
                .map(|i| -> JoinPredicate<'_> {
                    Box::new(move |left: &Value, right: &Value| {
                        let pair = Value::Array(vec![left.clone(), right.clone()]);
                        Ok(truthy(&args.eval_in(i, &pair)?))
                    })
                })
                .collect();
            Ok(Value::Array(nested_loop_join(&rows, &predicates)?))
        })
        .add_pure("kjoin", |args| {
            let tables = table_count(args.len());
            check_arity(tables, args.len() - tables)?;
            let rows = args[..tables]
                .iter()
                .map(|t| as_table("kjoin", t.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            let keys = args[tables..]
                .iter()
                .map(|clause| match clause {
                    Value::Array(pair) if pair.len() == 2 => Ok((to_text(&pair[0]), to_text(&pair[1]))),
                    other => Err(EvalError::method(
                        "kjoin",
                        format!("join clause must be [left, right], got {other}"),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(hash_join(&rows, &keys)?))
        });
}
