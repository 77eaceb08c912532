//! Operator declarations: which stage families exist, how their arguments
//! are classified and how a built stage turns into a [`Transform`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use rv_lang::{Logic, compile_expr};
use serde_json::{Value, json};

use crate::engine::{AsyncCallable, Callable, Scope};
use crate::error::BuildError;
use crate::stream::window::{
    ThrottleOptions, buffer_reduce, debounce_time, flush, throttle_reduce, throttle_time, timeout,
};
use crate::stream::{self, AsyncValueFn, DEFAULT_CONCURRENCY, ReduceFn, Transform, ValueFn};
use crate::value::{reducer_pair, to_text, truthy};

mod builder;

pub use builder::Builder;


// ---------------------------------------------------------------------------
// Compiled stage arguments
// ---------------------------------------------------------------------------

/// A per-event argument.
#[derive(Debug, Clone)]
pub enum StageFn {
    /// Called with the current value.
    Unary(Callable),
    /// Built in accumulator context, called with `{accumulator, current}`.
    Reducer(Callable),
    Async(AsyncCallable),
    /// Evaluated at build time (`#` mode or a default value).
    Constant(Value),
}

impl StageFn {
    /// Async functions only run in async-capable families.
    pub fn value_fn(self, operator: &str) -> Result<ValueFn, BuildError> {
        match self {
            StageFn::Unary(f) | StageFn::Reducer(f) => {
                Ok(Arc::new(move |v: &Value, scope: &Scope| f.call(v, scope)))
            }
            StageFn::Constant(v) => Ok(Arc::new(move |_: &Value, _: &Scope| Ok(v.clone()))),
            StageFn::Async(_) => Err(BuildError::AsyncStage {
                operator: operator.to_string(),
            }),
        }
    }

    /// Unary functions see the `{accumulator, current}` pair as `@`.
    pub fn reduce_fn(self, operator: &str) -> Result<ReduceFn, BuildError> {
        match self {
            StageFn::Unary(f) | StageFn::Reducer(f) => Ok(Arc::new(move |acc: Value, cur: Value, scope: &Scope| {
                f.call(&reducer_pair(acc, cur), scope)
            })),
            StageFn::Constant(v) => Ok(Arc::new(move |_: Value, _: Value, _: &Scope| Ok(v.clone()))),
            StageFn::Async(_) => Err(BuildError::AsyncStage {
                operator: operator.to_string(),
            }),
        }
    }

    pub fn async_fn(self) -> AsyncValueFn {
        match self {
            StageFn::Async(f) => Arc::new(move |v: Value, scope: Scope| f.call(v, scope)),
            StageFn::Unary(f) | StageFn::Reducer(f) => {
                Arc::new(move |v: Value, scope: Scope| future::ready(f.call(&v, &scope)).boxed())
            }
            StageFn::Constant(c) => Arc::new(move |_: Value, _: Scope| future::ready(Ok(c.clone())).boxed()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StageArg {
    Fn(StageFn),
    Value(Value),
}

impl StageArg {
    /// Fixed value of the argument; function arguments have none.
    pub fn value(&self) -> Option<&Value> {
        match self {
            StageArg::Value(v) | StageArg::Fn(StageFn::Constant(v)) => Some(v),
            StageArg::Fn(_) => None,
        }
    }

    pub fn into_fn(self) -> StageFn {
        match self {
            StageArg::Fn(f) => f,
            StageArg::Value(v) => StageFn::Constant(v),
        }
    }
}

/// What a stage family needs besides its arguments.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub operator: &'a str,
    pub ordered_async: bool,
}

/// Host-supplied stage family.
pub trait OperatorFactory: Send + Sync {
    /// Minimum and maximum (`None` for unbounded) argument counts.
    fn arity(&self) -> (usize, Option<usize>);

    fn accepts_reducer(&self) -> bool {
        false
    }

    fn supports_async(&self) -> bool {
        false
    }

    fn emits_groups(&self) -> bool {
        false
    }

    fn build(&self, args: Vec<StageArg>, ctx: StageContext<'_>) -> Result<Transform, BuildError>;
}

// ---------------------------------------------------------------------------
// Operator families
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum OperatorKind {
    Map,
    Filter,
    TakeWhile,
    SkipWhile,
    MergeMap,
    Take,
    Skip,
    TakeLast,
    Pluck,
    BufferCount,
    ToArray,
    Reduce,
    Scan,
    GroupBy,
    WindowCount,
    Flush,
    BufferReduce,
    ThrottleReduce,
    Sum,
    Average,
    DebounceTime,
    ThrottleTime,
    Timeout,
    MergeScan,
    SwitchScan,
    Emit,
    Custom(Arc<dyn OperatorFactory>),
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorKind::Map => "Map",
            OperatorKind::Filter => "Filter",
            OperatorKind::TakeWhile => "TakeWhile",
            OperatorKind::SkipWhile => "SkipWhile",
            OperatorKind::MergeMap => "MergeMap",
            OperatorKind::Take => "Take",
            OperatorKind::Skip => "Skip",
            OperatorKind::TakeLast => "TakeLast",
            OperatorKind::Pluck => "Pluck",
            OperatorKind::BufferCount => "BufferCount",
            OperatorKind::ToArray => "ToArray",
            OperatorKind::Reduce => "Reduce",
            OperatorKind::Scan => "Scan",
            OperatorKind::GroupBy => "GroupBy",
            OperatorKind::WindowCount => "WindowCount",
            OperatorKind::Flush => "Flush",
            OperatorKind::BufferReduce => "BufferReduce",
            OperatorKind::ThrottleReduce => "ThrottleReduce",
            OperatorKind::Sum => "Sum",
            OperatorKind::Average => "Average",
            OperatorKind::DebounceTime => "DebounceTime",
            OperatorKind::ThrottleTime => "ThrottleTime",
            OperatorKind::Timeout => "Timeout",
            OperatorKind::MergeScan => "MergeScan",
            OperatorKind::SwitchScan => "SwitchScan",
            OperatorKind::Emit => "Emit",
            OperatorKind::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl OperatorKind {
    /// Minimum and maximum argument counts. Async map stages take an
    /// optional concurrency limit as a second argument.
    pub fn arity(&self, is_async: bool) -> (usize, Option<usize>) {
        use OperatorKind::*;
        match self {
            Map | MergeMap => (1, Some(if is_async { 2 } else { 1 })),
            Filter | TakeWhile | SkipWhile | GroupBy | Sum | Average => (1, Some(1)),
            Take | Skip | TakeLast | BufferCount | WindowCount => (1, Some(1)),
            DebounceTime | ThrottleTime | Timeout => (1, Some(1)),
            Pluck => (1, None),
            ToArray => (0, Some(0)),
            Reduce | Scan | MergeScan | SwitchScan => (1, Some(2)),
            Emit => (1, Some(2)),
            Flush => (1, Some(2)),
            BufferReduce | ThrottleReduce => (2, Some(3)),
            Custom(factory) => factory.arity(),
        }
    }

    pub fn accepts_reducer(&self) -> bool {
        match self {
            OperatorKind::Reduce
            | OperatorKind::Scan
            | OperatorKind::MergeScan
            | OperatorKind::SwitchScan
            | OperatorKind::BufferReduce
            | OperatorKind::ThrottleReduce => true,
            OperatorKind::Custom(factory) => factory.accepts_reducer(),
            _ => false,
        }
    }

    pub fn supports_async(&self) -> bool {
        match self {
            OperatorKind::Map | OperatorKind::MergeMap => true,
            OperatorKind::Custom(factory) => factory.supports_async(),
            _ => false,
        }
    }

    /// Whether the stage emits sub-streams and so may open a split block.
    pub fn emits_groups(&self) -> bool {
        match self {
            OperatorKind::GroupBy | OperatorKind::WindowCount | OperatorKind::Flush => true,
            OperatorKind::Custom(factory) => factory.emits_groups(),
            _ => false,
        }
    }

    /// Configure the family's primitive with built arguments.
    pub fn build(&self, args: Vec<StageArg>, ctx: StageContext<'_>) -> Result<Transform, BuildError> {
        use OperatorKind::*;
        let op = ctx.operator;
        let mut args = args.into_iter();
        let mut next = || args.next().ok_or_else(|| BuildError::MissingArguments {
            operator: op.to_string(),
        });

        let transform = match self {
            Map | MergeMap => {
                let f = next()?.into_fn();
                if let StageFn::Async(_) = f {
                    let limit = match args_rest(&mut next) {
                        Some(v) => count(op, &v, false)?,
                        None => DEFAULT_CONCURRENCY,
                    };
                    let f = f.async_fn();
                    let ordered = ctx.ordered_async;
                    let flat = matches!(self, MergeMap);
                    Transform::new(move |input, scope| {
                        if flat {
                            stream::merge_map_async(input, scope, Arc::clone(&f), limit, ordered)
                        } else {
                            stream::map_async(input, scope, Arc::clone(&f), limit, ordered)
                        }
                    })
                } else {
                    let f = f.value_fn(op)?;
                    if matches!(self, MergeMap) {
                        Transform::new(move |input, scope| stream::merge_map(input, scope, Arc::clone(&f)))
                    } else {
                        Transform::new(move |input, scope| stream::map(input, scope, Arc::clone(&f)))
                    }
                }
            }
            Filter | TakeWhile | SkipWhile => {
                let f = next()?.into_fn().value_fn(op)?;
                let stage = match self {
                    Filter => stream::filter,
                    TakeWhile => stream::take_while,
                    _ => stream::skip_while,
                };
                Transform::new(move |input, scope| stage(input, scope, Arc::clone(&f)))
            }
            GroupBy => {
                let f = next()?.into_fn().value_fn(op)?;
                Transform::new(move |input, scope| stream::group_by(input, scope, Arc::clone(&f)))
            }
            Sum | Average => {
                let f = next()?.into_fn().value_fn(op)?;
                let stage = if matches!(self, Sum) { stream::sum } else { stream::average };
                Transform::new(move |input, scope| stage(input, scope, Arc::clone(&f)))
            }
            Take | Skip | TakeLast => {
                let n = count(op, &fixed(op, next()?)?, true)?;
                let stage = match self {
                    Take => stream::take,
                    Skip => stream::skip,
                    _ => stream::take_last,
                };
                Transform::new(move |input, _| stage(input, n))
            }
            BufferCount | WindowCount => {
                let n = count(op, &fixed(op, next()?)?, false)?;
                let stage = if matches!(self, BufferCount) {
                    stream::buffer_count
                } else {
                    stream::window_count
                };
                Transform::new(move |input, _| stage(input, n))
            }
            Pluck => {
                let mut path = Vec::new();
                while let Some(arg) = args_rest(&mut next) {
                    path.extend(to_text(&arg).split('.').map(str::to_string));
                }
                Transform::new(move |input, _| stream::pluck(input, path.clone()))
            }
            ToArray => Transform::new(|input, _| stream::to_array(input)),
            Reduce | Scan => {
                let f = next()?.into_fn().reduce_fn(op)?;
                let seed = args_rest(&mut next);
                let scan = matches!(self, Scan);
                Transform::new(move |input, scope| {
                    if scan {
                        stream::scan(input, scope, Arc::clone(&f), seed.clone())
                    } else {
                        stream::reduce(input, scope, Arc::clone(&f), seed.clone())
                    }
                })
            }
            // Accumulator functions are synchronous, so no inner sequence can
            // be pre-empted and switching coincides with merging.
            MergeScan | SwitchScan => {
                let f = next()?.into_fn().reduce_fn(op)?;
                let seed = args_rest(&mut next);
                Transform::new(move |input, scope| {
                    stream::merge_scan(input, scope, Arc::clone(&f), seed.clone())
                })
            }
            DebounceTime | ThrottleTime | Timeout => {
                let period = millis(op, &fixed(op, next()?)?)?;
                let stage = match self {
                    DebounceTime => debounce_time,
                    ThrottleTime => throttle_time,
                    _ => timeout,
                };
                Transform::new(move |input, _| stage(input, period))
            }
            Emit => {
                let subject = next()?.into_fn().value_fn(op)?;
                let failure = args_rest(&mut next).map(|v| to_text(&v));
                Transform::new(move |input, scope| {
                    stream::emit(input, scope, Arc::clone(&subject), failure.clone())
                })
            }
            Flush => {
                let period = millis(op, &fixed(op, next()?)?)?;
                let strict = args_rest(&mut next).is_some_and(|v| truthy(&v));
                Transform::new(move |input, _| flush(input, period, strict))
            }
            BufferReduce => {
                let f = next()?.into_fn().reduce_fn(op)?;
                let initial = fixed(op, next()?)?;
                let options = args_rest(&mut next).unwrap_or_else(|| json!({}));
                let n = match options.get("count") {
                    Some(v) => count(op, v, false)?,
                    None => 1,
                };
                Transform::new(move |input, scope| {
                    buffer_reduce(input, scope, Arc::clone(&f), initial.clone(), n)
                })
            }
            ThrottleReduce => {
                let f = next()?.into_fn().reduce_fn(op)?;
                let initial = fixed(op, next()?)?;
                let options = throttle_options(op, &args_rest(&mut next).unwrap_or_else(|| json!({})))?;
                Transform::new(move |input, scope| {
                    throttle_reduce(input, scope, Arc::clone(&f), initial.clone(), options)
                })
            }
            Custom(factory) => {
                let rest: Vec<StageArg> = std::iter::from_fn(|| next().ok()).collect();
                return factory.build(rest, ctx);
            }
        };
        Ok(transform)
    }
}

fn args_rest(next: &mut impl FnMut() -> Result<StageArg, BuildError>) -> Option<Value> {
    next().ok().and_then(|arg| arg.value().cloned())
}

fn fixed(op: &str, arg: StageArg) -> Result<Value, BuildError> {
    arg.value()
        .cloned()
        .ok_or_else(|| BuildError::invalid(op, "expected a fixed argument"))
}

fn count(op: &str, value: &Value, allow_zero: bool) -> Result<usize, BuildError> {
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 && n >= 0.0 && (allow_zero || n > 0.0) => Ok(n as usize),
        _ => Err(BuildError::invalid(
            op,
            format!(
                "expected a {} integer, got {value}",
                if allow_zero { "non-negative" } else { "positive" }
            ),
        )),
    }
}

fn millis(op: &str, value: &Value) -> Result<Duration, BuildError> {
    match value.as_f64() {
        Some(ms) if ms >= 0.0 => Duration::try_from_secs_f64(ms / 1000.0).map_err(|e| {
            BuildError::invalid(op, format!("bad duration {value}: {e}"))
        }),
        _ => Err(BuildError::invalid(op, format!("expected a duration in milliseconds, got {value}"))),
    }
}

fn throttle_options(op: &str, value: &Value) -> Result<ThrottleOptions, BuildError> {
    let mut options = ThrottleOptions::default();
    let Some(map) = value.as_object() else {
        return Err(BuildError::invalid(op, format!("expected an options object, got {value}")));
    };
    if let Some(time) = map.get("time") {
        options.period = millis(op, time)?;
    }
    if let Some(leading) = map.get("leading") {
        options.leading = truthy(leading);
    }
    if let Some(trailing) = map.get("trailing") {
        options.trailing = truthy(trailing);
    }
    Ok(options)
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A padding argument.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultArg {
    Value(Value),
    Expr(Logic),
}

/// Options accepted by [`Registry::declare`].
#[derive(Debug, Clone, Default)]
pub struct DeclOptions {
    /// Leading arguments built as per-event functions; the rest are
    /// evaluated once at build time. Defaults to 1.
    pub immediate_from: Option<usize>,
    /// Build function arguments in accumulator context.
    pub context: bool,
    /// Padding for missing trailing arguments. With `parse_defaults` each
    /// must be a string holding an expression.
    pub defaults: Vec<Value>,
    pub parse_defaults: bool,
    /// Argument position the first default fills.
    pub default_start: usize,
    pub is_async: bool,
}

impl DeclOptions {
    pub fn immediate_from(mut self, n: usize) -> Self {
        self.immediate_from = Some(n);
        self
    }

    pub fn context(mut self) -> Self {
        self.context = true;
        self
    }

    pub fn defaults(mut self, start: usize, defaults: Vec<Value>) -> Self {
        self.default_start = start;
        self.defaults = defaults;
        self
    }

    pub fn parse_defaults(mut self) -> Self {
        self.parse_defaults = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclConfig {
    pub immediate_from: usize,
    pub context: bool,
    pub defaults: Vec<DefaultArg>,
    pub default_start: usize,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub kind: OperatorKind,
    pub config: DeclConfig,
}

/// Operator name to declaration table. Built once by the host and passed to
/// compilation by reference.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    decls: HashMap<String, Declaration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        use OperatorKind::*;
        let mut reg = Self::new();
        let fixed_args = || DeclOptions::default().immediate_from(0);
        let table: Vec<(&str, OperatorKind, DeclOptions)> = vec![
            ("map", Map, DeclOptions::default()),
            ("mapAsync", Map, DeclOptions::default().asynchronous()),
            ("filter", Filter, DeclOptions::default()),
            ("takeWhile", TakeWhile, DeclOptions::default()),
            ("skipWhile", SkipWhile, DeclOptions::default()),
            ("mergeMap", MergeMap, DeclOptions::default()),
            ("mergeMapAsync", MergeMap, DeclOptions::default().asynchronous()),
            ("take", Take, fixed_args()),
            ("skip", Skip, fixed_args()),
            ("takeLast", TakeLast, fixed_args()),
            ("pluck", Pluck, fixed_args()),
            ("bufferCount", BufferCount, fixed_args()),
            ("toArray", ToArray, fixed_args()),
            ("reduce", Reduce, DeclOptions::default().context()),
            ("scan", Scan, DeclOptions::default().context()),
            ("groupBy", GroupBy, DeclOptions::default()),
            ("windowCount", WindowCount, fixed_args()),
            ("flush", Flush, fixed_args().defaults(1, vec![json!(false)])),
            (
                "bufferReduce",
                BufferReduce,
                DeclOptions::default().context().defaults(2, vec![json!({})]),
            ),
            (
                "throttleReduce",
                ThrottleReduce,
                DeclOptions::default().context().defaults(2, vec![json!({})]),
            ),
            ("sum", Sum, DeclOptions::default()),
            ("average", Average, DeclOptions::default()),
            ("debounceTime", DebounceTime, fixed_args()),
            ("throttleTime", ThrottleTime, fixed_args()),
            ("timeout", Timeout, fixed_args()),
            ("mergeScan", MergeScan, DeclOptions::default().context()),
            ("switchScan", SwitchScan, DeclOptions::default().context()),
            ("emit", Emit, DeclOptions::default()),
        ];
        for (name, kind, options) in table {
            debug_assert!(!reg.contains(name), "built-in operator '{name}' declared twice");
            let declared = reg.declare(name, kind, options).map(|_| ());
            debug_assert!(declared.is_ok(), "built-in operator '{name}' rejected: {declared:?}");
        }
        reg
    }

    /// Register (or replace) an operator and return its resolved declaration.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: OperatorKind,
        options: DeclOptions,
    ) -> Result<&Declaration, BuildError> {
        let name = name.into();
        if options.is_async && !kind.supports_async() {
            return Err(BuildError::invalid(&name, "operator cannot run asynchronously"));
        }
        if options.context && !kind.accepts_reducer() {
            return Err(BuildError::NotAReducer { operator: name });
        }
        let defaults = options
            .defaults
            .into_iter()
            .map(|value| {
                if !options.parse_defaults {
                    return Ok(DefaultArg::Value(value));
                }
                match value {
                    Value::String(src) => compile_expr(&src).map(DefaultArg::Expr).map_err(BuildError::Default),
                    other => Err(BuildError::invalid(
                        &name,
                        format!("default {other} is not an expression"),
                    )),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let config = DeclConfig {
            immediate_from: options.immediate_from.unwrap_or(1),
            context: options.context,
            defaults,
            default_start: options.default_start,
            is_async: options.is_async,
        };
        let decl = Declaration {
            name: name.clone(),
            kind,
            config,
        };
        self.decls.insert(name.clone(), decl);
        Ok(&self.decls[&name])
    }

    pub fn get(&self, name: &str) -> Option<&Declaration> {
        self.decls.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decls.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decls.keys().map(String::as_str)
    }
}
