//! Stream runtime: events, composable transforms and the primitive stages
//! pipeline operators compile to.
//!
//! A pipeline runs over an [`EventStream`] of `Result<Event, EvalError>`.
//! Most stages consume and emit [`Event::Data`]; grouping stages emit
//! [`Event::Group`] sub-streams which a split block flattens back.
//! Errors travel as `Err` items and are passed downstream untouched.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;

use crate::engine::{EvalResult, Scope};
use crate::error::EvalError;
use crate::value::{lookup_or_null, num, to_number, truthy};

mod emit;
mod flatten;
mod fork;
pub mod window;

pub use emit::{Subjects, emit};
pub use flatten::{Flatten, flatten_groups, split};
pub use fork::{Driven, concat_all, fork, merge_all, multicast, race, zip_all};


/// Concurrency used by async stages when none is given.
pub const DEFAULT_CONCURRENCY: usize = 1024;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub enum Event {
    Data(Value),
    Group(Group),
}

/// A keyed sub-stream emitted by a grouping stage.
pub struct Group {
    pub key: Value,
    pub events: EventStream,
}

pub type EventResult = Result<Event, EvalError>;
pub type EventStream = BoxStream<'static, EventResult>;

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Data(v) => f.debug_tuple("Data").field(v).finish(),
            Event::Group(g) => f.debug_struct("Group").field("key", &g.key).finish_non_exhaustive(),
        }
    }
}

impl Event {
    pub fn into_data(self, stage: &str) -> Result<Value, EvalError> {
        match self {
            Event::Data(v) => Ok(v),
            Event::Group(_) => Err(EvalError::UnexpectedGroup {
                stage: stage.to_string(),
            }),
        }
    }
}

fn data(stage: &str, item: EventResult) -> Result<Value, EvalError> {
    item.and_then(|event| event.into_data(stage))
}

/// Stream of plain values as data events.
pub fn from_values<I>(values: I) -> EventStream
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
{
    stream::iter(values.into_iter().map(|v| Ok(Event::Data(v)))).boxed()
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

type TransformFn = dyn Fn(EventStream, Scope) -> EventStream + Send + Sync;

/// A stream-to-stream function, applied once per run with the run's scope.
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(EventStream, Scope) -> EventStream + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|input, _| input)
    }

    pub fn apply(&self, input: EventStream, scope: Scope) -> EventStream {
        (self.0)(input, scope)
    }

    /// `self` followed by `next`.
    pub fn then(self, next: Transform) -> Self {
        Self::new(move |input, scope| {
            let mid = self.apply(input, scope.clone());
            next.apply(mid, scope)
        })
    }
}

pub type ValueFn = Arc<dyn Fn(&Value, &Scope) -> EvalResult + Send + Sync>;
/// `(accumulator, current)`.
pub type ReduceFn = Arc<dyn Fn(Value, Value, &Scope) -> EvalResult + Send + Sync>;
pub type AsyncValueFn = Arc<dyn Fn(Value, Scope) -> BoxFuture<'static, EvalResult> + Send + Sync>;

// ---------------------------------------------------------------------------
// Per-event stages
// ---------------------------------------------------------------------------

pub fn map(input: EventStream, scope: Scope, f: ValueFn) -> EventStream {
    input
        .map(move |item| f(&data("map", item)?, &scope).map(Event::Data))
        .boxed()
}

/// Async map with up to `concurrency` evaluations in flight. Unordered
/// results are emitted as they complete.
pub fn map_async(
    input: EventStream,
    scope: Scope,
    f: AsyncValueFn,
    concurrency: usize,
    ordered: bool,
) -> EventStream {
    let pending = input.map(move |item| {
        let f = Arc::clone(&f);
        let scope = scope.clone();
        async move { f(data("map", item)?, scope).await.map(Event::Data) }
    });
    if ordered {
        pending.buffered(concurrency.max(1)).boxed()
    } else {
        pending.buffer_unordered(concurrency.max(1)).boxed()
    }
}

pub fn filter(input: EventStream, scope: Scope, predicate: ValueFn) -> EventStream {
    input
        .filter_map(move |item| {
            let out = match data("filter", item) {
                Ok(v) => match predicate(&v, &scope) {
                    Ok(keep) => truthy(&keep).then_some(Ok(Event::Data(v))),
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            };
            future::ready(out)
        })
        .boxed()
}

/// Pass events while the predicate holds; complete on the first miss.
pub fn take_while(input: EventStream, scope: Scope, predicate: ValueFn) -> EventStream {
    input
        .scan(false, move |done, item| {
            if *done {
                return future::ready(None);
            }
            let out = match data("takeWhile", item) {
                Ok(v) => match predicate(&v, &scope) {
                    Ok(keep) if truthy(&keep) => Some(Ok(Event::Data(v))),
                    Ok(_) => None,
                    Err(e) => {
                        *done = true;
                        Some(Err(e))
                    }
                },
                Err(e) => {
                    *done = true;
                    Some(Err(e))
                }
            };
            future::ready(out)
        })
        .boxed()
}

/// Drop events while the predicate holds; pass everything after.
pub fn skip_while(input: EventStream, scope: Scope, predicate: ValueFn) -> EventStream {
    input
        .scan(true, move |skipping, item| {
            let out = match item {
                Err(e) => Some(Err(e)),
                Ok(event) if !*skipping => Some(Ok(event)),
                Ok(event) => match event
                    .into_data("skipWhile")
                    .and_then(|v| Ok((predicate(&v, &scope)?, v)))
                {
                    Ok((skip, _)) if truthy(&skip) => None,
                    Ok((_, v)) => {
                        *skipping = false;
                        Some(Ok(Event::Data(v)))
                    }
                    Err(e) => Some(Err(e)),
                },
            };
            future::ready(Some(out))
        })
        .filter_map(future::ready)
        .boxed()
}

pub fn take(input: EventStream, n: usize) -> EventStream {
    input.take(n).boxed()
}

pub fn skip(input: EventStream, n: usize) -> EventStream {
    input.skip(n).boxed()
}

/// The last `n` events, emitted on completion.
pub fn take_last(input: EventStream, n: usize) -> EventStream {
    stream::once(async move {
        let mut input = input;
        let mut window = VecDeque::with_capacity(n);
        while let Some(item) = input.next().await {
            match item {
                Ok(event) => {
                    window.push_back(Ok(event));
                    if window.len() > n {
                        window.pop_front();
                    }
                }
                Err(e) => return vec![Err(e)],
            }
        }
        window.into_iter().collect::<Vec<_>>()
    })
    .flat_map(stream::iter)
    .boxed()
}

/// Replace each value by the value at `path`.
pub fn pluck(input: EventStream, path: Vec<String>) -> EventStream {
    input
        .map(move |item| Ok(Event::Data(lookup_or_null(&data("pluck", item)?, &path))))
        .boxed()
}

fn expand(result: EvalResult) -> Vec<EventResult> {
    match result {
        Ok(Value::Array(items)) => items.into_iter().map(|v| Ok(Event::Data(v))).collect(),
        Ok(v) => vec![Ok(Event::Data(v))],
        Err(e) => vec![Err(e)],
    }
}

/// Map each value and flatten array results into separate events.
pub fn merge_map(input: EventStream, scope: Scope, f: ValueFn) -> EventStream {
    input
        .flat_map(move |item| stream::iter(expand(data("mergeMap", item).and_then(|v| f(&v, &scope)))))
        .boxed()
}

pub fn merge_map_async(
    input: EventStream,
    scope: Scope,
    f: AsyncValueFn,
    concurrency: usize,
    ordered: bool,
) -> EventStream {
    let pending = input.map(move |item| {
        let f = Arc::clone(&f);
        let scope = scope.clone();
        async move { f(data("mergeMap", item)?, scope).await }
    });
    let results = if ordered {
        pending.buffered(concurrency.max(1)).boxed()
    } else {
        pending.buffer_unordered(concurrency.max(1)).boxed()
    };
    results.flat_map(|result| stream::iter(expand(result))).boxed()
}

// ---------------------------------------------------------------------------
// Accumulating stages
// ---------------------------------------------------------------------------

/// Fold the stream into one value emitted on completion. Without a seed the
/// first value seeds the fold and an empty stream emits nothing; with a seed
/// an empty stream emits the seed.
pub fn reduce(input: EventStream, scope: Scope, f: ReduceFn, seed: Option<Value>) -> EventStream {
    stream::once(async move {
        let mut input = input;
        let mut acc = seed;
        while let Some(item) = input.next().await {
            let current = match data("reduce", item) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };
            acc = Some(match acc {
                None => current,
                Some(prev) => match f(prev, current, &scope) {
                    Ok(next) => next,
                    Err(e) => return Some(Err(e)),
                },
            });
        }
        acc.map(|v| Ok(Event::Data(v)))
    })
    .filter_map(future::ready)
    .boxed()
}

/// Like [`reduce`] but emits every intermediate accumulator.
pub fn scan(input: EventStream, scope: Scope, f: ReduceFn, seed: Option<Value>) -> EventStream {
    input
        .scan(seed, move |acc, item| {
            let out = data("scan", item).and_then(|current| {
                let next = match acc.take() {
                    None => current,
                    Some(prev) => f(prev, current, &scope)?,
                };
                *acc = Some(next.clone());
                Ok(Event::Data(next))
            });
            future::ready(Some(out))
        })
        .boxed()
}

/// [`scan`] whose accumulator may expand: an array result emits each of its
/// elements and the last one becomes the accumulator. An empty array emits
/// nothing and keeps the previous accumulator.
pub fn merge_scan(input: EventStream, scope: Scope, f: ReduceFn, seed: Option<Value>) -> EventStream {
    input
        .scan(seed, move |acc, item| {
            let out = data("mergeScan", item).and_then(|current| {
                let items = match acc.clone() {
                    None => vec![current],
                    Some(prev) => match f(prev, current, &scope)? {
                        Value::Array(items) => items,
                        single => vec![single],
                    },
                };
                if let Some(last) = items.last() {
                    *acc = Some(last.clone());
                }
                Ok(items)
            });
            future::ready(Some(out))
        })
        .flat_map(|out| {
            let events: Vec<EventResult> = match out {
                Ok(items) => items.into_iter().map(|v| Ok(Event::Data(v))).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(events)
        })
        .boxed()
}

/// Running total of `f(value)`, emitted on completion; `0` for no input.
pub fn sum(input: EventStream, scope: Scope, f: ValueFn) -> EventStream {
    let add: ReduceFn = Arc::new(move |acc: Value, current: Value, scope: &Scope| {
        Ok(num(to_number(&acc) + to_number(&f(&current, scope)?)))
    });
    reduce(input, scope, add, Some(num(0.0)))
}

/// Mean of `f(value)`, emitted on completion; nothing for no input.
pub fn average(input: EventStream, scope: Scope, f: ValueFn) -> EventStream {
    stream::once(async move {
        let mut input = input;
        let (mut total, mut count) = (0.0, 0u64);
        while let Some(item) = input.next().await {
            match data("average", item).and_then(|v| f(&v, &scope)) {
                Ok(v) => {
                    total += to_number(&v);
                    count += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        (count > 0).then(|| Ok(Event::Data(num(total / count as f64))))
    })
    .filter_map(future::ready)
    .boxed()
}

/// Arrays of `n` values; the last may be shorter. `n` must be positive.
pub fn buffer_count(input: EventStream, n: usize) -> EventStream {
    input
        .chunks(n.max(1))
        .map(|chunk| {
            chunk
                .into_iter()
                .map(|item| data("bufferCount", item))
                .collect::<Result<Vec<_>, _>>()
                .map(|values| Event::Data(Value::Array(values)))
        })
        .boxed()
}

/// Every value in one array, emitted on completion (`[]` for no input).
pub fn to_array(input: EventStream) -> EventStream {
    stream::once(async move {
        let mut input = input;
        let mut values = Vec::new();
        while let Some(item) = input.next().await {
            match data("toArray", item) {
                Ok(v) => values.push(v),
                Err(e) => return Err(e),
            }
        }
        Ok(Event::Data(Value::Array(values)))
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Grouping stages
// ---------------------------------------------------------------------------

type Sender = UnboundedSender<EventResult>;

fn open_group(key: Value) -> (Sender, Event) {
    let (tx, rx) = mpsc::unbounded();
    (tx, Event::Group(Group { key, events: rx.boxed() }))
}

struct GroupState {
    input: EventStream,
    scope: Scope,
    key_fn: ValueFn,
    groups: HashMap<String, Sender>,
}

/// One sub-stream per distinct key, emitted when the key is first seen.
/// Keys compare by JSON value, so `1` and `"1"` are different groups.
pub fn group_by(input: EventStream, scope: Scope, key_fn: ValueFn) -> EventStream {
    let state = GroupState {
        input,
        scope,
        key_fn,
        groups: HashMap::new(),
    };
    stream::unfold(state, |mut state| async move {
        loop {
            let value = match data("groupBy", state.input.next().await?) {
                Ok(v) => v,
                Err(e) => {
                    for tx in state.groups.values() {
                        let _ = tx.unbounded_send(Err(e.clone()));
                    }
                    state.groups.clear();
                    return Some((Err(e), state));
                }
            };
            let key = match (state.key_fn)(&value, &state.scope) {
                Ok(k) => k,
                Err(e) => return Some((Err(e), state)),
            };
            let id = key.to_string();
            // a closed group stays claimed; its values are dropped
            if let Some(tx) = state.groups.get(&id) {
                let _ = tx.unbounded_send(Ok(Event::Data(value)));
                continue;
            }
            let (tx, group) = open_group(key);
            let _ = tx.unbounded_send(Ok(Event::Data(value)));
            state.groups.insert(id, tx);
            return Some((Ok(group), state));
        }
    })
    .boxed()
}

struct WindowState {
    input: EventStream,
    size: usize,
    index: u64,
    open: Option<(Sender, usize)>,
}

/// Consecutive sub-streams of `size` values each, keyed by window index.
/// A window opens with its first value, so no empty windows are emitted.
pub fn window_count(input: EventStream, size: usize) -> EventStream {
    let state = WindowState {
        input,
        size: size.max(1),
        index: 0,
        open: None,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            let value = match data("windowCount", state.input.next().await?) {
                Ok(v) => v,
                Err(e) => {
                    if let Some((tx, _)) = state.open.take() {
                        let _ = tx.unbounded_send(Err(e.clone()));
                    }
                    return Some((Err(e), state));
                }
            };
            let size = state.size;
            let (opened, (tx, seen)) = match state.open.take() {
                Some(open) => (None, open),
                None => {
                    let (tx, group) = open_group(Value::from(state.index));
                    state.index += 1;
                    (Some(group), (tx, 0))
                }
            };
            let _ = tx.unbounded_send(Ok(Event::Data(value)));
            if seen + 1 < size {
                state.open = Some((tx, seen + 1));
            }
            if let Some(group) = opened {
                return Some((Ok(group), state));
            }
        }
    })
    .boxed()
}
