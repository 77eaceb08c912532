//! Windowing stages: count-bounded reduce, throttled reduce, the on-demand
//! time window splitter and the plain time operators (`debounceTime`,
//! `throttleTime`, `timeout`).
//!
//! Timers live inside each stage's stream state, so dropping the stream
//! cancels them. Nothing is spawned.

use std::future;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream;
use futures::StreamExt;
use serde_json::Value;
use tokio::time::{Instant, sleep_until};

use super::{Event, EventResult, EventStream, Group, ReduceFn, data};
use crate::engine::Scope;
use crate::error::EvalError;

#[cfg(test)]
mod tests;

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

enum Step {
    Item(Option<EventResult>),
    Tick,
}

// ---------------------------------------------------------------------------
// bufferReduce
// ---------------------------------------------------------------------------

struct BufferState {
    input: EventStream,
    scope: Scope,
    reducer: ReduceFn,
    initial: Value,
    count: usize,
    acc: Value,
    processed: usize,
    done: bool,
}

/// Fold every `count` values into a fresh copy of `initial` and emit the
/// result. A partial window is emitted when the input completes.
pub fn buffer_reduce(
    input: EventStream,
    scope: Scope,
    reducer: ReduceFn,
    initial: Value,
    count: usize,
) -> EventStream {
    let state = BufferState {
        input,
        scope,
        reducer,
        acc: initial.clone(),
        initial,
        count: count.max(1),
        processed: 0,
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            let Some(item) = st.input.next().await else {
                st.done = true;
                if st.processed == 0 {
                    return None;
                }
                let out = std::mem::take(&mut st.acc);
                return Some((Ok(Event::Data(out)), st));
            };
            let folded = data("bufferReduce", item).and_then(|current| {
                let acc = std::mem::take(&mut st.acc);
                (st.reducer)(acc, current, &st.scope)
            });
            match folded {
                Ok(acc) => st.acc = acc,
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
            st.processed += 1;
            if st.processed == st.count {
                st.processed = 0;
                let out = std::mem::replace(&mut st.acc, st.initial.clone());
                return Some((Ok(Event::Data(out)), st));
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// throttleReduce
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    pub period: Duration,
    pub leading: bool,
    pub trailing: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1000),
            leading: false,
            trailing: true,
        }
    }
}

struct ThrottleState {
    input: Option<EventStream>,
    scope: Scope,
    reducer: ReduceFn,
    initial: Value,
    options: ThrottleOptions,
    acc: Value,
    in_flight: bool,
    deadline: Option<Instant>,
    done: bool,
}

impl ThrottleState {
    fn release(&mut self) -> EventResult {
        self.in_flight = false;
        Ok(Event::Data(std::mem::replace(&mut self.acc, self.initial.clone())))
    }
}

/// Fold values into the accumulator and release it at most once per
/// `period`. With `leading`, a value arriving while no window is open is
/// released at once; with `trailing`, an accumulation made during a window
/// is released when it closes. On completion a pending trailing release
/// still happens; without `trailing` the pending accumulation is dropped.
pub fn throttle_reduce(
    input: EventStream,
    scope: Scope,
    reducer: ReduceFn,
    initial: Value,
    options: ThrottleOptions,
) -> EventStream {
    let state = ThrottleState {
        input: Some(input),
        scope,
        reducer,
        acc: initial.clone(),
        initial,
        options,
        in_flight: false,
        deadline: None,
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            let Some(input) = st.input.as_mut() else {
                st.done = true;
                if !(st.options.trailing && st.in_flight) {
                    return None;
                }
                if let Some(at) = st.deadline {
                    sleep_until(at).await;
                }
                return Some((st.release(), st));
            };

            let step = tokio::select! {
                biased;
                _ = until(st.deadline) => Step::Tick,
                item = input.next() => Step::Item(item),
            };

            match step {
                Step::Tick => {
                    st.deadline = None;
                    if st.options.trailing && st.in_flight {
                        st.deadline = Some(Instant::now() + st.options.period);
                        return Some((st.release(), st));
                    }
                }
                Step::Item(None) => st.input = None,
                Step::Item(Some(item)) => {
                    let folded = data("throttleReduce", item).and_then(|current| {
                        let acc = std::mem::take(&mut st.acc);
                        (st.reducer)(acc, current, &st.scope)
                    });
                    match folded {
                        Ok(acc) => {
                            st.acc = acc;
                            st.in_flight = true;
                        }
                        Err(e) => {
                            st.done = true;
                            return Some((Err(e), st));
                        }
                    }
                    if st.deadline.is_none() {
                        st.deadline = Some(Instant::now() + st.options.period);
                        if st.options.leading {
                            return Some((st.release(), st));
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// flush
// ---------------------------------------------------------------------------

struct OpenWindow {
    tx: UnboundedSender<EventResult>,
    opened: Instant,
    deadline: Instant,
}

struct FlushState {
    input: EventStream,
    period: Duration,
    strict: bool,
    window: Option<OpenWindow>,
    seq: u64,
    done: bool,
}

/// True once more than `period` has passed since `opened`.
pub fn window_expired(opened: Instant, now: Instant, period: Duration) -> bool {
    now.saturating_duration_since(opened) > period
}

/// Split the input into sub-streams of at most `period` each. A window is
/// opened by the first value arriving while none is open and closed by its
/// timer. In strict mode a value arriving after the window has outlived
/// `period` closes it first, even if the timer has not fired yet. Windows
/// are keyed by their sequence number.
pub fn flush(input: EventStream, period: Duration, strict: bool) -> EventStream {
    let state = FlushState {
        input,
        period,
        strict,
        window: None,
        seq: 0,
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            let deadline = st.window.as_ref().map(|w| w.deadline);
            let step = tokio::select! {
                biased;
                item = st.input.next() => Step::Item(item),
                _ = until(deadline) => Step::Tick,
            };

            let item = match step {
                Step::Tick => {
                    st.window = None;
                    continue;
                }
                Step::Item(None) => return None,
                Step::Item(Some(item)) => item,
            };

            let value = match data("flush", item) {
                Ok(v) => v,
                Err(e) => {
                    if let Some(window) = st.window.take() {
                        let _ = window.tx.unbounded_send(Err(e.clone()));
                    }
                    st.done = true;
                    return Some((Err(e), st));
                }
            };

            let now = Instant::now();
            if st.strict
                && let Some(window) = &st.window
                && window_expired(window.opened, now, st.period)
            {
                st.window = None;
            }

            match &st.window {
                Some(window) => {
                    let _ = window.tx.unbounded_send(Ok(Event::Data(value)));
                }
                None => {
                    let (tx, rx) = mpsc::unbounded();
                    let _ = tx.unbounded_send(Ok(Event::Data(value)));
                    st.window = Some(OpenWindow {
                        tx,
                        opened: now,
                        deadline: now + st.period,
                    });
                    let group = Group {
                        key: Value::from(st.seq),
                        events: rx.boxed(),
                    };
                    st.seq += 1;
                    return Some((Ok(Event::Group(group)), st));
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// debounceTime / throttleTime / timeout
// ---------------------------------------------------------------------------

struct DebounceState {
    input: Option<EventStream>,
    period: Duration,
    pending: Option<Value>,
    deadline: Option<Instant>,
}

/// Emit a value once `period` has passed without a newer one replacing it.
/// The pending value is emitted when the input completes; an error drops it
/// and ends the stream.
pub fn debounce_time(input: EventStream, period: Duration) -> EventStream {
    let state = DebounceState {
        input: Some(input),
        period,
        pending: None,
        deadline: None,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            let Some(input) = st.input.as_mut() else {
                let value = st.pending.take()?;
                return Some((Ok(Event::Data(value)), st));
            };
            let step = tokio::select! {
                biased;
                _ = until(st.deadline) => Step::Tick,
                item = input.next() => Step::Item(item),
            };
            match step {
                Step::Tick => {
                    st.deadline = None;
                    if let Some(value) = st.pending.take() {
                        return Some((Ok(Event::Data(value)), st));
                    }
                }
                Step::Item(None) => st.input = None,
                Step::Item(Some(item)) => match data("debounceTime", item) {
                    Ok(value) => {
                        st.pending = Some(value);
                        st.deadline = Some(Instant::now() + st.period);
                    }
                    Err(e) => {
                        st.input = None;
                        st.pending = None;
                        return Some((Err(e), st));
                    }
                },
            }
        }
    })
    .boxed()
}

/// Emit a value, then drop everything arriving within `period` of it.
pub fn throttle_time(input: EventStream, period: Duration) -> EventStream {
    let mut silent_until: Option<Instant> = None;
    input
        .filter_map(move |item| {
            let out = match data("throttleTime", item) {
                Ok(value) => {
                    let now = Instant::now();
                    if silent_until.is_some_and(|end| now < end) {
                        None
                    } else {
                        silent_until = Some(now + period);
                        Some(Ok(Event::Data(value)))
                    }
                }
                Err(e) => Some(Err(e)),
            };
            future::ready(out)
        })
        .boxed()
}

struct TimeoutState {
    input: Option<EventStream>,
    period: Duration,
    deadline: Option<Instant>,
}

/// Fail with [`EvalError::Timeout`] when `period` passes without an item,
/// counting from the first poll and then from each item.
pub fn timeout(input: EventStream, period: Duration) -> EventStream {
    let state = TimeoutState {
        input: Some(input),
        period,
        deadline: None,
    };
    stream::unfold(state, |mut st| async move {
        let input = st.input.as_mut()?;
        let deadline = *st.deadline.get_or_insert_with(|| Instant::now() + st.period);
        let step = tokio::select! {
            biased;
            item = input.next() => Step::Item(item),
            _ = sleep_until(deadline) => Step::Tick,
        };
        match step {
            Step::Item(None) => None,
            Step::Item(Some(item)) => {
                st.deadline = Some(Instant::now() + st.period);
                Some((item, st))
            }
            Step::Tick => {
                st.input = None;
                Some((Err(EvalError::Timeout(st.period)), st))
            }
        }
    })
    .boxed()
}
