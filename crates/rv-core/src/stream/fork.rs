use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::stream::{self, Stream};
use futures::{FutureExt, StreamExt};
use rv_lang::JoinStrategy;
use serde_json::Value;

use super::{Event, EventStream, Transform};
use crate::engine::Scope;
use crate::error::EvalError;

/// Copy every value of `input` to `n` taps. The returned driver pulls the
/// input and must be polled for the taps to make progress; it stops after
/// the first error (delivered to every tap) or once every tap is dropped.
pub fn multicast(input: EventStream, n: usize) -> (BoxFuture<'static, ()>, Vec<EventStream>) {
    let (senders, taps): (Vec<_>, Vec<_>) = (0..n)
        .map(|_| {
            let (tx, rx) = mpsc::unbounded();
            (tx, rx.boxed())
        })
        .unzip();
    let driver = async move {
        let mut input = input;
        while let Some(item) = input.next().await {
            let item = item.and_then(|event| event.into_data("fork"));
            let failed = item.is_err();
            for tx in &senders {
                let _ = tx.unbounded_send(item.clone().map(Event::Data));
            }
            if failed || senders.iter().all(|tx| tx.is_closed()) {
                break;
            }
        }
    }
    .boxed();
    (driver, taps)
}

/// An output stream that also drives a side future on every poll.
pub struct Driven {
    driver: Option<BoxFuture<'static, ()>>,
    output: EventStream,
}

impl Driven {
    pub fn new(driver: BoxFuture<'static, ()>, output: EventStream) -> Self {
        Self {
            driver: Some(driver),
            output,
        }
    }
}

impl Stream for Driven {
    type Item = super::EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(driver) = this.driver.as_mut()
            && driver.poll_unpin(cx).is_ready()
        {
            this.driver = None;
        }
        this.output.poll_next_unpin(cx)
    }
}

// ---------------------------------------------------------------------------
// Join strategies
// ---------------------------------------------------------------------------

/// Interleave branch outputs as they arrive.
pub fn merge_all(streams: Vec<EventStream>) -> EventStream {
    stream::select_all(streams).boxed()
}

/// Branch outputs one after another.
pub fn concat_all(streams: Vec<EventStream>) -> EventStream {
    stream::iter(streams).flatten().boxed()
}

/// One array per round holding the next value of every branch. Ends with
/// the shortest branch.
pub fn zip_all(streams: Vec<EventStream>) -> EventStream {
    stream::unfold(streams, |mut streams| async move {
        if streams.is_empty() {
            return None;
        }
        let items = future::join_all(streams.iter_mut().map(|s| s.next())).await;
        let mut row = Vec::with_capacity(items.len());
        for item in items {
            match item? {
                Ok(Event::Data(v)) => row.push(v),
                Ok(Event::Group(_)) => {
                    let err = EvalError::UnexpectedGroup { stage: "zip".into() };
                    return Some((Err(err), streams));
                }
                Err(e) => return Some((Err(e), streams)),
            }
        }
        Some((Ok(Event::Data(Value::Array(row))), streams))
    })
    .boxed()
}

enum Race {
    Running(Vec<EventStream>),
    Won(EventStream),
}

/// The first branch to emit wins and the others are dropped. Branches that
/// complete without emitting leave the race.
pub fn race(streams: Vec<EventStream>) -> EventStream {
    stream::unfold(Race::Running(streams), |state| async move {
        match state {
            Race::Won(mut winner) => {
                let item = winner.next().await?;
                Some((item, Race::Won(winner)))
            }
            Race::Running(mut streams) => loop {
                if streams.is_empty() {
                    return None;
                }
                let (item, index) = {
                    let (item, index, rest) =
                        future::select_all(streams.iter_mut().map(|s| s.next())).await;
                    drop(rest);
                    (item, index)
                };
                let branch = streams.swap_remove(index);
                if let Some(item) = item {
                    return Some((item, Race::Won(branch)));
                }
            },
        }
    })
    .boxed()
}

/// Run every branch over a copy of `input` and join their outputs.
pub fn fork(
    input: EventStream,
    scope: Scope,
    branches: &[Transform],
    join: JoinStrategy,
) -> EventStream {
    let (driver, taps) = multicast(input, branches.len());
    let outputs: Vec<EventStream> = branches
        .iter()
        .zip(taps)
        .map(|(branch, tap)| branch.apply(tap, scope.clone()))
        .collect();
    let joined = match join {
        JoinStrategy::Merge => merge_all(outputs),
        JoinStrategy::Zip => zip_all(outputs),
        JoinStrategy::Race => race(outputs),
        JoinStrategy::Concat => concat_all(outputs),
    };
    Driven::new(driver, joined).boxed()
}
