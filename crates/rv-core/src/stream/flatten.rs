use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, SelectAll, Stream};
use futures::StreamExt;
use rv_lang::MergeStrategy;

use super::{Event, EventResult, EventStream, Group, Transform};
use crate::engine::Scope;
use crate::error::EvalError;

type BodyFn = Box<dyn FnMut(Group) -> EventStream + Send>;

/// Flattens a stream of sub-streams, running at most `limit` of them at
/// once. Sub-streams past the limit wait in arrival order, so a limit of
/// one concatenates. The outer stream is always drained, which keeps
/// grouping stages feeding the sub-streams that are already running.
pub struct Flatten {
    outer: Option<EventStream>,
    pending: VecDeque<EventStream>,
    active: SelectAll<EventStream>,
    limit: Option<usize>,
    body: BodyFn,
    stage: String,
    inline_data: bool,
}

impl Flatten {
    pub fn new(
        outer: EventStream,
        limit: Option<usize>,
        stage: impl Into<String>,
        body: impl FnMut(Group) -> EventStream + Send + 'static,
    ) -> Self {
        Self {
            outer: Some(outer),
            pending: VecDeque::new(),
            active: SelectAll::new(),
            limit: limit.map(|n| n.max(1)),
            body: Box::new(body),
            stage: stage.into(),
            inline_data: false,
        }
    }

    /// Pass plain data events through as one-item sub-streams instead of
    /// failing with [`EvalError::ExpectedGroup`].
    pub fn inline_data(mut self) -> Self {
        self.inline_data = true;
        self
    }

    fn can_promote(&self) -> bool {
        !self.pending.is_empty() && self.limit.is_none_or(|n| self.active.len() < n)
    }

    fn promote(&mut self) {
        while self.can_promote() {
            if let Some(next) = self.pending.pop_front() {
                self.active.push(next);
            }
        }
    }
}

impl Stream for Flatten {
    type Item = EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EventResult>> {
        let this = &mut *self;
        loop {
            let mut progressed = false;

            if let Some(outer) = this.outer.as_mut() {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(Event::Group(group)))) => {
                        this.pending.push_back((this.body)(group));
                        progressed = true;
                    }
                    Poll::Ready(Some(Ok(Event::Data(value)))) => {
                        if !this.inline_data {
                            return Poll::Ready(Some(Err(EvalError::ExpectedGroup {
                                stage: this.stage.clone(),
                            })));
                        }
                        this.pending
                            .push_back(stream::once(async move { Ok(Event::Data(value)) }).boxed());
                        progressed = true;
                    }
                    Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                    Poll::Ready(None) => {
                        this.outer = None;
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }

            this.promote();

            if !this.active.is_empty() {
                match this.active.poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                    // every running sub-stream finished
                    Poll::Ready(None) => progressed = true,
                    Poll::Pending => {}
                }
            }

            if this.outer.is_none() && this.pending.is_empty() && this.active.is_empty() {
                return Poll::Ready(None);
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Split blocks
// ---------------------------------------------------------------------------

/// Run `body` over every sub-stream of `groups` with `@group` bound to the
/// sub-stream's key, and flatten the results per `merge`.
pub fn split(
    groups: EventStream,
    scope: Scope,
    stage: &str,
    body: Transform,
    merge: MergeStrategy,
) -> EventStream {
    let limit = match merge {
        MergeStrategy::Merge { limit } => limit,
        MergeStrategy::Concat => Some(1),
    };
    Flatten::new(groups, limit, stage, move |group: Group| {
        body.apply(group.events, scope.with_group(group.key))
    })
    .boxed()
}

/// Flatten any sub-streams left in a pipeline's output, in order, so a run
/// always yields plain values.
pub fn flatten_groups(input: EventStream) -> EventStream {
    Flatten::new(input, Some(1), "output", |group: Group| flatten_groups(group.events))
        .inline_data()
        .boxed()
}
