//! Named subjects and the `emit` stage that publishes into them.

use std::collections::HashMap;
use std::fmt;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::Value;

use super::{Event, EventStream, ValueFn, data};
use crate::engine::Scope;
use crate::error::EvalError;
use crate::value::to_text;

type Subscribers = HashMap<String, Vec<UnboundedSender<Value>>>;

/// Named fan-out channels. Clones share the same table.
#[derive(Clone, Default)]
pub struct Subjects(Arc<Mutex<Subscribers>>);

impl fmt::Debug for Subjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subjects").field("names", &self.names()).finish()
    }
}

impl Subjects {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare `name` if needed and receive everything published to it from
    /// now on.
    pub fn subscribe(&self, name: impl Into<String>) -> UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded();
        self.lock().entry(name.into()).or_default().push(tx);
        rx
    }

    /// Deliver `value` to every live subscriber of `name`. Publishing to a
    /// subject nobody declared is an error; a declared subject whose
    /// receivers are all gone swallows the value.
    pub fn publish(&self, name: &str, value: Value) -> Result<(), EvalError> {
        let mut subjects = self.lock();
        let Some(subscribers) = subjects.get_mut(name) else {
            return Err(EvalError::UnknownSubject(name.to_string()));
        };
        subscribers.retain(|tx| tx.unbounded_send(value.clone()).is_ok());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Publish each value to the subject `subject(value)` names and pass it on.
/// With a `failure` subject, the first error (upstream or from publishing)
/// is published there as its message and the stream completes instead.
pub fn emit(input: EventStream, scope: Scope, subject: ValueFn, failure: Option<String>) -> EventStream {
    input
        .scan(false, move |done, item| {
            if *done {
                return future::ready(None);
            }
            let out = data("emit", item).and_then(|value| {
                let name = to_text(&subject(&value, &scope)?);
                scope.subjects().publish(&name, value.clone())?;
                Ok(Event::Data(value))
            });
            let out = match (out, &failure) {
                (Err(e), Some(channel)) => {
                    *done = true;
                    match scope.subjects().publish(channel, Value::String(e.to_string())) {
                        Ok(()) => return future::ready(None),
                        Err(missing) => Err(missing),
                    }
                }
                (out, _) => out,
            };
            future::ready(Some(out))
        })
        .boxed()
}
