use std::any::{type_name, TypeId};
use std::fmt;

use smallvec::SmallVec;

use crate::callback::EventCallback;
use crate::collections::map::HashMap;
use crate::error::{FormulaError, Result, StreamError};

/// An external source of messages, such as a timer, I/O or a UI event feed.
///
/// `start` is called once when an update with a new key is first declared.
/// The stream keeps running across passes for as long as the key keeps being
/// declared, and is cancelled through the returned [`Cancelable`] afterwards.
///
/// Messages must be delivered on the runtime's owner thread. Sending through
/// `emitter` from any other thread fails with a thread affinity error.
pub trait Stream: 'static {
    type Message: 'static;

    fn start(
        &self,
        emitter: EventCallback<Self::Message>,
    ) -> std::result::Result<Cancelable, StreamError>;
}

/// Teardown hook returned by [`Stream::start`].
#[must_use = "dropping a Cancelable does not stop the stream"]
pub struct Cancelable {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Cancelable {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// For streams that hold nothing to release.
    pub fn none() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Cancelable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancelable")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Identity of a stream subscription: the stream type plus the caller key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct UpdateKey {
    pub(crate) stream: TypeId,
    pub(crate) key: u64,
}

type Starter = Box<dyn FnOnce() -> std::result::Result<Cancelable, StreamError>>;

/// A stream subscription declared during evaluation.
///
/// Created with [`FormulaContext::events`](crate::FormulaContext::events).
pub struct Update {
    key: UpdateKey,
    name: &'static str,
    starter: Starter,
}

impl Update {
    pub(crate) fn new<St: Stream>(
        key: u64,
        stream: St,
        emitter: EventCallback<St::Message>,
    ) -> Self {
        Self {
            key: UpdateKey {
                stream: TypeId::of::<St>(),
                key,
            },
            name: type_name::<St>(),
            starter: Box::new(move || stream.start(emitter)),
        }
    }

    pub(crate) fn key(&self) -> UpdateKey {
        self.key
    }

    fn describe(&self) -> String {
        format!("{}#{:016x}", self.name, self.key.key)
    }

    fn start(self) -> Result<Cancelable> {
        let key = self.describe();
        tracing::debug!(stream = %key, "starting stream");
        (self.starter)().map_err(|source| FormulaError::Stream { key, source })
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("stream", &self.name)
            .field("key", &self.key.key)
            .finish()
    }
}

struct Running {
    name: &'static str,
    cancelable: Cancelable,
}

/// Running stream subscriptions of one formula, keyed by [`UpdateKey`].
#[derive(Default)]
pub(crate) struct UpdateManager {
    running: HashMap<UpdateKey, Running>,
}

impl UpdateManager {
    /// Remove subscriptions missing from `declared` and return their teardown hooks.
    pub(crate) fn take_removed(&mut self, declared: &[Update]) -> SmallVec<[Cancelable; 4]> {
        let mut removed = SmallVec::new();
        self.running.retain(|key, running| {
            let keep = declared.iter().any(|update| update.key == *key);
            if !keep {
                tracing::debug!(stream = running.name, "stopping stream");
                removed.push(std::mem::replace(&mut running.cancelable, Cancelable::none()));
            }
            keep
        });
        removed
    }

    pub(crate) fn is_running(&self, key: &UpdateKey) -> bool {
        self.running.contains_key(key)
    }

    /// Start `update` unless a subscription with the same key already runs.
    pub(crate) fn start(this: &std::cell::RefCell<Self>, update: Update) -> Result<()> {
        let key = update.key();
        if this.borrow().is_running(&key) {
            return Ok(());
        }
        let name = update.name;
        // The stream may emit synchronously, so no borrow is held while it starts.
        let cancelable = update.start()?;
        this.borrow_mut().running.insert(key, Running { name, cancelable });
        Ok(())
    }

    pub(crate) fn take_all(&mut self) -> SmallVec<[Cancelable; 4]> {
        self.running
            .drain()
            .map(|(_, running)| running.cancelable)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.running.len()
    }
}
