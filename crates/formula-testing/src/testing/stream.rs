use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use formula_core::{Cancelable, EventCallback, Result, Stream, StreamError};

struct Subscriber<M> {
    id: u64,
    emitter: EventCallback<M>,
}

struct ManualState<M> {
    starts: usize,
    cancels: usize,
    next_id: u64,
    subscribers: Vec<Subscriber<M>>,
}

/// A stream whose messages are pushed by the test.
///
/// Clones share their subscribers and counters, so a test can keep one clone
/// and hand another to the formula under test.
pub struct ManualStream<M> {
    state: Rc<RefCell<ManualState<M>>>,
    burst: Rc<Vec<M>>,
}

impl<M: Clone + 'static> ManualStream<M> {
    pub fn new() -> Self {
        Self::with_burst(Vec::new())
    }

    /// A stream that sends `burst` synchronously every time it starts.
    pub fn with_burst(burst: Vec<M>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ManualState {
                starts: 0,
                cancels: 0,
                next_id: 0,
                subscribers: Vec::new(),
            })),
            burst: Rc::new(burst),
        }
    }

    /// Send `message` to every active subscriber, in subscription order.
    pub fn emit(&self, message: M) -> Result<()> {
        let emitters: Vec<EventCallback<M>> = self
            .state
            .borrow()
            .subscribers
            .iter()
            .map(|subscriber| subscriber.emitter.clone())
            .collect();
        for emitter in emitters {
            emitter.invoke(message.clone())?;
        }
        Ok(())
    }

    pub fn starts(&self) -> usize {
        self.state.borrow().starts
    }

    pub fn cancels(&self) -> usize {
        self.state.borrow().cancels
    }

    /// Number of subscriptions started and not yet cancelled.
    pub fn active(&self) -> usize {
        self.state.borrow().subscribers.len()
    }
}

impl<M: Clone + 'static> Default for ManualStream<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for ManualStream<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            burst: self.burst.clone(),
        }
    }
}

impl<M> fmt::Debug for ManualStream<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualStream")
            .field("starts", &state.starts)
            .field("cancels", &state.cancels)
            .field("active", &state.subscribers.len())
            .finish()
    }
}

impl<M: Clone + 'static> Stream for ManualStream<M> {
    type Message = M;

    fn start(&self, emitter: EventCallback<M>) -> std::result::Result<Cancelable, StreamError> {
        self.state.borrow_mut().starts += 1;
        for message in self.burst.iter() {
            emitter.invoke(message.clone())?;
        }

        // Only a start that returns a cancelable counts as a subscriber.
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push(Subscriber { id, emitter });
            id
        };

        let state = self.state.clone();
        Ok(Cancelable::new(move || {
            let mut state = state.borrow_mut();
            state.cancels += 1;
            state.subscribers.retain(|subscriber| subscriber.id != id);
        }))
    }
}
