//! Formulas and streams shared by the unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{
    Callback, Cancelable, Evaluation, EventCallback, Formula, FormulaContext, Stream, StreamError,
    Transition, Update,
};

#[derive(Default)]
struct StreamLog {
    starts: usize,
    cancels: usize,
    emitters: Vec<EventCallback<i32>>,
}

/// Stream driven by the test. Clones share the same log.
#[derive(Clone, Default)]
pub(crate) struct TestStream {
    log: Rc<RefCell<StreamLog>>,
    burst: Vec<i32>,
    fail: bool,
}

impl TestStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Emit `burst` synchronously from `start`.
    pub(crate) fn with_burst(burst: Vec<i32>) -> Self {
        Self {
            burst,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn starts(&self) -> usize {
        self.log.borrow().starts
    }

    pub(crate) fn cancels(&self) -> usize {
        self.log.borrow().cancels
    }

    /// Send `value` through the emitter of the most recent start.
    pub(crate) fn emit(&self, value: i32) -> crate::Result<()> {
        let emitter = self.log.borrow().emitters.last().cloned();
        match emitter {
            Some(emitter) => emitter.invoke(value),
            None => Ok(()),
        }
    }
}

impl Stream for TestStream {
    type Message = i32;

    fn start(&self, emitter: EventCallback<i32>) -> Result<Cancelable, StreamError> {
        {
            let mut log = self.log.borrow_mut();
            log.starts += 1;
            log.emitters.push(emitter.clone());
        }
        if self.fail {
            return Err("stream refused to start".into());
        }
        for value in &self.burst {
            emitter.invoke(*value)?;
        }
        let log = self.log.clone();
        Ok(Cancelable::new(move || log.borrow_mut().cancels += 1))
    }
}

/// Sums every message of the streams keyed by the input and reports each one as an effect.
pub(crate) struct Summing {
    pub(crate) stream: TestStream,
}

impl Formula for Summing {
    type Input = Vec<u64>;
    type State = i32;
    type Effect = i32;
    type RenderModel = i32;

    fn initial_state(&self, _input: &Vec<u64>) -> i32 {
        0
    }

    fn evaluate(
        &self,
        input: &Vec<u64>,
        state: &i32,
        context: &mut FormulaContext<'_, i32, i32>,
    ) -> Evaluation<i32> {
        let mut updates: Vec<Update> = Vec::new();
        for key in input {
            updates.push(context.events(key, self.stream.clone(), |sum, value| {
                Transition::to(sum + value).with_effect(value)
            }));
        }
        Evaluation::new(*state).with_updates(updates)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CounterModel {
    pub(crate) count: i32,
    pub(crate) bump: Callback,
    pub(crate) set: EventCallback<i32>,
}

/// `bump` increments and reports the new count as an effect, `set` replaces the count silently.
pub(crate) struct Counter;

impl Formula for Counter {
    type Input = ();
    type State = i32;
    type Effect = i32;
    type RenderModel = CounterModel;

    fn initial_state(&self, _input: &()) -> i32 {
        0
    }

    fn evaluate(
        &self,
        _input: &(),
        state: &i32,
        context: &mut FormulaContext<'_, i32, i32>,
    ) -> Evaluation<CounterModel> {
        let bump = context.callback(|count| Transition::to(count + 1).with_effect(count + 1));
        let set = context.event_callback(|_, value: i32| Transition::to(value));
        Evaluation::new(CounterModel {
            count: *state,
            bump,
            set,
        })
    }
}

pub(crate) type Recorded<T> = Rc<RefCell<Vec<T>>>;

/// A sink that appends to the returned log.
pub(crate) fn recorder<T: 'static>() -> (Recorded<T>, impl FnMut(T) + 'static) {
    let log: Recorded<T> = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let log = log.clone();
        move |value| log.borrow_mut().push(value)
    };
    (log, sink)
}
