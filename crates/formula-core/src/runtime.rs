//! The processing loop that turns transitions into render models and effects.
//!
//! Every transition funnels into [`Driver::on_transition`]. Outside of a pass
//! it pumps passes until one completes without being superseded. Inside a pass
//! (a stream emitting while it starts, a callback invoked from the effect or
//! render sink) it only bumps the [`TransitionLock`] and returns, and the loop
//! notices that the in-flight pass is stale. Evaluation is never re-entered.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::callback::Bindings;
use crate::error::{FormulaError, Result};
use crate::formula::Formula;
use crate::handle::{register_runtime, unregister_runtime, RuntimeHandle};
use crate::lock::{ProcessingPass, TransitionLock};
use crate::processor::{ProcessorManager, TransitionListener};

/// Start a runtime for `formula`.
///
/// The calling thread becomes the owner thread: every transition must happen
/// on it. Nothing is evaluated until [`RenderModelChannel::subscribe`] is called.
pub fn start<F>(
    input: F::Input,
    formula: F,
    on_effect: impl FnMut(F::Effect) + 'static,
) -> RenderModelChannel<F>
where
    F: Formula,
    F::RenderModel: PartialEq + Clone,
{
    RenderModelChannel {
        input,
        formula,
        on_effect: Box::new(on_effect),
        runtime: RuntimeHandle::new(),
    }
}

/// A not yet subscribed runtime. It supports exactly one consumer.
pub struct RenderModelChannel<F: Formula> {
    input: F::Input,
    formula: F,
    on_effect: Box<dyn FnMut(F::Effect)>,
    runtime: RuntimeHandle,
}

impl<F> RenderModelChannel<F>
where
    F: Formula,
    F::RenderModel: PartialEq + Clone,
{
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// Run the initial pass and deliver every distinct render model to `on_render`.
    ///
    /// The initial render model is delivered before this returns. Dropping the
    /// returned [`Subscription`] terminates the runtime.
    pub fn subscribe(
        self,
        on_render: impl FnMut(F::RenderModel) + 'static,
    ) -> Result<Subscription> {
        self.runtime.check_thread()?;
        let driver = Driver::new(self, Box::new(on_render));
        let lifecycle: Rc<dyn Lifecycle> = driver.clone();
        let subscription = Subscription {
            runtime: driver.runtime.clone(),
            driver: Some(lifecycle),
        };
        // On failure the subscription drops here and terminates the runtime.
        driver.drive()?;
        Ok(subscription)
    }
}

/// Cancellation hook of a subscribed runtime.
pub struct Subscription {
    runtime: RuntimeHandle,
    driver: Option<Rc<dyn Lifecycle>>,
}

impl Subscription {
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn is_terminated(&self) -> bool {
        self.driver
            .as_ref()
            .map(|driver| driver.is_terminated())
            .unwrap_or(true)
    }

    /// Terminate the runtime. Equivalent to dropping the subscription.
    pub fn cancel(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.terminate();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("runtime", &self.runtime)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

trait Lifecycle {
    fn terminate(&self);
    fn is_terminated(&self) -> bool;
}

struct Driver<F: Formula> {
    formula: F,
    input: F::Input,
    runtime: RuntimeHandle,
    lock: Rc<TransitionLock>,
    bindings: Rc<Bindings>,
    manager: ProcessorManager<F>,
    effects: RefCell<VecDeque<F::Effect>>,
    on_effect: RefCell<Box<dyn FnMut(F::Effect)>>,
    on_render: RefCell<Box<dyn FnMut(F::RenderModel)>>,
    /// Render model of the first completed pass, held back until the initial gate opens.
    initial: RefCell<Option<F::RenderModel>>,
    last_emitted: RefCell<Option<F::RenderModel>>,
    has_initial_finished: Cell<bool>,
    processing: Cell<bool>,
    terminated: Cell<bool>,
}

impl<F> Driver<F>
where
    F: Formula,
    F::RenderModel: PartialEq + Clone,
{
    fn new(channel: RenderModelChannel<F>, on_render: Box<dyn FnMut(F::RenderModel)>) -> Rc<Self> {
        let RenderModelChannel {
            input,
            formula,
            on_effect,
            runtime,
        } = channel;
        let lock = Rc::new(TransitionLock::new());
        let bindings = Rc::new(Bindings::new(runtime.clone()));
        register_runtime(runtime.id(), &bindings);
        let state = formula.initial_state(&input);

        Rc::new_cyclic(|driver: &Weak<Self>| {
            let driver = driver.clone();
            let listener: TransitionListener<F::Effect> =
                Box::new(move |effect| match driver.upgrade() {
                    Some(driver) => driver.on_transition(effect),
                    None => Err(FormulaError::lifecycle("transition")),
                });
            Self {
                manager: ProcessorManager::new(state, lock.clone(), bindings.clone(), listener),
                formula,
                input,
                runtime,
                lock,
                bindings,
                effects: RefCell::new(VecDeque::new()),
                on_effect: RefCell::new(on_effect),
                on_render: RefCell::new(on_render),
                initial: RefCell::new(None),
                last_emitted: RefCell::new(None),
                has_initial_finished: Cell::new(false),
                processing: Cell::new(false),
                terminated: Cell::new(false),
            }
        })
    }

    /// Entry point of every transition reaching the root formula.
    ///
    /// The root state has already been replaced when this runs.
    fn on_transition(&self, effect: Option<F::Effect>) -> Result<()> {
        if self.terminated.get() {
            return Err(FormulaError::lifecycle("transition"));
        }
        if let Some(effect) = effect {
            self.effects.borrow_mut().push_back(effect);
        }
        if self.processing.get() {
            let superseding = self.lock.next();
            tracing::debug!(%superseding, "transition during an in-flight pass");
            return Ok(());
        }
        self.drive()
    }

    /// Pump passes until one completes without being superseded.
    fn drive(&self) -> Result<()> {
        let _processing = ProcessingGuard::enter(&self.processing);
        loop {
            if self.terminated.get() {
                return Ok(());
            }
            let pass = self.process()?;
            if self.terminated.get() {
                return Ok(());
            }
            if self.lock.has_transitioned(pass) {
                continue;
            }
            if !self.has_initial_finished.replace(true) {
                let initial = self.initial.borrow_mut().take();
                if let Some(render_model) = initial {
                    self.emit(render_model);
                }
                if self.lock.has_transitioned(pass) {
                    continue;
                }
            }
            return Ok(());
        }
    }

    /// Run one pass and return its token.
    ///
    /// The pass was abandoned if the lock has moved past the returned token.
    fn process(&self) -> Result<ProcessingPass> {
        let pass = self.lock.next();
        let span = tracing::debug_span!("formula_pass", generation = pass.generation());
        let _entered = span.enter();

        let render_model = self.manager.evaluate(&self.formula, &self.input, pass)?;
        if self.manager.next_frame(pass)? {
            tracing::debug!("pass superseded while evaluating");
            return Ok(pass);
        }

        loop {
            let next = self.effects.borrow_mut().pop_front();
            let Some(effect) = next else {
                break;
            };
            tracing::trace!("delivering effect");
            (self.on_effect.borrow_mut())(effect);
            if self.lock.has_transitioned(pass) {
                tracing::debug!("pass superseded while delivering effects");
                return Ok(pass);
            }
            if self.terminated.get() {
                return Ok(pass);
            }
        }

        if self.has_initial_finished.get() {
            self.emit(render_model);
        } else {
            *self.initial.borrow_mut() = Some(render_model);
        }
        Ok(pass)
    }

    fn emit(&self, render_model: F::RenderModel) {
        if self.last_emitted.borrow().as_ref() == Some(&render_model) {
            tracing::trace!("suppressing render model equal to the last emitted one");
            return;
        }
        *self.last_emitted.borrow_mut() = Some(render_model.clone());
        (self.on_render.borrow_mut())(render_model);
    }
}

impl<F> Lifecycle for Driver<F>
where
    F: Formula,
    F::RenderModel: PartialEq + Clone,
{
    fn terminate(&self) {
        if self.terminated.replace(true) {
            return;
        }
        tracing::debug!(runtime = ?self.runtime, "terminating formula runtime");
        self.effects.borrow_mut().clear();
        self.manager.terminate();
        self.bindings.clear();
        unregister_runtime(self.runtime.id());
    }

    fn is_terminated(&self) -> bool {
        self.terminated.get()
    }
}

impl<F: Formula> Drop for Driver<F> {
    fn drop(&mut self) {
        unregister_runtime(self.runtime.id());
    }
}

/// Marks the driver as busy for the duration of a pump, including unwinding.
struct ProcessingGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> ProcessingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
