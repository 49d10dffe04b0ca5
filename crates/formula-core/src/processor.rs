use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::mem;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::callback::{BindingKey, Bindings, CallbackStore, Handler, ScopeKey};
use crate::collections::map::HashMap;
use crate::context::FormulaContext;
use crate::error::{FormulaError, Result};
use crate::formula::{Evaluation, Formula, Transition};
use crate::lock::{ProcessingPass, TransitionLock};
use crate::stream::{Update, UpdateManager};

/// Receives the effect of every transition that changed something.
pub(crate) type TransitionListener<E> = Box<dyn Fn(Option<E>) -> Result<()>>;

/// Handler turning a child's effect into a transition of its parent.
pub(crate) type ChildEffectHandler<S, E, CE> = Rc<dyn Fn(&S, CE) -> Transition<S, E>>;

/// Private state slot of a child: formula type plus optional caller key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ChildKey {
    pub(crate) formula: TypeId,
    pub(crate) key: Option<u64>,
}

/// Evaluation tree node of one formula instance.
pub(crate) struct ManagerInner<S: 'static, E: 'static> {
    state: RefCell<S>,
    lock: Rc<TransitionLock>,
    bindings: Rc<Bindings>,
    on_transition: TransitionListener<E>,
    pub(crate) callbacks: RefCell<CallbackStore>,
    updates: RefCell<UpdateManager>,
    declared: RefCell<Vec<Update>>,
    children: RefCell<HashMap<ChildKey, ChildEntry>>,
    terminated: Cell<bool>,
}

struct ChildEntry {
    node: Rc<dyn ChildNode>,
    typed: Rc<dyn Any>,
    used: bool,
}

/// Type-erased view of a child used during reconciliation.
trait ChildNode {
    fn next_frame(&self, pass: ProcessingPass) -> Result<bool>;
    fn terminate(&self);
}

struct ChildSlot<C: Formula, S: 'static, E: 'static> {
    manager: Rc<ManagerInner<C::State, C::Effect>>,
    on_effect: RefCell<ChildEffectHandler<S, E, C::Effect>>,
    _formula: PhantomData<fn(&C)>,
}

impl<C: Formula, S: 'static, E: 'static> ChildNode for ChildSlot<C, S, E> {
    fn next_frame(&self, pass: ProcessingPass) -> Result<bool> {
        self.manager.next_frame(pass)
    }

    fn terminate(&self) {
        self.manager.terminate();
    }
}

impl<S: Clone + 'static, E: 'static> ManagerInner<S, E> {
    pub(crate) fn new(
        state: S,
        lock: Rc<TransitionLock>,
        bindings: Rc<Bindings>,
        on_transition: TransitionListener<E>,
    ) -> Self {
        Self {
            state: RefCell::new(state),
            lock,
            bindings,
            on_transition,
            callbacks: RefCell::new(CallbackStore::default()),
            updates: RefCell::new(UpdateManager::default()),
            declared: RefCell::new(Vec::new()),
            children: RefCell::new(HashMap::new()),
            terminated: Cell::new(false),
        }
    }

    pub(crate) fn bindings(&self) -> &Rc<Bindings> {
        &self.bindings
    }

    pub(crate) fn state(&self) -> S {
        self.state.borrow().clone()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.get()
    }

    /// Compute a transition from a copy of the live state and apply it.
    ///
    /// No borrow is held while `f` runs, so it may invoke other callbacks of
    /// the same tree. Their transitions are applied before the one `f` returns.
    pub(crate) fn transition_with(&self, f: impl FnOnce(&S) -> Transition<S, E>) -> Result<()> {
        if self.terminated.get() {
            return Err(FormulaError::lifecycle("transition"));
        }
        let state = self.state();
        let transition = f(&state);
        if transition.is_none() {
            return Ok(());
        }
        self.forward(transition)
    }

    /// Apply `transition` and notify the listener even if it carries nothing,
    /// which is how a child's state change reaches the root.
    fn forward(&self, transition: Transition<S, E>) -> Result<()> {
        if self.terminated.get() {
            return Err(FormulaError::lifecycle("transition"));
        }
        let Transition { state, effect } = transition;
        if let Some(state) = state {
            let previous = self.state.replace(state);
            drop(previous);
        }
        (self.on_transition)(effect)
    }

    /// Bind `handler` to the arena slot of `scope` for this pass.
    pub(crate) fn bind_handler<T: 'static>(
        self: &Rc<Self>,
        scope: ScopeKey,
        handler: impl Fn(&S, T) -> Transition<S, E> + 'static,
    ) -> BindingKey {
        let manager = Rc::downgrade(self);
        let handler: Handler<T> = Rc::new(move |value: T| match manager.upgrade() {
            Some(manager) => manager.transition_with(|state| handler(state, value)),
            None => Err(FormulaError::lifecycle("invoke callback")),
        });
        self.callbacks
            .borrow_mut()
            .bind(scope, &self.bindings, handler)
    }

    /// Run `formula` against a snapshot of the current state.
    pub(crate) fn evaluate<F>(
        self: &Rc<Self>,
        formula: &F,
        input: &F::Input,
        pass: ProcessingPass,
    ) -> F::RenderModel
    where
        F: Formula<State = S, Effect = E>,
    {
        self.callbacks.borrow_mut().begin_pass();
        for entry in self.children.borrow_mut().values_mut() {
            entry.used = false;
        }

        let snapshot = self.state();
        let Evaluation {
            render_model,
            updates,
        } = {
            let mut context = FormulaContext::new(self, pass);
            formula.evaluate(input, &snapshot, &mut context)
        };

        let released = self.callbacks.borrow_mut().end_pass();
        for binding in released {
            self.bindings.release(binding);
        }
        let stale = mem::replace(&mut *self.declared.borrow_mut(), updates);
        drop(stale);
        render_model
    }

    /// Evaluate the child stored under `key`, creating its slot on first use.
    pub(crate) fn evaluate_child<C: Formula>(
        self: &Rc<Self>,
        key: ChildKey,
        formula: &C,
        input: C::Input,
        on_effect: ChildEffectHandler<S, E, C::Effect>,
        pass: ProcessingPass,
    ) -> C::RenderModel {
        let existing = self.children.borrow_mut().get_mut(&key).and_then(|entry| {
            entry.used = true;
            entry.typed.clone().downcast::<ChildSlot<C, S, E>>().ok()
        });

        let slot = match existing {
            Some(slot) => {
                *slot.on_effect.borrow_mut() = on_effect;
                slot
            }
            None => {
                let slot = self.create_child(formula, &input, on_effect);
                let previous = self.children.borrow_mut().insert(
                    key,
                    ChildEntry {
                        node: slot.clone(),
                        typed: slot.clone(),
                        used: true,
                    },
                );
                if let Some(previous) = previous {
                    previous.node.terminate();
                }
                slot
            }
        };
        slot.manager.evaluate(formula, &input, pass)
    }

    fn create_child<C: Formula>(
        self: &Rc<Self>,
        formula: &C,
        input: &C::Input,
        on_effect: ChildEffectHandler<S, E, C::Effect>,
    ) -> Rc<ChildSlot<C, S, E>> {
        let parent = Rc::downgrade(self);
        let initial = formula.initial_state(input);
        Rc::new_cyclic(|slot: &Weak<ChildSlot<C, S, E>>| {
            let slot = slot.clone();
            let listener: TransitionListener<C::Effect> = Box::new(move |effect| {
                let parent = parent
                    .upgrade()
                    .ok_or_else(|| FormulaError::lifecycle("propagate child transition"))?;
                let Some(effect) = effect else {
                    return parent.forward(Transition::none());
                };
                let slot = slot
                    .upgrade()
                    .ok_or_else(|| FormulaError::lifecycle("propagate child effect"))?;
                let on_effect = slot.on_effect.borrow().clone();
                let state = parent.state();
                let transition = on_effect(&state, effect);
                parent.forward(transition)
            });
            ChildSlot {
                manager: Rc::new(ManagerInner::new(
                    initial,
                    self.lock.clone(),
                    self.bindings.clone(),
                    listener,
                )),
                on_effect: RefCell::new(on_effect),
                _formula: PhantomData,
            }
        })
    }

    /// Reconcile updates and children declared by the last evaluation.
    ///
    /// Returns true as soon as a transition happened during `pass`.
    pub(crate) fn next_frame(&self, pass: ProcessingPass) -> Result<bool> {
        if self.terminated.get() {
            return Err(FormulaError::lifecycle("process a frame"));
        }

        let declared = mem::take(&mut *self.declared.borrow_mut());
        let removed = self.updates.borrow_mut().take_removed(&declared);
        for cancelable in removed {
            cancelable.cancel();
        }
        if self.lock.has_transitioned(pass) {
            return Ok(true);
        }

        let (unused, active) = {
            let mut children = self.children.borrow_mut();
            let mut unused: SmallVec<[Rc<dyn ChildNode>; 4]> = SmallVec::new();
            children.retain(|_, entry| {
                if !entry.used {
                    unused.push(entry.node.clone());
                }
                entry.used
            });
            let active: SmallVec<[Rc<dyn ChildNode>; 4]> =
                children.values().map(|entry| entry.node.clone()).collect();
            (unused, active)
        };
        if !unused.is_empty() {
            tracing::debug!(count = unused.len(), "terminating undeclared child formulas");
        }
        for child in unused {
            child.terminate();
        }
        if self.lock.has_transitioned(pass) {
            return Ok(true);
        }
        for child in active {
            if child.next_frame(pass)? {
                return Ok(true);
            }
        }

        for update in declared {
            UpdateManager::start(&self.updates, update)?;
            if self.lock.has_transitioned(pass) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop every subscription in this subtree and release its callbacks.
    pub(crate) fn terminate(&self) {
        if self.terminated.replace(true) {
            return;
        }
        self.declared.borrow_mut().clear();

        let running = self.updates.borrow_mut().take_all();
        for cancelable in running {
            cancelable.cancel();
        }

        let children: SmallVec<[Rc<dyn ChildNode>; 4]> = self
            .children
            .borrow_mut()
            .drain()
            .map(|(_, entry)| entry.node)
            .collect();
        for child in children {
            child.terminate();
        }

        let bindings = self.callbacks.borrow_mut().drain();
        for binding in bindings {
            self.bindings.release(binding);
        }
    }

    #[cfg(test)]
    pub(crate) fn running_updates(&self) -> usize {
        self.updates.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn child_count(&self) -> usize {
        self.children.borrow().len()
    }
}

/// Owns the state of the root formula and drives its evaluation tree.
pub(crate) struct ProcessorManager<F: Formula> {
    inner: Rc<ManagerInner<F::State, F::Effect>>,
    _formula: PhantomData<fn(&F)>,
}

impl<F: Formula> ProcessorManager<F> {
    pub(crate) fn new(
        state: F::State,
        lock: Rc<TransitionLock>,
        bindings: Rc<Bindings>,
        on_transition: TransitionListener<F::Effect>,
    ) -> Self {
        Self {
            inner: Rc::new(ManagerInner::new(state, lock, bindings, on_transition)),
            _formula: PhantomData,
        }
    }

    /// Evaluate the root formula for `pass`.
    ///
    /// Transitions raised while evaluating update the state right away and are
    /// reported to the listener; they never re-enter this method.
    pub(crate) fn evaluate(
        &self,
        formula: &F,
        input: &F::Input,
        pass: ProcessingPass,
    ) -> Result<F::RenderModel> {
        if self.inner.is_terminated() {
            return Err(FormulaError::lifecycle("evaluate"));
        }
        Ok(self.inner.evaluate(formula, input, pass))
    }

    /// Returns true if the render model produced for `pass` is stale.
    pub(crate) fn next_frame(&self, pass: ProcessingPass) -> Result<bool> {
        self.inner.next_frame(pass)
    }

    pub(crate) fn terminate(&self) {
        self.inner.terminate();
    }

    #[cfg(test)]
    pub(crate) fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> F::State {
        self.inner.state()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Rc<ManagerInner<F::State, F::Effect>> {
        &self.inner
    }
}

#[cfg(test)]
#[path = "tests/processor_tests.rs"]
mod tests;
