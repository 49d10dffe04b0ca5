use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use formula_core::{start, Formula, Result, RuntimeHandle, Subscription};

/// Runs a formula and records everything it emits.
///
/// Render models and effects are kept in emission order. The runtime is
/// terminated when the observer is cancelled or dropped.
pub struct FormulaTestObserver<F: Formula> {
    values: Rc<RefCell<Vec<F::RenderModel>>>,
    effects: Rc<RefCell<Vec<F::Effect>>>,
    subscription: Option<Subscription>,
}

impl<F> FormulaTestObserver<F>
where
    F: Formula,
    F::RenderModel: PartialEq + Clone,
{
    /// Start `formula` with `input` and subscribe to it on the calling thread.
    pub fn start(formula: F, input: F::Input) -> Result<Self> {
        let values = Rc::new(RefCell::new(Vec::new()));
        let effects = Rc::new(RefCell::new(Vec::new()));
        let subscription = {
            let values = values.clone();
            let effects = effects.clone();
            start(input, formula, move |effect| effects.borrow_mut().push(effect))
                .subscribe(move |value| values.borrow_mut().push(value))?
        };
        Ok(Self {
            values,
            effects,
            subscription: Some(subscription),
        })
    }

    /// Every render model emitted so far.
    pub fn values(&self) -> Vec<F::RenderModel> {
        self.values.borrow().clone()
    }

    /// The most recent render model.
    ///
    /// # Panics
    ///
    /// Panics if nothing has been emitted.
    pub fn last_value(&self) -> F::RenderModel {
        match self.values.borrow().last() {
            Some(value) => value.clone(),
            None => panic!("formula has not emitted a render model"),
        }
    }

    /// Read the most recent render model without cloning it, for example to
    /// pull a callback out of it.
    pub fn output<T>(&self, read: impl FnOnce(&F::RenderModel) -> T) -> T {
        let values = self.values.borrow();
        match values.last() {
            Some(value) => read(value),
            None => panic!("formula has not emitted a render model"),
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn assert_values(&self, expected: &[F::RenderModel])
    where
        F::RenderModel: Debug,
    {
        assert_eq!(self.values.borrow().as_slice(), expected, "unexpected render models");
    }

    pub fn effects(&self) -> Vec<F::Effect>
    where
        F::Effect: Clone,
    {
        self.effects.borrow().clone()
    }

    pub fn assert_effects(&self, expected: &[F::Effect])
    where
        F::Effect: PartialEq + Debug,
    {
        assert_eq!(self.effects.borrow().as_slice(), expected, "unexpected effects");
    }

    pub fn runtime(&self) -> Option<&RuntimeHandle> {
        self.subscription.as_ref().map(Subscription::runtime)
    }

    /// Terminate the runtime. Recorded values stay available.
    pub fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.subscription
            .as_ref()
            .map(Subscription::is_terminated)
            .unwrap_or(true)
    }
}
