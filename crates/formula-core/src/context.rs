use std::any::TypeId;
use std::hash::Hash;
use std::rc::Rc;

use crate::callback::{Callback, CallbackStore, EventCallback, ScopeKey};
use crate::formula::{Formula, Transition};
use crate::hash::hash_key;
use crate::lock::ProcessingPass;
use crate::processor::{ChildKey, ManagerInner};
use crate::stream::{Stream, Update};

/// Declarations available to a formula while it is being evaluated.
///
/// Handlers passed to the context receive a copy of the live state at the time
/// they run, which may be newer than the snapshot the current pass evaluates
/// against. A handler may invoke other callbacks of the same runtime. Those
/// transitions are applied first, and the handler's own transition is applied
/// on top of them once it returns.
///
/// # Collisions
///
/// The `_keyed` declarations, [`Self::events`] and [`Self::child_keyed`] identify
/// their slot by a 64-bit hash of the key, scoped by the message, stream or
/// formula type. Two different keys with the same hash share one slot: a
/// child keeps the state of the other key and the last callback bound wins.
/// Use keys whose [`Hash`] is derived from every field that tells them apart.
///
/// Unkeyed callbacks are identified by the order in which they are declared.
/// Declare them in the same order on every pass, or use the `_keyed` variants
/// for anything conditional or list-like.
pub struct FormulaContext<'a, S: 'static, E: 'static> {
    manager: &'a Rc<ManagerInner<S, E>>,
    pass: ProcessingPass,
}

impl<'a, S: Clone + 'static, E: 'static> FormulaContext<'a, S, E> {
    pub(crate) fn new(manager: &'a Rc<ManagerInner<S, E>>, pass: ProcessingPass) -> Self {
        Self { manager, pass }
    }

    /// The pass currently being evaluated.
    pub fn pass(&self) -> ProcessingPass {
        self.pass
    }

    pub fn callback(&mut self, handler: impl Fn(&S) -> Transition<S, E> + 'static) -> Callback {
        let scope = self.manager.callbacks.borrow_mut().positional::<()>();
        self.bind_callback(scope, handler)
    }

    /// A callback identified by `key` instead of its declaration order.
    ///
    /// See [Collisions](Self#collisions).
    pub fn callback_keyed<K: Hash + ?Sized>(
        &mut self,
        key: &K,
        handler: impl Fn(&S) -> Transition<S, E> + 'static,
    ) -> Callback {
        let scope = CallbackStore::keyed::<K, ()>(key);
        self.bind_callback(scope, handler)
    }

    pub fn event_callback<T: 'static>(
        &mut self,
        handler: impl Fn(&S, T) -> Transition<S, E> + 'static,
    ) -> EventCallback<T> {
        let scope = self.manager.callbacks.borrow_mut().positional::<T>();
        self.bind_event_callback(scope, handler)
    }

    /// Like [`Self::callback_keyed`], for a callback taking a value.
    ///
    /// See [Collisions](Self#collisions).
    pub fn event_callback_keyed<K: Hash + ?Sized, T: 'static>(
        &mut self,
        key: &K,
        handler: impl Fn(&S, T) -> Transition<S, E> + 'static,
    ) -> EventCallback<T> {
        let scope = CallbackStore::keyed::<K, T>(key);
        self.bind_event_callback(scope, handler)
    }

    /// Declare a subscription to `stream`, identified by `key` and the stream type.
    ///
    /// The returned update must be part of this pass's [`Evaluation`](crate::Evaluation)
    /// for the subscription to start or keep running. See [Collisions](Self#collisions).
    pub fn events<K: Hash + ?Sized, St: Stream>(
        &mut self,
        key: &K,
        stream: St,
        handler: impl Fn(&S, St::Message) -> Transition<S, E> + 'static,
    ) -> Update {
        let key = hash_key(key);
        let scope = ScopeKey::Stream {
            key,
            stream: TypeId::of::<St>(),
        };
        let emitter = self.bind_event_callback(scope, handler);
        Update::new(key, stream, emitter)
    }

    /// Evaluate a child formula in this formula's scope and return its render model.
    ///
    /// The child keeps its own state for as long as it is declared on every pass.
    /// Its effects are turned into transitions of this formula by `on_effect`.
    pub fn child<C: Formula>(
        &mut self,
        formula: &C,
        input: C::Input,
        on_effect: impl Fn(&S, C::Effect) -> Transition<S, E> + 'static,
    ) -> C::RenderModel {
        let key = ChildKey {
            formula: TypeId::of::<C>(),
            key: None,
        };
        self.manager
            .evaluate_child(key, formula, input, Rc::new(on_effect), self.pass)
    }

    /// Like [`Self::child`], for several children of the same formula type.
    ///
    /// See [Collisions](Self#collisions).
    pub fn child_keyed<K: Hash + ?Sized, C: Formula>(
        &mut self,
        key: &K,
        formula: &C,
        input: C::Input,
        on_effect: impl Fn(&S, C::Effect) -> Transition<S, E> + 'static,
    ) -> C::RenderModel {
        let key = ChildKey {
            formula: TypeId::of::<C>(),
            key: Some(hash_key(key)),
        };
        self.manager
            .evaluate_child(key, formula, input, Rc::new(on_effect), self.pass)
    }

    fn bind_callback(
        &mut self,
        scope: ScopeKey,
        handler: impl Fn(&S) -> Transition<S, E> + 'static,
    ) -> Callback {
        Callback::new(self.bind_event_callback(scope, move |state: &S, ()| handler(state)))
    }

    fn bind_event_callback<T: 'static>(
        &mut self,
        scope: ScopeKey,
        handler: impl Fn(&S, T) -> Transition<S, E> + 'static,
    ) -> EventCallback<T> {
        let binding = self.manager.bind_handler(scope, handler);
        EventCallback::new(self.manager.bindings().runtime().clone(), binding)
    }
}
