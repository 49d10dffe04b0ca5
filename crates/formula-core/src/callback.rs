//! Identity-stable callback handles.
//!
//! A formula re-creates its closures on every evaluation pass. To keep render
//! models comparable across passes, the closures are not handed to the UI
//! directly. Each declaration is instead resolved to a slot in the runtime's
//! binding arena:
//!
//! - [`CallbackStore`] maps a scope key (explicit key hash, or the occurrence
//!   index of an unkeyed declaration) to an arena slot, per formula instance.
//! - Every pass overwrites the slot with the freshly declared closure.
//! - [`Callback`] and [`EventCallback`] are just the slot id, so two handles
//!   declared with the same key in consecutive passes compare equal.
//!
//! Slots that are not declared during a pass are released when the pass ends.
//! Invoking a handle whose slot was released is ignored.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::collections::map::HashMap;
use crate::error::Result;
use crate::handle::RuntimeHandle;
use crate::hash::hash_key;

new_key_type! {
    /// Arena slot holding the current binding of one callback handle.
    pub struct BindingKey;
}

/// Type-erased entry point stored in a binding slot.
pub(crate) type Handler<T> = Rc<dyn Fn(T) -> Result<()>>;

/// Generational arena of the closures currently bound to callback handles.
///
/// One arena exists per runtime and is shared by every formula in its tree.
pub(crate) struct Bindings {
    runtime: RuntimeHandle,
    slots: RefCell<SlotMap<BindingKey, Box<dyn Any>>>, // holds `Handler<T>` values
}

impl Bindings {
    pub(crate) fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            slots: RefCell::new(SlotMap::with_key()),
        }
    }

    pub(crate) fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// Rebind `key` if it is still live, otherwise allocate a new slot.
    pub(crate) fn bind<T: 'static>(
        &self,
        key: Option<BindingKey>,
        handler: Handler<T>,
    ) -> BindingKey {
        let mut slots = self.slots.borrow_mut();
        if let Some(key) = key {
            if let Some(slot) = slots.get_mut(key) {
                let previous = mem::replace(slot, Box::new(handler));
                drop(slots);
                drop(previous);
                return key;
            }
        }
        slots.insert(Box::new(handler))
    }

    pub(crate) fn handler<T: 'static>(&self, key: BindingKey) -> Option<Handler<T>> {
        self.slots
            .borrow()
            .get(key)
            .and_then(|slot| slot.downcast_ref::<Handler<T>>())
            .cloned()
    }

    pub(crate) fn release(&self, key: BindingKey) {
        let removed = self.slots.borrow_mut().remove(key);
        drop(removed);
    }

    pub(crate) fn clear(&self) {
        let drained = mem::take(&mut *self.slots.borrow_mut());
        drop(drained);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}

/// Position of a declaration within one formula's evaluation scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ScopeKey {
    /// Unkeyed callback, identified by its occurrence index in the pass.
    Positional { index: u32, message: TypeId },
    /// Callback with a caller-supplied key.
    Keyed { key: u64, message: TypeId },
    /// Handler of a stream subscription.
    Stream { key: u64, stream: TypeId },
}

struct StoreEntry {
    binding: BindingKey,
    seen: bool,
}

/// Per-formula cache from scope keys to arena slots, retained across passes.
#[derive(Default)]
pub(crate) struct CallbackStore {
    entries: HashMap<ScopeKey, StoreEntry>,
    next_index: u32,
    #[cfg(debug_assertions)]
    previous_order: Vec<TypeId>,
    #[cfg(debug_assertions)]
    current_order: Vec<TypeId>,
}

impl CallbackStore {
    pub(crate) fn begin_pass(&mut self) {
        self.next_index = 0;
        for entry in self.entries.values_mut() {
            entry.seen = false;
        }
        #[cfg(debug_assertions)]
        {
            self.previous_order = mem::take(&mut self.current_order);
        }
    }

    pub(crate) fn positional<T: 'static>(&mut self) -> ScopeKey {
        let index = self.next_index;
        self.next_index += 1;
        let message = TypeId::of::<T>();
        #[cfg(debug_assertions)]
        self.check_order(index, message);
        ScopeKey::Positional { index, message }
    }

    pub(crate) fn keyed<K: Hash + ?Sized, T: 'static>(key: &K) -> ScopeKey {
        ScopeKey::Keyed {
            key: hash_key(key),
            message: TypeId::of::<T>(),
        }
    }

    /// Bind `handler` to the slot of `scope`, allocating one on first use.
    pub(crate) fn bind<T: 'static>(
        &mut self,
        scope: ScopeKey,
        bindings: &Bindings,
        handler: Handler<T>,
    ) -> BindingKey {
        let existing = self.entries.get(&scope).map(|entry| {
            if entry.seen {
                tracing::warn!(
                    ?scope,
                    "callback key declared twice in one pass; the last declaration wins"
                );
            }
            entry.binding
        });
        let binding = bindings.bind(existing, handler);
        self.entries.insert(scope, StoreEntry { binding, seen: true });
        binding
    }

    /// Drop entries that were not declared since [`Self::begin_pass`].
    pub(crate) fn end_pass(&mut self) -> SmallVec<[BindingKey; 4]> {
        let mut released = SmallVec::new();
        self.entries.retain(|_, entry| {
            if !entry.seen {
                released.push(entry.binding);
            }
            entry.seen
        });
        released
    }

    pub(crate) fn drain(&mut self) -> SmallVec<[BindingKey; 4]> {
        self.entries.drain().map(|(_, entry)| entry.binding).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(debug_assertions)]
    fn check_order(&mut self, index: u32, message: TypeId) {
        if let Some(previous) = self.previous_order.get(index as usize) {
            if *previous != message {
                tracing::warn!(
                    index,
                    "unkeyed callback changed its message type between passes; \
                     declare unkeyed callbacks in a stable order or give them a key"
                );
            }
        }
        self.current_order.push(message);
    }
}

/// Handle to a transition that takes a value of type `T`.
///
/// Equality and hashing use the handle's identity only, never the closure it is
/// bound to. Invoking it runs whatever closure the latest pass bound.
pub struct EventCallback<T> {
    runtime: RuntimeHandle,
    binding: BindingKey,
    _message: PhantomData<fn(T)>,
}

impl<T: 'static> EventCallback<T> {
    pub(crate) fn new(runtime: RuntimeHandle, binding: BindingKey) -> Self {
        Self {
            runtime,
            binding,
            _message: PhantomData,
        }
    }

    /// Run the currently bound transition with `value`.
    ///
    /// Fails with [`FormulaError::ThreadAffinity`](crate::FormulaError::ThreadAffinity)
    /// off the owner thread and with [`FormulaError::Lifecycle`](crate::FormulaError::Lifecycle)
    /// once the runtime has been terminated. Both checks happen before any state changes.
    pub fn invoke(&self, value: T) -> Result<()> {
        let bindings = self.runtime.bindings("invoke callback")?;
        match bindings.handler::<T>(self.binding) {
            Some(handler) => handler(value),
            None => {
                tracing::debug!(
                    binding = ?self.binding,
                    "ignoring invocation of a released callback"
                );
                Ok(())
            }
        }
    }

    pub fn binding(&self) -> BindingKey {
        self.binding
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }
}

impl<T> Clone for EventCallback<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            binding: self.binding,
            _message: PhantomData,
        }
    }
}

impl<T> PartialEq for EventCallback<T> {
    fn eq(&self, other: &Self) -> bool {
        self.binding == other.binding && self.runtime == other.runtime
    }
}

impl<T> Eq for EventCallback<T> {}

impl<T> Hash for EventCallback<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.runtime.id().hash(state);
        self.binding.hash(state);
    }
}

impl<T> fmt::Debug for EventCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCallback")
            .field("runtime", &self.runtime.id())
            .field("binding", &self.binding)
            .finish()
    }
}

/// Handle to a transition that takes no arguments.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Callback {
    inner: EventCallback<()>,
}

impl Callback {
    pub(crate) fn new(inner: EventCallback<()>) -> Self {
        Self { inner }
    }

    /// Run the currently bound transition. See [`EventCallback::invoke`].
    pub fn invoke(&self) -> Result<()> {
        self.inner.invoke(())
    }

    pub fn binding(&self) -> BindingKey {
        self.inner.binding()
    }
}

#[cfg(test)]
#[path = "tests/callback_tests.rs"]
mod tests;
