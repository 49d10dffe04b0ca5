#![doc = r"Core runtime of a unidirectional, declarative state-management framework.

A [`Formula`] turns an input and its private state into a render model. The
runtime started with [`start`] re-evaluates the formula tree whenever a
callback, child or stream transitions the state, delivers effects to the host
in order and emits each distinct render model once."]

mod callback;
pub mod collections;
mod context;
mod error;
mod formula;
mod handle;
pub mod hash;
mod lock;
mod processor;
mod runtime;
mod stream;

pub use callback::{BindingKey, Callback, EventCallback};
pub use context::FormulaContext;
pub use error::{FormulaError, Result, StreamError};
pub use formula::{Evaluation, Formula, Transition};
pub use handle::RuntimeHandle;
pub use lock::{ProcessingPass, TransitionLock};
pub use runtime::{start, RenderModelChannel, Subscription};
pub use stream::{Cancelable, Stream, Update};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
