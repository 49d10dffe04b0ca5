//! Standard runtime services backed by Rust's `std` library.
//!
//! A formula runtime is confined to the thread that started it. Work done on
//! other threads has to hop back before it can transition any state. This
//! crate provides the hop: a [`StdScheduler`] that any thread can post to and
//! the owner thread drains, and a [`Ticker`] stream built on top of it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

mod ticker;

pub use ticker::Ticker;

type Task = Box<dyn FnOnce() + Send + 'static>;
type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Queue of tasks posted from any thread and run on the thread that drains it.
pub struct StdScheduler {
    tasks: Mutex<VecDeque<Task>>,
    wake_requested: AtomicBool,
    waker: RwLock<Option<Waker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            wake_requested: AtomicBool::new(false),
            waker: RwLock::new(None),
        }
    }

    /// Queue `task` to run on the next [`drain`](Self::drain).
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        self.queue().push_back(Box::new(task));
        self.wake_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Run every task queued so far, in submission order, on the calling thread.
    ///
    /// Tasks queued while draining run on the next call. Returns the number of
    /// tasks that ran.
    pub fn drain(&self) -> usize {
        self.wake_requested.store(false, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.queue());
        let count = tasks.len();
        for task in tasks {
            task();
        }
        if count > 0 {
            tracing::trace!(count, "drained scheduled tasks");
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Returns whether a task has been queued since the last call.
    pub fn take_wake_request(&self) -> bool {
        self.wake_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever a task is queued.
    ///
    /// The waker runs on the posting thread and should only signal the owner.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    /// Clears any registered waker.
    pub fn clear_waker(&self) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        let waker = self.waker.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("pending", &self.pending())
            .field("wake_requested", &self.wake_requested.load(Ordering::SeqCst))
            .finish()
    }
}
