use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::thread_local;

use crate::callback::Bindings;
use crate::collections::map::HashMap;
use crate::error::{FormulaError, Result};

pub(crate) type RuntimeId = u64;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

fn next_runtime_id() -> RuntimeId {
    NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed)
}

/// The thread a runtime was created on, captured once per instance.
struct ThreadOwner {
    id: ThreadId,
    name: String,
}

impl ThreadOwner {
    fn current() -> Self {
        let thread = thread::current();
        Self {
            id: thread.id(),
            name: describe(&thread),
        }
    }

    fn check(&self) -> Result<()> {
        let thread = thread::current();
        if thread.id() == self.id {
            return Ok(());
        }
        Err(FormulaError::ThreadAffinity {
            expected: self.name.clone(),
            actual: describe(&thread),
        })
    }
}

fn describe(thread: &Thread) -> String {
    match thread.name() {
        Some(name) => format!("{name} ({:?})", thread.id()),
        None => format!("{:?}", thread.id()),
    }
}

/// Identifies one runtime instance and the thread that owns it.
///
/// Handles are cheap to clone and may cross threads, but every operation that
/// reaches into the runtime first checks that it runs on the owner thread.
#[derive(Clone)]
pub struct RuntimeHandle {
    id: RuntimeId,
    owner: Arc<ThreadOwner>,
}

impl RuntimeHandle {
    /// Create a handle owned by the calling thread.
    pub(crate) fn new() -> Self {
        Self {
            id: next_runtime_id(),
            owner: Arc::new(ThreadOwner::current()),
        }
    }

    pub(crate) fn id(&self) -> RuntimeId {
        self.id
    }

    /// Fails with [`FormulaError::ThreadAffinity`] off the owner thread.
    pub fn check_thread(&self) -> Result<()> {
        self.owner.check()
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner.id
    }

    /// Name of the owner thread as reported in affinity errors.
    pub fn owner_name(&self) -> &str {
        &self.owner.name
    }

    /// Returns false once the runtime has been terminated or dropped.
    ///
    /// Always false when asked from a thread other than the owner.
    pub fn is_active(&self) -> bool {
        self.is_owner_thread() && lookup(self.id).is_some()
    }

    /// Resolve the binding arena of this runtime on the owner thread.
    pub(crate) fn bindings(&self, operation: &'static str) -> Result<Rc<Bindings>> {
        self.owner.check()?;
        lookup(self.id).ok_or_else(|| FormulaError::lifecycle(operation))
    }
}

impl PartialEq for RuntimeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RuntimeHandle {}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("owner", &self.owner.name)
            .finish()
    }
}

thread_local! {
    static ACTIVE_RUNTIMES: RefCell<HashMap<RuntimeId, Weak<Bindings>>> =
        RefCell::new(HashMap::new());
}

fn lookup(id: RuntimeId) -> Option<Rc<Bindings>> {
    ACTIVE_RUNTIMES
        .try_with(|runtimes| runtimes.borrow().get(&id).and_then(Weak::upgrade))
        .ok()
        .flatten()
}

pub(crate) fn register_runtime(id: RuntimeId, bindings: &Rc<Bindings>) {
    ACTIVE_RUNTIMES.with(|runtimes| {
        runtimes.borrow_mut().insert(id, Rc::downgrade(bindings));
    });
}

pub(crate) fn unregister_runtime(id: RuntimeId) {
    // Thread-local storage may already be gone when a runtime drops during thread exit.
    let _ = ACTIVE_RUNTIMES.try_with(|runtimes| {
        runtimes.borrow_mut().remove(&id);
    });
}
