use std::cell::Cell;
use std::fmt;

/// Generation token identifying one evaluation pass.
///
/// Tokens are strictly increasing and never reused. A pass is only valid while
/// it is the latest token issued by its [`TransitionLock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessingPass(u64);

impl ProcessingPass {
    /// Raw generation number, mostly useful for logging.
    pub fn generation(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessingPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass#{}", self.0)
    }
}

/// Detects whether a transition happened while a pass was in flight.
///
/// This is a plain counter. The runtime only ever touches it from its owner
/// thread, so no synchronization is needed.
#[derive(Debug, Default)]
pub struct TransitionLock {
    generation: Cell<u64>,
}

impl TransitionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token, invalidating every token issued before it.
    pub fn next(&self) -> ProcessingPass {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        ProcessingPass(next)
    }

    /// Returns true if a newer token has been issued since `pass`.
    pub fn has_transitioned(&self, pass: ProcessingPass) -> bool {
        self.generation.get() != pass.0
    }

    /// The most recently issued token, if any.
    pub fn current(&self) -> Option<ProcessingPass> {
        match self.generation.get() {
            0 => None,
            generation => Some(ProcessingPass(generation)),
        }
    }
}
