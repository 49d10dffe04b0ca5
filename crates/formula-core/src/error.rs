//! Runtime error types

use thiserror::Error;

/// Error produced by a [`Stream`](crate::Stream) that failed to start.
pub type StreamError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the formula runtime.
///
/// Only programmer errors and stream start failures are reported here. Pass
/// supersession and repeated termination are handled internally and never
/// show up as errors.
#[derive(Error, Debug)]
pub enum FormulaError {
    /// A transition was triggered from a thread other than the runtime owner.
    #[error("only the thread that created the runtime can trigger transitions. expected: {expected}, was: {actual}")]
    ThreadAffinity { expected: String, actual: String },

    /// The runtime (or the formula being addressed) has been terminated.
    #[error("cannot {operation}: runtime has been terminated")]
    Lifecycle { operation: &'static str },

    /// A stream declared during evaluation failed to start.
    #[error("stream `{key}` failed to start: {source}")]
    Stream {
        key: String,
        #[source]
        source: StreamError,
    },
}

impl FormulaError {
    pub(crate) fn lifecycle(operation: &'static str) -> Self {
        FormulaError::Lifecycle { operation }
    }

    /// Returns true for [`FormulaError::ThreadAffinity`].
    pub fn is_thread_affinity(&self) -> bool {
        matches!(self, FormulaError::ThreadAffinity { .. })
    }

    /// Returns true for [`FormulaError::Lifecycle`].
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, FormulaError::Lifecycle { .. })
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, FormulaError>;
