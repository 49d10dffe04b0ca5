//! Harness pieces for driving formulas in tests.

mod logging;
mod observer;
mod stream;

pub use logging::init_test_logging;
pub use observer::FormulaTestObserver;
pub use stream::ManualStream;
