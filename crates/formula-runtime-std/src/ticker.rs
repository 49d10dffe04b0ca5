use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use formula_core::{Cancelable, EventCallback, Stream, StreamError};

use crate::StdScheduler;

/// Emits `1, 2, 3, ...` once per `period`.
///
/// Ticks are produced on a background thread and posted to `scheduler`, so
/// they reach the formula only when the owner thread drains it. Cancelling
/// stops the thread; ticks already posted are dropped by the runtime if it
/// has been terminated in the meantime.
#[derive(Clone)]
pub struct Ticker {
    period: Duration,
    scheduler: Arc<StdScheduler>,
}

impl Ticker {
    pub fn new(period: Duration, scheduler: Arc<StdScheduler>) -> Self {
        Self { period, scheduler }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Stream for Ticker {
    type Message = u64;

    fn start(&self, emitter: EventCallback<u64>) -> Result<Cancelable, StreamError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker = {
            let cancelled = cancelled.clone();
            let scheduler = self.scheduler.clone();
            let period = self.period;
            thread::Builder::new()
                .name("formula-ticker".into())
                .spawn(move || {
                    let mut tick = 0u64;
                    loop {
                        thread::park_timeout(period);
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        tick += 1;
                        let emitter = emitter.clone();
                        scheduler.spawn(move || {
                            if let Err(err) = emitter.invoke(tick) {
                                tracing::debug!(tick, %err, "dropping tick");
                            }
                        });
                    }
                    tracing::trace!("ticker stopped");
                })?
        };
        tracing::debug!(period = ?self.period, "ticker started");

        let thread = worker.thread().clone();
        Ok(Cancelable::new(move || {
            cancelled.store(true, Ordering::SeqCst);
            thread.unpark();
        }))
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker").field("period", &self.period).finish()
    }
}
