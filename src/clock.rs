//! Monotonic time source shared by the pipeline and its producers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Source of monotonic timestamps in microseconds.
///
/// Every timestamp written to the container (sample pts, deadline checks)
/// comes from one clock so that tracks share a time base.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Process-wide monotonic clock. All instances share one origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    fn origin() -> Instant {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        *ORIGIN.get_or_init(Instant::now)
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        // Start at 1 s so a real reading is never confused with "no pts".
        1_000_000 + Self::origin().elapsed().as_micros() as i64
    }
}

/// Clock that only moves when told to. Used to drive the pipeline in
/// simulations and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: Arc::new(AtomicI64::new(start_us)),
        }
    }

    pub fn advance_us(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }

    pub fn set_us(&self, now_us: i64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}
