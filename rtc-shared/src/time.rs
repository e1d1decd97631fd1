//! Millisecond clocks.
//!
//! Everything on the RTP send path reasons in integer milliseconds on a
//! monotonic clock. Components take a [`Clock`] handle instead of reading
//! the system time directly, so tests can drive time with a
//! [`SimulatedClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// A monotonic source of milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds. Only differences are meaningful.
    fn time_in_milliseconds(&self) -> i64;
}

/// Clock backed by [`Instant`], counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn time_in_milliseconds(&self) -> i64 {
        Instant::now().duration_since(self.epoch).as_millis() as i64
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(initial_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(initial_ms),
        }
    }

    pub fn advance_time_milliseconds(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_time_milliseconds(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn time_in_milliseconds(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
