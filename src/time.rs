//! Monotonic millisecond clock.
//!
//! Timestamps are `u32` milliseconds that wrap around, like a hardware tick counter. Always compare
//! them with [`time_passed`], never with `<`.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Clock {
    /// Current time in milliseconds.
    fn now(&self) -> u32;
}

/// Milliseconds elapsed from `since` to `now`, correct across counter wrap-around.
pub fn time_passed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Wall clock based on [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self {
            ms: Arc::new(AtomicU32::new(start)),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u32) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.ms.load(Ordering::SeqCst)
    }
}
