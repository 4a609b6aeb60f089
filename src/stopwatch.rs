//! Lock-free shared stopwatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A source of monotonic timestamps in nanoseconds.
pub trait MonotonicClock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// [`MonotonicClock`] backed by [`Instant`], counting from its construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

impl MonotonicClock for SystemClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX - 1)
    }
}

const UNSET: u64 = u64::MAX;

/// Tracks the time elapsed between successive reads, shared by every request.
///
/// The last timestamp lives in a single atomic word, so a read-and-reset is
/// one `swap`: no locks, and no caller can observe a half-written value.
///
/// "Elapsed since the last read" is global. Under concurrency the previous
/// read may belong to any request, not the logical predecessor of this one.
#[derive(Debug)]
pub struct MonotonicStopwatch {
    last_ns: AtomicU64,
}

impl MonotonicStopwatch {
    pub fn new() -> Self {
        Self { last_ns: AtomicU64::new(UNSET) }
    }

    /// Stores the clock's current reading and returns the nanoseconds since
    /// the previously stored one. The very first call returns `0`.
    ///
    /// Two racing callers may swap in readings out of order; the caller that
    /// finds a later timestamp than its own gets `0` rather than wrapping.
    pub fn read_and_reset(&self, clock: &dyn MonotonicClock) -> u64 {
        let now = clock.now_ns();
        match self.last_ns.swap(now, Ordering::AcqRel) {
            UNSET => 0,
            previous => now.saturating_sub(previous),
        }
    }
}

impl Default for MonotonicStopwatch {
    fn default() -> Self { Self::new() }
}
