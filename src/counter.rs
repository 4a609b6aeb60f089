//! Shared count of active middleware instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide number of in-flight requests handled by a middleware.
///
/// Create one at startup and hand an `Arc` to every factory that needs it.
/// Every operation is a single relaxed atomic; readers get a best-effort
/// snapshot that may already be stale when they use it.
#[derive(Debug, Default)]
pub struct ConcurrencyCounter {
    active: AtomicU64,
}

impl ConcurrencyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        let previous = self.active.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "concurrency counter decremented below zero");
    }

    pub fn approximate(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Increments the counter and returns a guard that undoes it exactly once.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.increment();
        ActiveGuard { counter: Some(Arc::clone(self)) }
    }
}

/// Holds one unit of [`ConcurrencyCounter`].
///
/// The unit is given back by [`release`](ActiveGuard::release) or on drop,
/// whichever happens first; later calls are no-ops. Dropping covers aborted
/// requests whose futures are cancelled mid-flight.
#[derive(Debug)]
pub struct ActiveGuard {
    counter: Option<Arc<ConcurrencyCounter>>,
}

impl ActiveGuard {
    pub fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrement();
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}
