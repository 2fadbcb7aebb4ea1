//! Gateway-wide admission gate for outbound relay sends.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use tokio::sync::Semaphore;
use tracing::trace;

/// Default slot count, sized as a safety net rather than a routine throttle.
pub const DEFAULT_MAX_CONCURRENT_RELAYS: usize = 1_000_000;

/// Counting admission gate bounding simultaneous outbound relay operations.
///
/// One instance per gateway process. Slots are acquired before each relay
/// send (organic or racing) and released when the send resolves. The active
/// count is exposed for observability.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    active: AtomicI64,
    max_concurrent: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with the given slot count. Zero falls back to
    /// [`DEFAULT_MAX_CONCURRENT_RELAYS`].
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = if max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT_RELAYS
        } else {
            max_concurrent
        };

        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: AtomicI64::new(0),
            max_concurrent,
        }
    }

    /// Blocks until a slot is free or the deadline elapses.
    ///
    /// Returns `true` if a slot was granted. On `false` no slot is held and
    /// no matching [`release`](Self::release) is required (though one is
    /// harmless).
    pub async fn acquire(&self, deadline: std::time::Duration) -> bool {
        match tokio::time::timeout(deadline, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => {
                // Slot ownership is tracked manually so release() can be
                // called from a different task than acquire().
                permit.forget();
                self.active.fetch_add(1, Ordering::AcqRel);
                true
            }
            // The semaphore is never closed; the only failure is the deadline.
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Returns a slot to the pool.
    ///
    /// Calling release without a matching acquire is a no-op, not an error:
    /// call sites on error paths may release unconditionally.
    pub fn release(&self) {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                trace!("limiter release without matching acquire, ignoring");
                return;
            }
            match self.active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.semaphore.add_permits(1);
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Point-in-time count of held slots.
    #[must_use]
    pub fn active_count(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    /// The configured slot count.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_RELAYS)
    }
}
