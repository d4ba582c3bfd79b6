//! In-flight concurrency quota backed by a pair of atomic counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::trace;

/// A limited quantity of requests allowed to be in flight at once.
///
/// `used` counts currently granted slots; `ceiling` is the admission limit
/// and moves independently of `used` (the feedback loop raises and lowers it
/// while requests hold slots). One instance guards one backend route and
/// lives for the process lifetime; pass it explicitly, it is not a global.
#[derive(Debug)]
pub struct ConcurrencyQuota {
    used: AtomicI64,
    ceiling: AtomicI64,
}

impl ConcurrencyQuota {
    pub fn new(ceiling: i64) -> Self {
        Self {
            used: AtomicI64::new(0),
            ceiling: AtomicI64::new(ceiling.max(0)),
        }
    }

    /// Optimistically claims a slot, returning false when the quota is
    /// exhausted.
    ///
    /// The check and the increment are two separate atomic operations.
    /// Callers racing between them can push `used` past `ceiling`, but only
    /// by the number of simultaneous callers minus one. The ceiling is
    /// itself a moving target, so that bounded overshoot is tolerated in
    /// exchange for a hot path with no compare-and-swap and no lock.
    pub fn try_acquire(&self) -> bool {
        let used = self.used.load(Ordering::SeqCst);
        let ceiling = self.ceiling.load(Ordering::SeqCst);
        // A slot may free up right after this check; rejecting anyway is fine.
        if used >= ceiling {
            return false;
        }
        self.used.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Returns a slot claimed by [`try_acquire`](Self::try_acquire).
    /// Exactly one call per grant.
    pub fn release(&self) {
        self.used.fetch_sub(1, Ordering::SeqCst);
    }

    /// Lifts the ceiling by `step` slots.
    pub fn raise(&self, step: i64) {
        self.ceiling.fetch_add(step, Ordering::SeqCst);
    }

    /// Shrinks the ceiling to `ratio` of its current value, rounded up.
    ///
    /// Read-compute-compare-exchange loop: an adjustment that races a
    /// concurrent `raise` or `lower` is re-applied against the fresh value
    /// instead of silently overwriting it. Each failed exchange means some
    /// other update landed, so the loop makes forward progress under
    /// contention. Rounding up keeps the ceiling non-negative for any
    /// `ratio` in 0..=1.
    pub fn lower(&self, ratio: f64) {
        loop {
            let current = self.ceiling.load(Ordering::SeqCst);
            let next = (ratio * current as f64).ceil() as i64;
            if self
                .ceiling
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                trace!(from = current, to = next, "ceiling lowered");
                return;
            }
        }
    }

    /// Currently granted slots. For gauges and tests; admission decisions
    /// go through [`try_acquire`](Self::try_acquire).
    pub fn used(&self) -> i64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Current admission limit.
    pub fn ceiling(&self) -> i64 {
        self.ceiling.load(Ordering::SeqCst)
    }
}

/// Releases one quota slot when dropped.
///
/// Ties the release to scope exit so every path out of the gate returns the
/// slot exactly once, including a caller that drops the response future
/// mid-flight.
#[derive(Debug)]
pub(crate) struct QuotaSlot {
    quota: Arc<ConcurrencyQuota>,
}

impl QuotaSlot {
    pub(crate) fn new(quota: Arc<ConcurrencyQuota>) -> Self {
        Self { quota }
    }
}

impl Drop for QuotaSlot {
    fn drop(&mut self) {
        self.quota.release();
        crate::internal_event::in_flight(self.quota.used());
    }
}
