//! Host-allocation counters, attachable to any pool as an observer.
//!
//! Pools only ever touch their own memory; the one external resource they
//! share is the host allocator. An [`AllocObserver`] tallies every host
//! allocate and free a pool performs, which makes leak checks cheap: after a
//! pool is destroyed, a balanced observer means the pool gave back every byte
//! it took. Observation is optional and has no effect on pool behavior.

use std::cell::Cell;
use std::rc::Rc;

/// Shared tally of host allocator traffic.
///
/// Cloning an observer yields another handle onto the same tally, so a
/// benchmark (or a test) can keep one clone while the pool owns the other and
/// read the totals after the pool is gone. Handles are single-threaded, like
/// the pools they observe.
#[derive(Debug, Clone, Default)]
pub struct AllocObserver {
    inner: Rc<Tally>,
}

#[derive(Debug, Default)]
struct Tally {
    allocs: Cell<u64>,
    frees: Cell<u64>,
}

impl AllocObserver {
    /// Creates a fresh observer with zeroed tallies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_alloc(&self) {
        self.inner.allocs.set(self.inner.allocs.get() + 1);
    }

    pub(crate) fn record_free(&self) {
        self.inner.frees.set(self.inner.frees.get() + 1);
    }

    /// Number of host allocations recorded so far.
    #[must_use]
    pub fn allocs(&self) -> u64 {
        self.inner.allocs.get()
    }

    /// Number of host frees recorded so far.
    #[must_use]
    pub fn frees(&self) -> u64 {
        self.inner.frees.get()
    }

    /// Host allocations not yet matched by a free.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.allocs() - self.frees()
    }

    /// Whether every recorded allocation has been freed.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.outstanding() == 0
    }

    /// Logs the current tallies, for leak checking at the end of a run.
    pub fn log_summary(&self) {
        tracing::info!(
            allocs = self.allocs(),
            frees = self.frees(),
            "host allocation totals"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_counts_and_balance() {
        let observer = AllocObserver::new();
        assert!(observer.is_balanced());

        observer.record_alloc();
        observer.record_alloc();
        observer.record_free();
        assert_eq!(observer.allocs(), 2);
        assert_eq!(observer.frees(), 1);
        assert_eq!(observer.outstanding(), 1);
        assert!(!observer.is_balanced());

        observer.record_free();
        assert!(observer.is_balanced());
    }

    #[test]
    fn test_clones_share_one_tally() {
        let observer = AllocObserver::new();
        let clone = observer.clone();
        observer.record_alloc();
        assert_eq!(clone.allocs(), 1);
    }
}
