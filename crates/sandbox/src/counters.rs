//! Health counters. Each sandbox keeps its own, and every update is also
//! added to process-wide totals.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

static GLOBAL_CALLS: AtomicU64 = AtomicU64::new(0);
static GLOBAL_EXCEPTIONS: AtomicU64 = AtomicU64::new(0);
static GLOBAL_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static INSTANCES: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallCounters {
    pub calls: u64,
    pub exceptions: u64,
    pub timeouts: u64,
}

impl CallCounters {
    pub(crate) fn record_call(&mut self) {
        self.calls += 1;
        GLOBAL_CALLS.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exception(&mut self) {
        self.exceptions += 1;
        GLOBAL_EXCEPTIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
        GLOBAL_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Totals over every sandbox in the process.
pub fn global_counters() -> CallCounters {
    CallCounters {
        calls: GLOBAL_CALLS.load(Ordering::Relaxed),
        exceptions: GLOBAL_EXCEPTIONS.load(Ordering::Relaxed),
        timeouts: GLOBAL_TIMEOUTS.load(Ordering::Relaxed),
    }
}

/// Number of sandboxes currently alive.
pub fn instance_count() -> usize {
    INSTANCES.load(Ordering::Acquire)
}

/// Held by every sandbox; counts it as alive until dropped.
#[derive(Debug)]
pub(crate) struct InstanceToken(());

impl InstanceToken {
    pub(crate) fn acquire() -> Self {
        INSTANCES.fetch_add(1, Ordering::AcqRel);
        Self(())
    }
}

impl Drop for InstanceToken {
    fn drop(&mut self) {
        INSTANCES.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_updates_reach_global_totals() {
        let before = global_counters();
        let mut counters = CallCounters::default();
        counters.record_call();
        counters.record_call();
        counters.record_timeout();
        assert_eq!(counters, CallCounters { calls: 2, exceptions: 0, timeouts: 1 });
        let after = global_counters();
        assert!(after.calls >= before.calls + 2);
        assert!(after.timeouts > before.timeouts);
    }
}
