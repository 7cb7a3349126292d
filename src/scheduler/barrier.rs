//! Atomic countdown barrier gating one service's activation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Count of unsatisfied prerequisites of one node.
///
/// Decrements clamp at zero; the transition to zero is reported exactly once.
#[derive(Debug, Default)]
pub struct CountdownBarrier {
    count: AtomicUsize,
}

impl CountdownBarrier {
    /// Creates a barrier at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one blocking unit.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes one blocking unit; returns `true` only for the call that reaches zero.
    pub fn decrement(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok_and(|prev| prev == 1)
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}
