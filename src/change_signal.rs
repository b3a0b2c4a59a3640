//! Dirty flag between the cache's poll thread and the host-driven rebuild.
//!
//! Writers only ever raise. The single reader observes a pending change,
//! acts on it, then acknowledges exactly the raise it observed. A raise that
//! lands while the reader is acting stays pending for the next check.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ChangeSignal {
    /// Bumped on every raise.
    raised: AtomicU64,
    /// Value of `raised` the reader last acted on.
    acknowledged: AtomicU64,
}

/// Token for a change the reader has seen but not yet acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange(u64);

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire) != self.acknowledged.load(Ordering::Acquire)
    }

    /// Read step of read-act-clear. Returns a token if a change is pending.
    pub fn pending(&self) -> Option<PendingChange> {
        let raised = self.raised.load(Ordering::Acquire);
        (raised != self.acknowledged.load(Ordering::Acquire)).then_some(PendingChange(raised))
    }

    /// Clear step. Only clears up to the raise the token was taken at.
    pub fn acknowledge(&self, change: PendingChange) {
        self.acknowledged.fetch_max(change.0, Ordering::AcqRel);
    }

    /// Total raises since construction.
    pub fn raise_count(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }
}
