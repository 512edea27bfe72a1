//! Single-assignment finalize flag.

use std::sync::atomic::{AtomicBool, Ordering};

/// Only the first caller of [`FinalizeGuard::try_claim`] wins.
#[derive(Debug, Default)]
pub struct FinalizeGuard {
    claimed: AtomicBool,
}

impl FinalizeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once across all threads.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}
