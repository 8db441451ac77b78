// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Contention management. The read and write paths consult the manager
//! whenever they observe a stripe in owned state; the manager decides
//! whether to re-read the lock or give up. Commit-time conflicts never reach
//! the manager: commit-time locking aborts the acquiring transaction
//! outright.

use crate::breaker::BusyBreaker;

/// The manager's verdict on an owned lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Re-read the lock and retry the access
    RetryRead,
    /// Abort the observing transaction
    AbortSelf,
}

/// Policy seam for lock-conflict handling. Implementations must be
/// substitutable without changes to the read, write or commit paths.
pub trait ContentionManager: Send {
    /// Called with the number of times this transaction has already rolled
    /// back and the raw lock word that was observed in owned state
    fn on_conflict(&self, retries: usize, lock_word: usize) -> ConflictAction;

    /// Called when a transaction (re)starts
    fn on_start(&self) {}
}

/// The default policy: wait out short commit windows on a bounded
/// exponential spin, then abort self. The owner is never disturbed.
pub struct Suicide {
    breaker: BusyBreaker,
}

impl Suicide {
    pub fn new(spin_cap: Option<usize>) -> Self {
        Self {
            breaker: BusyBreaker::new(spin_cap),
        }
    }
}

impl ContentionManager for Suicide {
    fn on_conflict(&self, _retries: usize, _lock_word: usize) -> ConflictAction {
        match self.breaker.spin() {
            Ok(()) => ConflictAction::RetryRead,
            Err(()) => ConflictAction::AbortSelf,
        }
    }

    fn on_start(&self) {
        self.breaker.reset();
    }
}

#[cfg(test)]
mod tests {

    use super::{ConflictAction, ContentionManager, Suicide};

    #[test]
    fn test_suicide_spins_then_aborts() {
        let cm = Suicide::new(Some(2));

        assert_eq!(cm.on_conflict(0, 0x11), ConflictAction::RetryRead);
        assert_eq!(cm.on_conflict(0, 0x11), ConflictAction::RetryRead);
        assert_eq!(cm.on_conflict(0, 0x11), ConflictAction::RetryRead);
        assert_eq!(cm.on_conflict(0, 0x11), ConflictAction::AbortSelf);

        // a fresh transaction gets a fresh spin budget
        cm.on_start();
        assert_eq!(cm.on_conflict(1, 0x11), ConflictAction::RetryRead);
    }
}
