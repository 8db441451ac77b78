// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-descriptor statistics, queried through a string-keyed accessor so
//! benchmark harnesses can sample counters without a compile-time
//! dependency on the exact set.

use crate::errors::AbortReason;

/// Cumulative counters of a single thread's transactions
#[derive(Debug, Default, Clone)]
pub struct Stats {
    /// Total number of commits
    pub nb_commits: usize,
    /// Total number of aborts
    pub nb_aborts: usize,
    /// Transactions that aborted once or more
    pub nb_aborts_1: usize,
    /// Transactions that aborted twice or more
    pub nb_aborts_2: usize,
    /// Aborts due to a store inside a read-only transaction
    pub nb_aborts_ro: usize,
    /// Aborts due to commit-time lock conflicts
    pub nb_aborts_ww_conflict: usize,
    /// Aborts due to failed validation upon read
    pub nb_aborts_validate_read: usize,
    /// Aborts due to failed validation upon write
    pub nb_aborts_validate_write: usize,
    /// Aborts due to failed validation upon commit
    pub nb_aborts_validate_commit: usize,
    /// Aborts requested by the caller
    pub nb_aborts_explicit: usize,
    /// Aborts forced by the contention manager
    pub nb_aborts_killed: usize,
    /// Consecutive aborts of the current transaction
    pub retries: usize,
    /// Largest observed retry streak
    pub max_retries: usize,
}

impl Stats {
    pub(crate) fn on_abort(&mut self, reason: AbortReason) {
        self.retries += 1;
        self.nb_aborts += 1;
        if self.retries == 1 {
            self.nb_aborts_1 += 1;
        } else if self.retries == 2 {
            self.nb_aborts_2 += 1;
        }
        if self.max_retries < self.retries {
            self.max_retries = self.retries;
        }

        match reason {
            AbortReason::ValRead => self.nb_aborts_validate_read += 1,
            AbortReason::ValWrite => self.nb_aborts_validate_write += 1,
            AbortReason::WwConflict => self.nb_aborts_ww_conflict += 1,
            AbortReason::Validate => self.nb_aborts_validate_commit += 1,
            AbortReason::RoWrite => self.nb_aborts_ro += 1,
            AbortReason::Explicit => self.nb_aborts_explicit += 1,
            AbortReason::Killed => self.nb_aborts_killed += 1,
        }
    }

    pub(crate) fn on_commit(&mut self) {
        self.nb_commits += 1;
        self.retries = 0;
    }

    /// Returns the counter registered under `name`, or `None` for an
    /// unknown key
    pub fn get(&self, name: &str) -> Option<usize> {
        let value = match name {
            "nb_commits" => self.nb_commits,
            "nb_aborts" => self.nb_aborts,
            "nb_aborts_1" => self.nb_aborts_1,
            "nb_aborts_2" => self.nb_aborts_2,
            "nb_aborts_ro" => self.nb_aborts_ro,
            "nb_aborts_ww_conflict" => self.nb_aborts_ww_conflict,
            "nb_aborts_validate_read" => self.nb_aborts_validate_read,
            "nb_aborts_validate_write" => self.nb_aborts_validate_write,
            "nb_aborts_validate_commit" => self.nb_aborts_validate_commit,
            "nb_aborts_explicit" => self.nb_aborts_explicit,
            "nb_aborts_killed" => self.nb_aborts_killed,
            "nb_retries" => self.retries,
            "max_retries" => self.max_retries,
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {

    use super::Stats;
    use crate::errors::AbortReason;

    #[test]
    fn test_abort_accounting() {
        let mut stats = Stats::default();

        stats.on_abort(AbortReason::ValRead);
        stats.on_abort(AbortReason::WwConflict);
        stats.on_abort(AbortReason::WwConflict);
        stats.on_commit();

        assert_eq!(stats.get("nb_aborts"), Some(3));
        assert_eq!(stats.get("nb_aborts_1"), Some(1));
        assert_eq!(stats.get("nb_aborts_2"), Some(1));
        assert_eq!(stats.get("nb_aborts_validate_read"), Some(1));
        assert_eq!(stats.get("nb_aborts_ww_conflict"), Some(2));
        assert_eq!(stats.get("max_retries"), Some(3));
        // a successful commit resets the streak, not the totals
        assert_eq!(stats.get("nb_retries"), Some(0));
        assert_eq!(stats.get("nb_commits"), Some(1));

        assert_eq!(stats.get("no_such_counter"), None);
    }
}
