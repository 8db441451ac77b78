// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The global version clock supplies snapshot timestamps at transaction
//! start and commit timestamps at the single fetch-and-increment every
//! writing commit performs.

use std::sync::atomic::{AtomicUsize, Ordering};

// TODO: implement the low contention global version-clock from the paper

/// An atomic `VersionClock`. Monotonically increasing between rollovers;
/// reset to zero only inside the quiescence barrier, while no transaction
/// is active.
#[derive(Default)]
pub struct VersionClock {
    atomic: AtomicUsize,
}

impl VersionClock {
    pub fn new(version: usize) -> Self {
        Self {
            atomic: AtomicUsize::new(version),
        }
    }

    /// Atomically increments the clock and returns the new commit timestamp
    #[inline]
    pub fn increment(&self) -> usize {
        self.atomic.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the current version
    #[inline]
    pub fn version(&self) -> usize {
        self.atomic.load(Ordering::Acquire)
    }

    /// Resets the clock to zero. Only safe inside the rollover barrier.
    pub(crate) fn reset(&self) {
        self.atomic.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {

    use super::VersionClock;
    use threadpool::ThreadPool;

    #[test]
    fn test_version_clock() {
        let clock = VersionClock::new(0);

        for expected in 1..=0xFFF {
            assert_eq!(clock.increment(), expected);
        }

        assert_eq!(clock.version(), 0xFFF);

        clock.reset();
        assert_eq!(clock.version(), 0);
    }

    #[test]
    fn test_version_clock_threaded() {
        use std::sync::Arc;

        let clock = Arc::new(VersionClock::default());
        let runs = 0xFFF;

        let threadpool = ThreadPool::new(8);

        for _ in 0..runs {
            let inner = clock.clone();
            threadpool.execute(move || {
                inner.increment();
            })
        }

        threadpool.join();

        assert_eq!(clock.version(), runs);
    }
}
