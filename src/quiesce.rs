// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Thread registry and the quiescence barrier.
//!
//! Every thread registers a descriptor before running transactions and
//! deregisters on exit. The barrier is used in exactly one situation: clock
//! rollover. A thread whose snapshot would start at or beyond the version
//! ceiling parks here; every other registered thread arrives at its next
//! transaction start, because the clock stays at the ceiling until the
//! rollover function has run. Once all registered threads have arrived, one
//! of them resets the clock and the lock table, then all are released.
//!
//! Threads only ever arrive between transactions, so the reset never races
//! with an active snapshot.

use log::*;
use std::sync::{Condvar, Mutex};

/// Upper bound on concurrently registered threads (large enough)
pub const MAX_THREADS: usize = 8192;

struct RegistryInner {
    /// Ids of the live descriptors
    threads: Vec<usize>,
    /// Threads parked at the barrier
    waiting: usize,
    /// A rollover is in progress
    quiescing: bool,
}

pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
    cond: Condvar,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                threads: Vec::new(),
                waiting: 0,
                quiescing: false,
            }),
            cond: Condvar::new(),
        }
    }
}

impl Registry {
    /// Adds a live descriptor. Fails when [`MAX_THREADS`] are registered.
    pub fn register(&self, id: usize) -> bool {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        if inner.threads.len() >= MAX_THREADS {
            return false;
        }
        inner.threads.push(id);
        true
    }

    /// Removes a descriptor. Wakes the barrier in case the quiescing threads
    /// were waiting for this one.
    pub fn deregister(&self, id: usize) {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        inner.threads.retain(|t| *t != id);
        if inner.quiescing {
            self.cond.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("thread registry poisoned").threads.len()
    }

    /// Parks the calling thread until every registered thread has arrived,
    /// runs `rollover` on exactly one of them, then releases all. Must only
    /// be called between transactions.
    pub fn barrier<F>(&self, rollover: F)
    where
        F: FnOnce(),
    {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        inner.waiting += 1;
        if !inner.quiescing {
            info!("QUIESCE: ROLLOVER BARRIER RAISED");
            inner.quiescing = true;
        }

        let mut rollover = Some(rollover);
        while inner.quiescing {
            if inner.waiting == inner.threads.len() {
                // everybody is blocked
                if let Some(f) = rollover.take() {
                    f();
                }
                info!("QUIESCE: ROLLOVER DONE. RELEASING {} THREADS", inner.waiting);
                inner.quiescing = false;
                self.cond.notify_all();
            } else {
                inner = self
                    .cond
                    .wait(inner)
                    .expect("thread registry poisoned");
            }
        }
        inner.waiting -= 1;
    }
}

#[cfg(test)]
mod tests {

    use super::Registry;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_register_deregister() {
        let registry = Registry::default();

        assert!(registry.register(1));
        assert!(registry.register(2));
        assert_eq!(registry.len(), 2);

        registry.deregister(1);
        assert_eq!(registry.len(), 1);
        registry.deregister(2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_barrier_runs_rollover_once() {
        const THREADS: usize = 8;

        let registry = Arc::new(Registry::default());
        let rollovers = Arc::new(AtomicUsize::new(0));

        for id in 0..THREADS {
            assert!(registry.register(id));
        }

        let mut handles = Vec::new();
        for id in 0..THREADS {
            let registry = registry.clone();
            let rollovers = rollovers.clone();
            handles.push(std::thread::spawn(move || {
                registry.barrier(|| {
                    rollovers.fetch_add(1, Ordering::SeqCst);
                });
                registry.deregister(id);
            }));
        }

        for handle in handles {
            handle.join().expect("Failed to join barrier thread");
        }

        assert_eq!(rollovers.load(Ordering::SeqCst), 1);
    }
}
