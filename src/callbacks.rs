// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module callback registry. External modules hook into the transaction
//! lifecycle (thread init/exit, start, precommit, commit, abort); each hook
//! is bounded to [`MAX_CB`] entries and must be populated before the first
//! transaction runs.

use crate::errors::{Result, TxError};
use std::sync::RwLock;

/// Maximum number of callbacks per hook
pub const MAX_CB: usize = 16;

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct Callbacks {
    on_thread_init: RwLock<Vec<Hook>>,
    on_thread_exit: RwLock<Vec<Hook>>,
    on_start: RwLock<Vec<Hook>>,
    on_precommit: RwLock<Vec<Hook>>,
    on_commit: RwLock<Vec<Hook>>,
    on_abort: RwLock<Vec<Hook>>,
}

/// Callback set passed to [`Callbacks::register`]; any subset of hooks may
/// be present.
#[derive(Default)]
pub struct CallbackSet {
    pub on_thread_init: Option<Hook>,
    pub on_thread_exit: Option<Hook>,
    pub on_start: Option<Hook>,
    pub on_precommit: Option<Hook>,
    pub on_commit: Option<Hook>,
    pub on_abort: Option<Hook>,
}

impl Callbacks {
    /// Registers a module. Fails without registering anything if any
    /// targeted hook is full.
    pub fn register(&self, set: CallbackSet) -> Result<()> {
        let mut init = self.on_thread_init.write().expect("callback registry poisoned");
        let mut exit = self.on_thread_exit.write().expect("callback registry poisoned");
        let mut start = self.on_start.write().expect("callback registry poisoned");
        let mut precommit = self.on_precommit.write().expect("callback registry poisoned");
        let mut commit = self.on_commit.write().expect("callback registry poisoned");
        let mut abort = self.on_abort.write().expect("callback registry poisoned");

        let full = |hooks: &Vec<Hook>, cb: &Option<Hook>| cb.is_some() && hooks.len() >= MAX_CB;
        if full(&init, &set.on_thread_init)
            || full(&exit, &set.on_thread_exit)
            || full(&start, &set.on_start)
            || full(&precommit, &set.on_precommit)
            || full(&commit, &set.on_commit)
            || full(&abort, &set.on_abort)
        {
            return Err(TxError::CallbackLimit);
        }

        if let Some(cb) = set.on_thread_init {
            init.push(cb);
        }
        if let Some(cb) = set.on_thread_exit {
            exit.push(cb);
        }
        if let Some(cb) = set.on_start {
            start.push(cb);
        }
        if let Some(cb) = set.on_precommit {
            precommit.push(cb);
        }
        if let Some(cb) = set.on_commit {
            commit.push(cb);
        }
        if let Some(cb) = set.on_abort {
            abort.push(cb);
        }

        Ok(())
    }

    fn run(hooks: &RwLock<Vec<Hook>>) {
        for cb in hooks.read().expect("callback registry poisoned").iter() {
            cb();
        }
    }

    pub fn thread_init(&self) {
        Self::run(&self.on_thread_init);
    }

    pub fn thread_exit(&self) {
        Self::run(&self.on_thread_exit);
    }

    pub fn start(&self) {
        Self::run(&self.on_start);
    }

    pub fn precommit(&self) {
        Self::run(&self.on_precommit);
    }

    pub fn commit(&self) {
        Self::run(&self.on_commit);
    }

    pub fn abort(&self) {
        Self::run(&self.on_abort);
    }
}

#[cfg(test)]
mod tests {

    use super::{CallbackSet, Callbacks, MAX_CB};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_callbacks_fire() {
        let callbacks = Callbacks::default();
        let commits = Arc::new(AtomicUsize::new(0));

        let counter = commits.clone();
        callbacks
            .register(CallbackSet {
                on_commit: Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            })
            .expect("registration failed");

        callbacks.commit();
        callbacks.commit();
        // unrelated hooks stay silent
        callbacks.abort();

        assert_eq!(commits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callbacks_bounded() {
        let callbacks = Callbacks::default();

        for _ in 0..MAX_CB {
            assert!(callbacks
                .register(CallbackSet {
                    on_abort: Some(Box::new(|| {})),
                    ..Default::default()
                })
                .is_ok());
        }

        assert!(callbacks
            .register(CallbackSet {
                on_abort: Some(Box::new(|| {})),
                ..Default::default()
            })
            .is_err());

        // other hooks still have room
        assert!(callbacks
            .register(CallbackSet {
                on_commit: Some(Box::new(|| {})),
                ..Default::default()
            })
            .is_ok());
    }
}
