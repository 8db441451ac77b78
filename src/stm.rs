// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! [`Stm`] is the shared context all transactional threads synchronize
//! through: the lock table, the global version clock, the thread registry
//! and the module callbacks. There are no process-wide globals; several
//! independent [`Stm`] instances may coexist.
//!
//! Each thread obtains its own [`StmContext`] (the transaction descriptor)
//! and runs transactions through [`StmContext::execute`], which re-enters
//! the transaction body until a commit succeeds.

use log::*;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    breaker::MAX_WAIT_UNITS,
    callbacks::{CallbackSet, Callbacks},
    cm::{ContentionManager, Suicide},
    errors::{Result, TxError},
    quiesce::{Registry, MAX_THREADS},
    stats::Stats,
    transaction::{Transaction, TxAttr},
    version::VersionClock,
    vlock::{LockTable, LOCK_BITS},
};

/// Maximum number of transaction-specific data slots
pub const MAX_SPECIFIC: usize = 16;

/// Highest version the clock may hand out as a snapshot start. Leaves
/// headroom for every thread to tick the clock once past the ceiling before
/// the rollover barrier runs.
pub const VERSION_MAX_DEFAULT: usize = (usize::MAX >> LOCK_BITS) - MAX_THREADS;

const fn lock_shift(extra: u32) -> u32 {
    (core::mem::size_of::<usize>() as u32).trailing_zeros() + extra
}

/// Tuning knobs, all defaulted. Mostly useful for tests (forcing early
/// rollovers) and for workloads with unusual set sizes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial read/write set capacity
    pub initial_set_capacity: usize,
    /// log2 of the number of lock-table slots
    pub lock_array_log_size: u32,
    /// Extra shift applied when hashing an address to its stripe
    pub lock_shift_extra: u32,
    /// Clock ceiling that triggers the rollover barrier
    pub version_max: usize,
    /// Spin budget (in exponential wait units) granted to the default
    /// contention manager before it kills the transaction; `None` spins
    /// without bound
    pub spin_cap: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_set_capacity: 4096,
            lock_array_log_size: 20,
            lock_shift_extra: 2,
            version_max: VERSION_MAX_DEFAULT,
            spin_cap: Some(MAX_WAIT_UNITS),
        }
    }
}

/// Library parameter values returned by [`Stm::parameter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Name(&'static str),
    Size(usize),
}

pub(crate) struct Shared {
    pub config: Config,
    pub clock: VersionClock,
    pub locks: LockTable,
    pub registry: Registry,
    pub callbacks: Callbacks,
    pub next_thread_id: AtomicUsize,
    pub nb_specific: AtomicUsize,
}

/// The shared transactional memory context
#[derive(Clone)]
pub struct Stm {
    pub(crate) shared: Arc<Shared>,
}

impl Default for Stm {
    fn default() -> Self {
        Self::new()
    }
}

impl Stm {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let locks = LockTable::new(config.lock_array_log_size, lock_shift(config.lock_shift_extra));

        debug!(
            "STM: INIT. LOCK ARRAY (2^{}), VERSION MAX (0x{:x})",
            config.lock_array_log_size, config.version_max
        );

        Self {
            shared: Arc::new(Shared {
                clock: VersionClock::default(),
                locks,
                registry: Registry::default(),
                callbacks: Callbacks::default(),
                next_thread_id: AtomicUsize::new(0),
                nb_specific: AtomicUsize::new(0),
                config,
            }),
        }
    }

    /// Registers the calling thread and returns its transaction descriptor.
    /// One descriptor per thread; it is reused across many transactions.
    pub fn context(&self) -> Result<StmContext> {
        let id = self.shared.next_thread_id.fetch_add(1, Ordering::SeqCst);
        if !self.shared.registry.register(id) {
            return Err(TxError::ThreadLimit);
        }

        self.shared.callbacks.thread_init();

        Ok(StmContext {
            stm: self.clone(),
            id,
            stats: Stats::default(),
            cm: Box::new(Suicide::new(self.shared.config.spin_cap)),
            specific: (0..MAX_SPECIFIC).map(|_| None).collect(),
            rs_cap: self.shared.config.initial_set_capacity,
            ws_cap: self.shared.config.initial_set_capacity,
        })
    }

    /// Current value of the global version clock
    pub fn clock(&self) -> usize {
        self.shared.clock.version()
    }

    /// Number of registered transactional threads
    pub fn nb_threads(&self) -> usize {
        self.shared.registry.len()
    }

    /// Registers module callbacks. Must be called before transactions run;
    /// each hook accepts at most [`MAX_CB`](crate::MAX_CB) entries.
    pub fn register_callbacks(&self, set: CallbackSet) -> Result<()> {
        self.shared.callbacks.register(set)
    }

    /// Claims a transaction-specific data slot
    pub fn create_specific(&self) -> Result<usize> {
        let key = self.shared.nb_specific.fetch_add(1, Ordering::SeqCst);
        if key >= MAX_SPECIFIC {
            self.shared.nb_specific.store(MAX_SPECIFIC, Ordering::SeqCst);
            return Err(TxError::SpecificLimit);
        }
        Ok(key)
    }

    /// Returns a library parameter, or `None` for an unknown key
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        match name {
            "contention_manager" => Some(Parameter::Name("suicide")),
            "design" => Some(Parameter::Name("write-back (ctl)")),
            "initial_rw_set_size" => Some(Parameter::Size(self.shared.config.initial_set_capacity)),
            _ => None,
        }
    }
}

/// Per-thread transaction descriptor. Exactly one per registered thread,
/// reused across transactions; deregisters itself when dropped.
pub struct StmContext {
    pub(crate) stm: Stm,
    pub(crate) id: usize,
    pub(crate) stats: Stats,
    pub(crate) cm: Box<dyn ContentionManager>,
    pub(crate) specific: Vec<Option<Box<dyn Any + Send>>>,
    pub(crate) rs_cap: usize,
    pub(crate) ws_cap: usize,
}

impl StmContext {
    /// Runs `body` as a transaction with the given attributes, re-entering
    /// it after every retryable abort until the commit succeeds.
    ///
    /// Aborts with `no_retry` set, explicit aborts and caller errors
    /// surface as [`Err`]; the abort reason is carried by
    /// [`TxError::Aborted`].
    pub fn execute<'m, T, F>(&mut self, attr: TxAttr, body: F) -> Result<T>
    where
        F: for<'c> Fn(&mut Transaction<'m, 'c>) -> Result<T>,
    {
        let mut tx = Transaction::start(self, attr);

        loop {
            let retries_before = tx.retries();

            let result = match body(&mut tx) {
                Ok(value) => tx.commit().map(|_| value),
                Err(err) => Err(err),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(TxError::Aborted(reason)) => {
                    if tx.is_active() && tx.retries() > retries_before {
                        // rolled back and re-prepared: enter the body again
                        continue;
                    }
                    // no_retry, explicit abort, or an abort error fabricated
                    // by the caller
                    tx.cancel();
                    return Err(TxError::Aborted(reason));
                }
                Err(err) => {
                    // a caller error unrelated to the protocol: drop the
                    // transaction and hand the error through
                    tx.cancel();
                    return Err(err);
                }
            }
        }
    }

    /// [`execute`](Self::execute) with default (read-write) attributes
    pub fn read_write<'m, T, F>(&mut self, body: F) -> Result<T>
    where
        F: for<'c> Fn(&mut Transaction<'m, 'c>) -> Result<T>,
    {
        self.execute(TxAttr::default(), body)
    }

    /// [`execute`](Self::execute) as a read-only transaction: no read set
    /// is kept and a store aborts with
    /// [`RoWrite`](crate::AbortReason::RoWrite)
    pub fn read_only<'m, T, F>(&mut self, body: F) -> Result<T>
    where
        F: for<'c> Fn(&mut Transaction<'m, 'c>) -> Result<T>,
    {
        self.execute(TxAttr::read_only(), body)
    }

    /// Starts a transaction without a retry loop. The caller owns the
    /// re-entry decision: on an abort every operation returns
    /// [`TxError::Aborted`] and, unless `no_retry` was set, the returned
    /// transaction is already re-prepared for another attempt.
    pub fn start<'m>(&mut self, attr: TxAttr) -> Transaction<'m, '_> {
        Transaction::start(self, attr)
    }

    /// Cumulative statistics of this thread
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Replaces the contention manager consulted on lock conflicts
    pub fn set_contention_manager(&mut self, cm: Box<dyn ContentionManager>) {
        self.cm = cm;
    }

    /// Stores transaction-specific data in a slot claimed via
    /// [`Stm::create_specific`]
    pub fn set_specific(&mut self, key: usize, value: Box<dyn Any + Send>) {
        assert!(
            key < self.stm.shared.nb_specific.load(Ordering::Acquire),
            "unknown specific slot"
        );
        self.specific[key] = Some(value);
    }

    /// Fetches transaction-specific data
    pub fn specific(&self, key: usize) -> Option<&(dyn Any + Send)> {
        self.specific.get(key).and_then(|slot| slot.as_deref())
    }

    /// Deregisters the descriptor. Dropping the context has the same
    /// effect.
    pub fn exit(self) {}
}

impl Drop for StmContext {
    fn drop(&mut self) {
        self.stm.shared.callbacks.thread_exit();
        self.stm.shared.registry.deregister(self.id);
        debug!("TX({}): THREAD EXIT", self.id);
    }
}
