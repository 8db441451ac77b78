// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transaction descriptor and the speculative read, write, commit and
//! rollback paths.
//!
//! Reads are invisible: a load samples the covering lock word before and
//! after reading the value (the lock-value-lock idiom), so a value is only
//! returned together with a version it is consistent with. Writes are
//! buffered in the write log; locks are acquired at commit, in reverse
//! write-set order, then the global clock is ticked once and the read set is
//! revalidated before the buffered values are published.
//!
//! An abort releases whatever was acquired, restores the descriptor and, for
//! a retryable reason, re-prepares a fresh snapshot so the caller can enter
//! the body again. Control transfer back to the transaction start is an
//! [`Err`] carrying the [`AbortReason`] that unwinds through `?`.

use log::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    cm::{ConflictAction, ContentionManager as _},
    errors::{AbortReason, Result, TxError},
    rlog::ReadLog,
    stm::{Shared, StmContext},
    wlog::{word_addr, WriteLog},
};

/// Transaction attributes, fixed at start
#[derive(Debug, Clone, Copy, Default)]
pub struct TxAttr {
    /// The transaction will not issue any store. A store under this
    /// attribute aborts with [`AbortReason::RoWrite`] and the retry runs in
    /// read-write mode.
    pub read_only: bool,

    /// Surface every abort to the caller instead of retrying
    pub no_retry: bool,

    /// Accepted for compatibility; this design reads invisibly
    pub visible_reads: bool,

    /// Accepted for compatibility; extension is controlled per transaction
    /// via [`Transaction::set_extension`]
    pub no_extend: bool,
}

impl TxAttr {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }
}

/// Descriptor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    Active,
    Committed,
    Aborted,
}

/// A running transaction. `'m` is the lifetime of the shared memory the
/// transaction operates on; buffered writes hold references into it, so the
/// memory is guaranteed to outlive publication.
pub struct Transaction<'m, 'c> {
    ctx: &'c mut StmContext,
    attr: TxAttr,
    status: TxStatus,
    /// Snapshot validity range. Reads are consistent at every clock value in
    /// `[start, end]`; `end` moves forward on successful extension.
    start: usize,
    end: usize,
    read_only: bool,
    can_extend: bool,
    nesting: usize,
    last_reason: Option<AbortReason>,
    rlog: ReadLog,
    wlog: WriteLog<'m>,
}

impl<'m, 'c> Transaction<'m, 'c> {
    pub(crate) fn start(ctx: &'c mut StmContext, attr: TxAttr) -> Self {
        let rs_cap = ctx.rs_cap;
        let ws_cap = ctx.ws_cap;

        let mut tx = Self {
            ctx,
            attr,
            status: TxStatus::Idle,
            start: 0,
            end: 0,
            read_only: attr.read_only,
            can_extend: true,
            nesting: 1,
            last_reason: None,
            rlog: ReadLog::with_capacity(rs_cap),
            wlog: WriteLog::with_capacity(ws_cap),
        };

        tx.prepare();

        let shared = tx.ctx.stm.shared.clone();
        info!("TX({}): START. GLOBAL VERSION ({})", tx.ctx.id, shared.clock.version());
        shared.callbacks.start();

        tx
    }

    /// Initializes the descriptor before start or restart. Blocks on the
    /// rollover barrier if the clock has reached the version ceiling.
    fn prepare(&mut self) {
        let shared = self.ctx.stm.shared.clone();

        loop {
            let now = shared.clock.version();
            if now >= shared.config.version_max {
                // block all transactions, reset clock and lock versions
                shared.registry.barrier(|| {
                    info!("ROLLOVER: RESETTING CLOCK AND LOCK VERSIONS");
                    shared.clock.reset();
                    shared.locks.reset();
                });
                continue;
            }
            self.start = now;
            self.end = now;
            break;
        }

        self.read_only = self.attr.read_only;
        self.can_extend = true;
        self.rlog.clear();
        self.wlog.clear();
        self.status = TxStatus::Active;
        self.ctx.cm.on_start();
    }

    /// Transactional load of a word (invisible read)
    pub fn load(&mut self, addr: &'m AtomicUsize) -> Result<usize> {
        if self.status != TxStatus::Active {
            return Err(self.dead());
        }

        let shared = self.ctx.stm.shared.clone();
        let a = word_addr(addr);

        // did we previously write the same word?
        let written = self.wlog.find(a);
        if let Some(index) = written {
            let entry = self.wlog.entry(index);
            if entry.mask == usize::MAX {
                // fully covered, no need to consult memory or the read set
                return Ok(entry.value);
            }
            // partially covered: the underlying word must still be observed
            // at a valid version, then the buffered bytes are overlaid
        }

        let slot_index = shared.locks.index(a);
        let slot = shared.locks.slot(slot_index);

        // lock - value - lock
        let mut w1 = slot.load();
        loop {
            if w1.is_owned() {
                if w1.is_unit() {
                    // a momentary unit store, not a transaction conflict
                    core::hint::spin_loop();
                    w1 = slot.load();
                    continue;
                }
                match self.ctx.cm.on_conflict(self.ctx.stats.retries, w1.0) {
                    ConflictAction::RetryRead => {
                        w1 = slot.load();
                        continue;
                    }
                    ConflictAction::AbortSelf => return Err(self.abort_with(AbortReason::Killed)),
                }
            }

            let value = addr.load(Ordering::Acquire);
            let w2 = slot.load();
            if w1 != w2 {
                // a writer published in between; retry with the fresh word
                w1 = w2;
                continue;
            }

            let version = w1.version();
            if version > self.end {
                // stale stripe: try to move the snapshot forward
                if self.read_only || !self.can_extend || !self.extend(&shared) {
                    return Err(self.abort_with(AbortReason::ValRead));
                }
                // the extension validated the read set, but this read is not
                // part of it yet: confirm the lock has not flipped meanwhile
                let w3 = slot.load();
                if w3 != w2 {
                    w1 = w3;
                    continue;
                }
            }

            let value = match written {
                Some(index) => {
                    let entry = self.wlog.entry(index);
                    (value & !entry.mask) | (entry.value & entry.mask)
                }
                None => value,
            };

            // read-only transactions keep no read set
            if !self.read_only {
                self.rlog.push(slot_index, version);
            }

            return Ok(value);
        }
    }

    /// Transactional store of a word
    pub fn store(&mut self, addr: &'m AtomicUsize, value: usize) -> Result<()> {
        self.store_masked(addr, value, usize::MAX)
    }

    /// Transactional store of the masked part of a word. The word published
    /// at commit is `(current & !mask) | (value & mask)`; stores to the same
    /// word merge their masks.
    pub fn store_masked(&mut self, addr: &'m AtomicUsize, value: usize, mask: usize) -> Result<()> {
        if self.status != TxStatus::Active {
            return Err(self.dead());
        }
        if self.read_only {
            // demote, so that the retry runs in read-write mode
            self.attr.read_only = false;
            return Err(self.abort_with(AbortReason::RoWrite));
        }

        let shared = self.ctx.stm.shared.clone();
        let a = word_addr(addr);
        let slot_index = shared.locks.index(a);
        let slot = shared.locks.slot(slot_index);

        let mut w = slot.load();
        loop {
            if w.is_owned() {
                if w.is_unit() {
                    core::hint::spin_loop();
                    w = slot.load();
                    continue;
                }
                match self.ctx.cm.on_conflict(self.ctx.stats.retries, w.0) {
                    ConflictAction::RetryRead => {
                        w = slot.load();
                        continue;
                    }
                    ConflictAction::AbortSelf => return Err(self.abort_with(AbortReason::Killed)),
                }
            }
            break;
        }

        if let Some(index) = self.wlog.find(a) {
            let entry = self.wlog.entry_mut(index);
            entry.value = (entry.value & !mask) | (value & mask);
            entry.mask |= mask;
            return Ok(());
        }

        let version = w.version();
        if version > self.end {
            // this transaction may have read an older version of the stripe
            if !self.can_extend || self.rlog.has_slot(slot_index) || !self.extend(&shared) {
                return Err(self.abort_with(AbortReason::ValWrite));
            }
        }

        // the lock is not acquired here; acquisition happens at commit
        self.wlog.push(addr, value, mask, slot_index, version);
        Ok(())
    }

    /// Nested begin. Only the outermost transaction carries state; inner
    /// levels are flattened into it.
    pub fn enter(&mut self) {
        self.nesting += 1;
    }

    /// Attempts to commit. At nesting depth greater than one this only
    /// closes the inner level; the real commit runs when the outermost
    /// level is closed. On failure the transaction has already rolled back
    /// and, unless `no_retry` is set, re-prepared for another attempt.
    pub fn commit(&mut self) -> Result<()> {
        if self.nesting > 1 {
            self.nesting -= 1;
            return Ok(());
        }

        if self.status == TxStatus::Committed {
            return Ok(());
        }
        if self.status != TxStatus::Active {
            return Err(self.dead());
        }

        let shared = self.ctx.stm.shared.clone();
        shared.callbacks.precommit();

        self.nesting = 0;

        // a transaction without writes commits without a clock tick
        if self.wlog.is_empty() {
            self.finalize_commit(&shared);
            return Ok(());
        }

        // acquire locks in reverse write-set order
        let mut index = self.wlog.len();
        while index > 0 {
            index -= 1;
            loop {
                let slot_index = self.wlog.entry(index).slot;
                let slot = shared.locks.slot(slot_index);
                let w = slot.load();

                if w.is_owned() {
                    if self.wlog.index_of(w.owner()).is_some() {
                        // already acquired through a later entry of this
                        // transaction covering the same stripe
                        break;
                    }
                    info!("TX({}): LOCK CONFLICT AT COMMIT", self.ctx.id);
                    return Err(self.abort_with(AbortReason::WwConflict));
                }

                if slot.try_acquire(w, self.wlog.entry_addr(index)) {
                    let entry = self.wlog.entry_mut(index);
                    entry.no_drop = false;
                    entry.version = w.version();
                    self.wlog.nb_acquired += 1;
                    break;
                }
            }
        }

        // commit timestamp (may exceed the version ceiling by up to the
        // number of threads; the ceiling leaves that much headroom)
        let t = shared.clock.increment();

        // revalidate, but only if another transaction committed in between
        if self.start != t - 1 && !self.validate(&shared) {
            info!("TX({}): VALIDATING READ SET FAILED", self.ctx.id);
            return Err(self.abort_with(AbortReason::Validate));
        }

        // install the new values; drop each acquired lock with the new
        // timestamp once the last covered word is written
        for index in 0..self.wlog.len() {
            let entry = self.wlog.entry(index);
            if entry.mask == usize::MAX {
                entry.addr.store(entry.value, Ordering::Release);
            } else if entry.mask != 0 {
                let current = entry.addr.load(Ordering::Acquire);
                entry
                    .addr
                    .store((current & !entry.mask) | (entry.value & entry.mask), Ordering::Release);
            }
            if !entry.no_drop {
                shared.locks.slot(entry.slot).release(t);
            }
        }
        self.wlog.nb_acquired = 0;

        info!("TX({}): COMMITTED AT ({})", self.ctx.id, t);
        self.finalize_commit(&shared);
        Ok(())
    }

    /// Caller-requested abort. Control returns to the caller of the retry
    /// loop; the transaction is not re-entered.
    pub fn abort(&mut self) -> Result<()> {
        if self.status != TxStatus::Active {
            return Err(self.dead());
        }
        Err(self.abort_with(AbortReason::Explicit))
    }

    /// Enables or disables snapshot extension; an optional bound clamps the
    /// snapshot upper end.
    pub fn set_extension(&mut self, enable: bool, bound: Option<usize>) {
        self.can_extend = enable;
        if let Some(timestamp) = bound {
            if timestamp < self.end {
                self.end = timestamp;
            }
        }
    }

    /// Validates the read set against the live lock table
    fn validate(&self, shared: &Shared) -> bool {
        for read in self.rlog.iter() {
            let w = shared.locks.slot(read.slot).load();
            if w.is_owned() {
                // owned by this transaction during its own commit window?
                match self.wlog.index_of(w.owner()) {
                    Some(index) => {
                        if self.wlog.entry(index).version != read.version {
                            return false;
                        }
                    }
                    // locked by another transaction: cannot validate
                    None => return false,
                }
            } else if w.version() != read.version {
                return false;
            }
        }
        true
    }

    /// Extends the snapshot to the current clock after revalidating every
    /// read. Fails at the version ceiling, forcing a rollover at the next
    /// start.
    fn extend(&mut self, shared: &Shared) -> bool {
        let now = shared.clock.version();
        if now >= shared.config.version_max {
            return false;
        }
        if self.validate(shared) {
            debug!("TX({}): EXTEND SNAPSHOT ({}) -> ({})", self.ctx.id, self.end, now);
            self.end = now;
            return true;
        }
        false
    }

    /// Rolls the transaction back: drops acquired locks with their captured
    /// versions, updates statistics, runs abort callbacks and, for a
    /// retryable abort, re-prepares the descriptor.
    fn rollback(&mut self, reason: AbortReason) {
        debug_assert_eq!(self.status, TxStatus::Active);

        let shared = self.ctx.stm.shared.clone();

        if self.wlog.nb_acquired > 0 {
            for index in (0..self.wlog.len()).rev() {
                let (slot_index, version, no_drop) = {
                    let entry = self.wlog.entry(index);
                    (entry.slot, entry.version, entry.no_drop)
                };
                if !no_drop {
                    shared.locks.slot(slot_index).release(version);
                    self.wlog.nb_acquired -= 1;
                    if self.wlog.nb_acquired == 0 {
                        break;
                    }
                }
            }
        }

        info!("TX({}): ABORT ({})", self.ctx.id, reason);

        self.ctx.stats.on_abort(reason);
        self.ctx.rs_cap = self.ctx.rs_cap.max(self.rlog.capacity());
        self.ctx.ws_cap = self.ctx.ws_cap.max(self.wlog.capacity());
        self.status = TxStatus::Aborted;
        self.last_reason = Some(reason);
        self.nesting = 1;

        shared.callbacks.abort();

        // surface the abort instead of re-entering the body
        if self.attr.no_retry || reason == AbortReason::Explicit {
            self.nesting = 0;
            return;
        }

        self.prepare();
    }

    fn abort_with(&mut self, reason: AbortReason) -> TxError {
        self.rollback(reason);
        TxError::Aborted(reason)
    }

    /// Cancels an active transaction without retrying, on behalf of a
    /// caller error that unwound through the retry loop
    pub(crate) fn cancel(&mut self) {
        if self.status == TxStatus::Active {
            // an explicit abort never re-prepares
            self.rollback(AbortReason::Explicit);
        }
    }

    fn dead(&self) -> TxError {
        TxError::Aborted(self.last_reason.unwrap_or(AbortReason::Explicit))
    }

    pub fn is_active(&self) -> bool {
        self.status == TxStatus::Active
    }

    pub fn is_aborted(&self) -> bool {
        self.status == TxStatus::Aborted
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// The snapshot validity range `[start, end]`
    pub fn snapshot(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    pub fn attributes(&self) -> TxAttr {
        self.attr
    }

    pub(crate) fn retries(&self) -> usize {
        self.ctx.stats.retries
    }

    /// Returns a statistic of this transaction or its thread, or `None` for
    /// an unknown key
    pub fn stat(&self, name: &str) -> Option<usize> {
        match name {
            "read_set_size" => Some(self.rlog.capacity()),
            "write_set_size" => Some(self.wlog.capacity()),
            "read_set_nb_entries" => Some(self.rlog.len()),
            "write_set_nb_entries" => Some(self.wlog.len()),
            "read_only" => Some(self.read_only as usize),
            _ => self.ctx.stats.get(name),
        }
    }

    fn finalize_commit(&mut self, shared: &Shared) {
        self.status = TxStatus::Committed;
        self.ctx.stats.on_commit();
        self.ctx.rs_cap = self.ctx.rs_cap.max(self.rlog.capacity());
        self.ctx.ws_cap = self.ctx.ws_cap.max(self.wlog.capacity());
        shared.callbacks.commit();
    }
}
