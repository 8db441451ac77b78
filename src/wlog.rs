// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The write log buffers speculative stores until commit. Entries are
//! published through the lock table in one batch once all covered locks have
//! been acquired; until then no other thread can observe a buffered value.
//!
//! Address lookups are guarded by a degenerate word-sized Bloom filter (the
//! same hash TL2 uses) that serves purely as a negative oracle in front of
//! the linear scan.

use std::sync::atomic::AtomicUsize;

/// A buffered store. `value` and `mask` compose partial-word writes: the
/// published word is `(current & !mask) | (value & mask)`.
pub(crate) struct WriteEntry<'m> {
    /// Word written
    pub addr: &'m AtomicUsize,
    /// New value
    pub value: usize,
    /// Write mask
    pub mask: usize,
    /// Lock slot covering the stripe
    pub slot: usize,
    /// Version to restore on rollback, captured when the lock is acquired
    pub version: usize,
    /// Cleared on the entry that acquired the lock; set on entries whose
    /// lock is held through another entry of the same transaction
    pub no_drop: bool,
}

fn filter_hash(addr: usize) -> usize {
    (addr >> 2) ^ (addr >> 5)
}

fn filter_bits(addr: usize) -> usize {
    1 << (filter_hash(addr) & (usize::BITS as usize - 1))
}

#[inline]
pub(crate) fn word_addr(word: &AtomicUsize) -> usize {
    word as *const AtomicUsize as usize
}

pub(crate) struct WriteLog<'m> {
    entries: Vec<WriteEntry<'m>>,
    bloom: usize,
    /// Number of locks this transaction holds in owned state
    pub nb_acquired: usize,
}

impl<'m> WriteLog<'m> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            bloom: 0,
            nb_acquired: 0,
        }
    }

    /// Looks up a previous write to `addr`. The Bloom filter answers
    /// definitely-absent; only a positive falls through to the scan.
    pub fn find(&self, addr: usize) -> Option<usize> {
        let bits = filter_bits(addr);
        if self.bloom & bits != bits {
            return None;
        }

        self.entries.iter().position(|w| word_addr(w.addr) == addr)
    }

    /// Appends a store; the backing storage grows by doubling when full
    pub fn push(&mut self, addr: &'m AtomicUsize, value: usize, mask: usize, slot: usize, version: usize) {
        self.bloom |= filter_bits(word_addr(addr));
        self.entries.push(WriteEntry {
            addr,
            value,
            mask,
            slot,
            version,
            no_drop: true,
        });
    }

    pub fn entry(&self, index: usize) -> &WriteEntry<'m> {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut WriteEntry<'m> {
        &mut self.entries[index]
    }

    /// Machine address of the indexed entry, as packed into an owned lock
    /// word. Stable for the whole commit window: the log cannot grow between
    /// acquisition and publication.
    #[inline]
    pub fn entry_addr(&self, index: usize) -> usize {
        &self.entries[index] as *const WriteEntry<'m> as usize
    }

    /// Returns the index of the entry at the given machine address if it
    /// lies inside this log's storage. This is the owned-by-self check: a
    /// foreign owner never matches and is never dereferenced.
    pub fn index_of(&self, entry_addr: usize) -> Option<usize> {
        let base = self.entries.as_ptr() as usize;
        let end = base + self.entries.len() * core::mem::size_of::<WriteEntry<'m>>();
        if entry_addr < base || entry_addr >= end {
            return None;
        }
        Some((entry_addr - base) / core::mem::size_of::<WriteEntry<'m>>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry<'m>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bloom = 0;
        self.nb_acquired = 0;
    }
}

#[cfg(test)]
mod tests {

    use super::{word_addr, WriteLog};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_write_log_lookup() {
        let words: Vec<AtomicUsize> = (0..64).map(AtomicUsize::new).collect();
        let mut log = WriteLog::with_capacity(4);

        for (i, word) in words.iter().enumerate().take(32) {
            log.push(word, i, usize::MAX, i, 0);
        }

        for (i, word) in words.iter().enumerate().take(32) {
            let found = log.find(word_addr(word)).expect("written word not found");
            assert_eq!(log.entry(found).value, i);
        }

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.find(word_addr(&words[0])), None);
    }

    /// The filter must never report "not written" for a written address
    #[test]
    fn test_bloom_no_false_negatives() {
        let words: Vec<AtomicUsize> = (0..512).map(|_| AtomicUsize::new(0)).collect();
        let mut log = WriteLog::with_capacity(4);

        for (i, word) in words.iter().enumerate() {
            log.push(word, i, usize::MAX, i, 0);
            assert!(log.find(word_addr(word)).is_some());
        }
    }

    #[test]
    fn test_entry_addr_round_trip() {
        let words: Vec<AtomicUsize> = (0..8).map(|_| AtomicUsize::new(0)).collect();
        let mut log = WriteLog::with_capacity(8);

        for (i, word) in words.iter().enumerate() {
            log.push(word, i, usize::MAX, i, 0);
        }

        for i in 0..log.len() {
            let addr = log.entry_addr(i);
            assert_eq!(log.index_of(addr), Some(i));
        }

        // an address outside the storage does not resolve
        let foreign = AtomicUsize::new(0);
        assert_eq!(log.index_of(word_addr(&foreign)), None);
    }
}
