// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Stronghold Word-Granularity Software Transactional Memory
//!
//! This crate implements a word-granularity software transactional memory
//! with lazy write-back and commit-time locking, a variation of the TL2
//! algorithm described by Shavit et al. Shared memory is striped over a
//! fixed array of word-sized version locks; a single global version clock
//! orders all committed state.
//!
//! ## Algorithm
//! ---
//! A transaction samples the clock at start and speculates: loads go through
//! the lock-value-lock idiom and record the observed stripe versions in a
//! read log, stores are buffered in a write log. Nothing is locked before
//! commit. At commit the write log's stripes are locked in reverse order,
//! the clock is ticked once, the read log is revalidated if anyone else
//! committed in between, and the buffered values are published with the new
//! timestamp. A reader that observes a version beyond its snapshot tries to
//! *extend* the snapshot by revalidating its reads against the current
//! clock, so long-running readers survive concurrent committers.
//!
//! Any validation failure rolls the transaction back and re-enters the
//! body, which therefore must be free of side effects other than
//! transactional accesses.
//!
//! ## Example
//! ---
//! ```
//! use std::sync::atomic::AtomicUsize;
//! use stronghold_wstm::{Stm, TxAttr};
//!
//! let stm = Stm::new();
//! let mut ctx = stm.context().expect("too many threads");
//!
//! let accounts: Vec<AtomicUsize> = (0..2).map(|_| AtomicUsize::new(100)).collect();
//!
//! ctx.read_write(|tx| {
//!     let a = tx.load(&accounts[0])?;
//!     let b = tx.load(&accounts[1])?;
//!     tx.store(&accounts[0], a - 10)?;
//!     tx.store(&accounts[1], b + 10)?;
//!     Ok(())
//! })
//! .expect("transaction failed");
//!
//! assert_eq!(accounts[0].load(std::sync::atomic::Ordering::Acquire), 90);
//! assert_eq!(accounts[1].load(std::sync::atomic::Ordering::Acquire), 110);
//! ```
//!
//! # Sources
//! - [TL2 paper](https://dcl.epfl.ch/site/_media/education/4.pdf)
//! - [LSA / time-based STM](https://infoscience.epfl.ch/record/136702)

pub mod breaker;
pub mod callbacks;
pub mod cm;
pub mod errors;
pub mod stats;
pub mod stm;
pub mod transaction;

mod quiesce;
mod rlog;
mod version;
mod vlock;
mod wlog;

// public re-exports
pub use breaker::BusyBreaker;
pub use callbacks::{CallbackSet, MAX_CB};
pub use cm::{ConflictAction, ContentionManager, Suicide};
pub use errors::{AbortReason, Result, TxError};
pub use quiesce::MAX_THREADS;
pub use stats::Stats;
pub use stm::{Config, Parameter, Stm, StmContext, MAX_SPECIFIC, VERSION_MAX_DEFAULT};
pub use transaction::{Transaction, TxAttr, TxStatus};
