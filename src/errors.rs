// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Global return type
pub type Result<T> = core::result::Result<T, TxError>;

/// The cause of a transactional abort.
///
/// Aborts are recoverable: unless the transaction carries the `no_retry`
/// attribute or the reason is [`AbortReason::Explicit`], the transaction is
/// re-prepared and the body is entered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveError)]
pub enum AbortReason {
    /// A load observed a version newer than the snapshot and extension failed
    #[error("read validation failed")]
    ValRead,

    /// A written stripe carries a version newer than the snapshot and the
    /// transaction has already read an older version of it
    #[error("write validation failed")]
    ValWrite,

    /// Another transaction owned a lock during commit-time acquisition
    #[error("write-write conflict")]
    WwConflict,

    /// Revalidation between lock acquisition and publication failed
    #[error("commit validation failed")]
    Validate,

    /// A transaction marked read-only attempted a store
    #[error("store inside read-only transaction")]
    RoWrite,

    /// The caller requested the abort
    #[error("explicit abort")]
    Explicit,

    /// The contention manager gave up spinning on an owned lock
    #[error("killed by contention manager")]
    Killed,
}

#[derive(Debug, PartialEq, Eq, DeriveError)]
pub enum TxError {
    /// The transaction rolled back. Carries the abort reason the caller can
    /// branch on after a `no_retry` or explicit abort.
    #[error("transaction aborted ({0})")]
    Aborted(AbortReason),

    /// No more than [`MAX_THREADS`](crate::MAX_THREADS) descriptors may be
    /// registered at once
    #[error("maximum number of threads reached")]
    ThreadLimit,

    /// Each callback hook accepts at most [`MAX_CB`](crate::MAX_CB) entries
    #[error("maximum number of module callbacks reached")]
    CallbackLimit,

    /// All transaction-specific data slots are taken
    #[error("maximum number of specific slots reached")]
    SpecificLimit,

    /// Inner error occured ({0})
    #[error("inner error occured ({0})")]
    Inner(String),
}

impl TxError {
    /// Returns the abort reason, if this error is a rollback
    pub fn reason(&self) -> Option<AbortReason> {
        match self {
            TxError::Aborted(reason) => Some(*reason),
            _ => None,
        }
    }
}
