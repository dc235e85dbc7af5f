//! Ledger errors.

use murk_core::{Amount, CoreError, Field32, Hash32};
use thiserror::Error;

/// Errors produced by the note ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No unspent notes exist for the requested asset.
    #[error("no unspent notes for asset")]
    NoNotes,

    /// Total unspent balance is below the requested amount.
    #[error("insufficient balance: have {have:?}, need {need:?}")]
    InsufficientBalance {
        /// Total unspent balance for the asset.
        have: Amount,
        /// Requested amount.
        need: Amount,
    },

    /// No subset of at most two notes reaches the requested amount, even
    /// though the total balance may.
    #[error("amount not reachable with two notes: best {reachable:?}, need {need:?}")]
    TooManyNotes {
        /// Best total achievable with the two largest notes.
        reachable: Amount,
        /// Requested amount.
        need: Amount,
    },

    /// A note with this commitment already exists.
    #[error("note already present: {0}")]
    DuplicateNote(Field32),

    /// An order with this id already exists.
    #[error("order already present: {0}")]
    DuplicateOrder(Hash32),

    /// No order with this id.
    #[error("unknown order: {0}")]
    UnknownOrder(Hash32),

    /// No withdrawal with this id.
    #[error("unknown withdrawal: {0}")]
    UnknownWithdrawal(Hash32),

    /// No outstanding reservation with this attempt id.
    #[error("unknown spend attempt: {0}")]
    UnknownAttempt(u64),

    /// Underlying storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A core-level validation or hashing failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
