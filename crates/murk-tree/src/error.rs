//! Tree and synchronization errors.

use thiserror::Error;

/// Errors produced by the commitment tree or leaf synchronization.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Reading leaves from the chain collaborator failed or returned a
    /// partial result. Never silently truncated.
    #[error("chain read failed: {0}")]
    ChainRead(String),

    /// The requested commitment is not among the synchronized leaves.
    #[error("commitment not found in synchronized tree")]
    NotFound,

    /// The tree has reached its fixed capacity.
    #[error("commitment tree is full")]
    Full,

    /// No synchronization has happened yet.
    #[error("tree has not been synchronized")]
    NotSynced,

    /// Hashing a node failed.
    #[error(transparent)]
    Hash(#[from] murk_core::CoreError),
}
