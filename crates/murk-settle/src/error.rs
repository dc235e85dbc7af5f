//! Settlement errors.

use murk_core::Hash32;
use murk_ledger::LedgerError;
use murk_tree::TreeError;
use thiserror::Error;

/// Errors produced by the settlement pipeline.
#[derive(Debug, Error)]
pub enum SettleError {
    /// Coin selection or ledger bookkeeping failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Tree synchronization or proof extraction failed.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Field encoding or hashing failed.
    #[error(transparent)]
    Core(#[from] murk_core::CoreError),

    /// The prover rejected the witness or failed internally. No ledger
    /// mutation has happened; the reservation is released by the engine.
    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// The relay refused the prepared transaction.
    #[error("relay rejected transaction (permanent: {permanent}): {message}")]
    RelayRejected {
        /// Relay-supplied reason.
        message: String,
        /// `true` mirrors the relay's `noRetry` flag; no automatic retry.
        permanent: bool,
    },

    /// The transaction was mined but reverted. Ledger untouched.
    #[error("transaction reverted: {tx}")]
    TransactionReverted {
        /// The reverted transaction.
        tx: Hash32,
    },

    /// The receipt lacks the expected leaf-insertion event. Fatal:
    /// the ledger is left untouched and the reservation held for manual
    /// reconciliation.
    #[error("expected NewLeaf event not found in receipt of {tx}")]
    EventNotFound {
        /// The confirmed transaction missing the event.
        tx: Hash32,
    },

    /// The witness's root was superseded before submission and rebuilding
    /// kept failing.
    #[error("merkle root went stale during proof generation")]
    StaleMerkleRoot,

    /// A chain/fill collaborator transport failure.
    #[error("chain collaborator error: {0}")]
    Chain(String),

    /// The operation is not valid in the order's current state.
    #[error("order {id} is {state}, operation not applicable")]
    InvalidOrderState {
        /// Order id.
        id: Hash32,
        /// Current state label.
        state: &'static str,
    },

    /// Round two of a withdrawal failed after round one confirmed.
    /// The withdrawal stays resumable at its recorded stage.
    #[error("withdraw {id}: second round failed: {message}")]
    SecondRoundFailed {
        /// Withdrawal id.
        id: Hash32,
        /// Underlying failure.
        message: String,
    },
}
