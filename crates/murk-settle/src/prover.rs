//! Prover collaborator.

use async_trait::async_trait;
use thiserror::Error;

use crate::witness::Witness;

/// An opaque proof produced by the external proving backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof(pub Vec<u8>);

/// Failures reported by the proving backend.
#[derive(Debug, Error)]
pub enum ProverError {
    /// The witness did not satisfy the circuit.
    #[error("witness rejected: {0}")]
    Witness(String),

    /// The backend itself failed.
    #[error("prover backend error: {0}")]
    Backend(String),
}

/// Produces proofs from assembled witnesses.
///
/// Implementations own the compiled circuit artifact. Proving is
/// long-running (seconds to minutes); it runs on the async runtime so
/// ledger operations continue in the meantime, and the driving task can
/// be cancelled externally.
#[async_trait]
pub trait Prover: Send + Sync {
    /// Generate a proof for the witness.
    async fn prove(&self, witness: &Witness) -> Result<Proof, ProverError>;
}
