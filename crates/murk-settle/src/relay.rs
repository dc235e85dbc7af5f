//! Relay and fill collaborators.

use async_trait::async_trait;

use murk_core::Hash32;

/// Outcome of handing a prepared transaction to an external submitter.
///
/// Mirrors the relay protocol: either a transaction hash, or a message
/// with an optional `noRetry` marker distinguishing permanent rejection
/// from a transient one eligible for automatic retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The transaction was submitted.
    Accepted {
        /// Submitted transaction hash.
        tx: Hash32,
    },
    /// The submitter declined.
    Rejected {
        /// Reason supplied by the submitter.
        message: String,
        /// Permanent rejection; retrying is pointless.
        no_retry: bool,
    },
}

/// Submits prepared transactions on the user's behalf.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Submit opaque transaction data.
    async fn submit(&self, tx_data: &[u8]) -> anyhow::Result<RelayOutcome>;
}

/// Attempts fills of open orders against the external limit-order
/// protocol.
#[async_trait]
pub trait FillTaker: Send + Sync {
    /// Try to fill the order described by `payload` + `extension`.
    async fn try_fill(&self, payload: &[u8], extension: &[u8]) -> anyhow::Result<RelayOutcome>;
}
