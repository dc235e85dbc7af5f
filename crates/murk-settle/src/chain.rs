//! Chain write/receipt collaborator.
//!
//! ABI decoding happens behind this boundary: implementations hand back
//! `NewLeaf` events already parsed, which is the sole mechanism for
//! learning a note's confirmed leaf index.

use async_trait::async_trait;

use murk_core::{Address, Amount, Field32, Hash32};

/// Mined transaction status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Executed successfully.
    Succeeded,
    /// Mined but reverted; no state change on-chain.
    Reverted,
}

/// A decoded `NewLeaf(secretHash, noteHash, insertedIndex)` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLeaf {
    /// Combined-secret hash registered with the leaf.
    pub secret_hash: Field32,
    /// The inserted note commitment.
    pub note_hash: Field32,
    /// Index the leaf landed at.
    pub inserted_index: u32,
}

/// A mined transaction receipt with its decoded leaf insertions.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    /// The transaction.
    pub tx: Hash32,
    /// Execution status.
    pub status: TxStatus,
    /// Leaf-insertion events emitted by the transaction.
    pub new_leaves: Vec<NewLeaf>,
}

impl TxReceipt {
    /// Find the insertion event for a specific note commitment.
    pub fn leaf_for(&self, note_hash: &Field32) -> Option<&NewLeaf> {
        self.new_leaves.iter().find(|l| l.note_hash == *note_hash)
    }
}

/// Direct chain access: the only write that bypasses the relay (deposits
/// come from the user's own wallet) plus receipt retrieval.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Call `deposit(asset, amount, secretHash)` on the pool contract.
    async fn deposit(
        &self,
        asset: Address,
        amount: Amount,
        secret_hash: Field32,
    ) -> anyhow::Result<Hash32>;

    /// Wait for the receipt of a transaction. No timeout is imposed here;
    /// callers run on the async runtime and stay cancellable.
    async fn await_receipt(&self, tx: Hash32) -> anyhow::Result<TxReceipt>;
}
