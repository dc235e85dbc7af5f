//! Persisted record types.
//!
//! Every record is Borsh-encoded into sled, keyed by commitment or id.
//! State is always an explicit machine value; nothing is inferred from
//! scattered flags.

use borsh::{BorshDeserialize, BorshSerialize};

use murk_core::{Address, Amount, CombinedSecret, CoreError, Field32, Hash32, Note};

/// Identifier of an in-flight spend attempt holding reservations.
pub type AttemptId = u64;

/// Lifecycle state of an owned note.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum NoteState {
    /// Spendable and counted in balances.
    Unspent,
    /// Selected by an in-flight spend attempt; excluded from selection
    /// until the attempt commits or aborts.
    Reserved(AttemptId),
    /// Consumed by a confirmed spend. Kept for history.
    Spent,
}

/// A note as tracked by the ledger.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct NoteRecord {
    /// The committed value itself.
    pub note: Note,
    /// Cached commitment, the record's key.
    pub commitment: Field32,
    /// On-chain leaf index; set once the `NewLeaf` event confirms it.
    pub leaf_index: Option<u32>,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Lifecycle state.
    pub state: NoteState,
}

impl NoteRecord {
    /// Build a record for a note whose leaf index is already confirmed.
    pub fn confirmed(note: Note, leaf_index: u32, created_at: u64) -> Result<Self, CoreError> {
        let commitment = note.commitment()?;
        Ok(Self {
            note,
            commitment,
            leaf_index: Some(leaf_index),
            created_at,
            state: NoteState::Unspent,
        })
    }

    /// Whether the note counts toward the spendable balance.
    pub fn is_unspent(&self) -> bool {
        self.state == NoteState::Unspent
    }
}

/// The result of a successful coin selection.
///
/// The contained notes are already reserved under `attempt`; the caller
/// must resolve the attempt with `commit_attempt` or `abort_attempt`.
#[derive(Clone, Debug)]
pub struct SpendSelection {
    /// Reservation handle.
    pub attempt: AttemptId,
    /// Selected notes, largest first. Never more than two.
    pub notes: Vec<NoteRecord>,
    /// Total amount across the selected notes.
    pub achieved: Amount,
}

impl SpendSelection {
    /// The change note for a spend of `amount`: a fresh-secret note of the
    /// leftover, or `None` when the selection is exact.
    pub fn change_note(&self, amount: Amount) -> Result<Option<Note>, CoreError> {
        let leftover = self.achieved.checked_sub(amount)?;
        if leftover.is_zero() {
            return Ok(None);
        }
        let asset = self
            .notes
            .first()
            .map(|n| n.note.asset)
            .ok_or(CoreError::InvalidValue("selection holds no notes"))?;
        Ok(Some(Note::fresh(asset, leftover)))
    }
}

/// Settlement state of an order.
///
/// `Draft → ProofPending → Relaying → AwaitingConfirmation → Open` and
/// from `Open` into one of the terminal states. `Reverted` keeps the
/// record so the user can retry or inspect the transaction.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub enum OrderState {
    /// Created locally; inputs reserved, nothing proven yet.
    Draft,
    /// Witness assembled, proof generation running.
    ProofPending,
    /// Proof in hand, submission to the relay in progress.
    Relaying,
    /// Accepted by the relay; waiting for the receipt of `tx`.
    AwaitingConfirmation {
        /// The relayed transaction.
        tx: Hash32,
    },
    /// Placed on-chain; eligible for filling and cancellation.
    Open,
    /// Filled by the taker side.
    Filled {
        /// Unix seconds at fill confirmation.
        at: u64,
        /// Fill transaction.
        tx: Hash32,
        /// Quote amount received.
        quote_amount: Amount,
        /// Leaf index of the minted quote note.
        leaf_index: u32,
    },
    /// Cancelled by revealing the preimage; locked funds re-minted.
    Cancelled {
        /// Unix seconds at cancel confirmation.
        at: u64,
        /// Cancel transaction.
        tx: Hash32,
        /// Leaf index of the re-minted note.
        leaf_index: u32,
    },
    /// The placement transaction reverted; ledger untouched.
    Reverted {
        /// The reverted transaction.
        tx: Hash32,
    },
    /// Passed its expiry timestamp without fill or cancel.
    Expired,
}

impl OrderState {
    /// Whether the order has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled { .. }
                | OrderState::Cancelled { .. }
                | OrderState::Reverted { .. }
                | OrderState::Expired
        )
    }

    /// Short label for logs and listings.
    pub fn label(&self) -> &'static str {
        match self {
            OrderState::Draft => "draft",
            OrderState::ProofPending => "proof-pending",
            OrderState::Relaying => "relaying",
            OrderState::AwaitingConfirmation { .. } => "awaiting-confirmation",
            OrderState::Open => "open",
            OrderState::Filled { .. } => "filled",
            OrderState::Cancelled { .. } => "cancelled",
            OrderState::Reverted { .. } => "reverted",
            OrderState::Expired => "expired",
        }
    }
}

/// An order as tracked by the ledger.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct OrderRecord {
    /// Raw order hash from the external limit-order protocol; the id.
    pub id: Hash32,
    /// Field-normalized order hash, as the circuit sees it.
    pub normalized_hash: Field32,
    /// Asset being sold.
    pub base_asset: Address,
    /// Asset being bought.
    pub quote_asset: Address,
    /// Amount of base asset locked by the order.
    pub base_amount: Amount,
    /// Minimum acceptable quote amount.
    pub min_quote_amount: Amount,
    /// Limit rate at order creation.
    pub rate: f64,
    /// Offset from market price at order creation.
    pub diff_percentage: f64,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds after which the order is expired.
    pub expired_at: u64,
    /// Secret whose keccak the contract checks on cancellation.
    pub cancel_preimage: Field32,
    /// keccak256(cancel_preimage), registered with the order on-chain.
    pub cancel_hash: Hash32,
    /// Secret pair under which fill proceeds or cancelled funds are
    /// re-minted.
    pub change_secret: CombinedSecret,
    /// Opaque order payload for the fill collaborator.
    pub fill_payload: Vec<u8>,
    /// Opaque order extension for the fill collaborator.
    pub fill_extension: Vec<u8>,
    /// Placement transaction, once relayed.
    pub tx: Option<Hash32>,
    /// Set when the fill collaborator permanently rejected the order;
    /// stops background polling without closing the order.
    pub fill_halted: bool,
    /// Settlement state.
    pub state: OrderState,
}

impl OrderRecord {
    /// Whether the order belongs in the active list.
    pub fn is_open(&self, now: u64) -> bool {
        self.state == OrderState::Open && self.expired_at > now
    }

    /// Whether the order belongs in history: terminal or past expiry.
    pub fn in_history(&self, now: u64) -> bool {
        self.state.is_terminal() || self.expired_at <= now
    }
}

/// Stage of a two-phase withdrawal.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum WithdrawStage {
    /// Round one (the withdraw order) not yet confirmed.
    ProofPending,
    /// Round one confirmed; round two (the withdraw call) outstanding.
    /// Resumable from here.
    OrderConfirmed {
        /// Round-one transaction.
        order_tx: Hash32,
    },
    /// Both rounds confirmed.
    Completed {
        /// Round-one transaction.
        order_tx: Hash32,
        /// Round-two transaction.
        withdraw_tx: Hash32,
    },
}

/// A withdrawal as tracked by the ledger.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct WithdrawRecord {
    /// Synthetic order hash; the id.
    pub id: Hash32,
    /// Asset withdrawn.
    pub asset: Address,
    /// Amount withdrawn.
    pub amount: Amount,
    /// Receiving external address.
    pub recipient: Address,
    /// Salt bound into the synthetic order hash.
    pub salt: Field32,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Current stage.
    pub stage: WithdrawStage,
}
