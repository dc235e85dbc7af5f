//! The settlement state machine.
//!
//! One engine instance drives every flow that moves value: order
//! placement, background fill polling, cancellation, deposits, and the
//! two-phase withdrawal. Ledger mutation happens only on the success
//! transitions; every failure path either releases the reservation or,
//! where the chain may already hold the spend, deliberately keeps it for
//! manual reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murk_core::{
    cancel_hash, combined_secret_hash, normalize_hash, random_field, Address, Amount,
    CombinedSecret, Field32, Hash32, Note,
};
use murk_ledger::{
    AttemptId, LedgerService, NoteRecord, OrderRecord, OrderState, SpendSelection, WithdrawRecord,
    WithdrawStage,
};
use murk_tree::{LeafSource, MerkleSync};

use crate::call::{order_call, withdraw_order_hash, ChainCall};
use crate::chain::{ChainClient, TxReceipt, TxStatus};
use crate::error::SettleError;
use crate::prover::{Proof, Prover};
use crate::relay::{FillTaker, Relay, RelayOutcome};
use crate::witness::{build_witness, SpendIntent, Witness};

/// Current unix time in seconds.
pub fn now_unix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Tunables of the settlement engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between background fill attempts per open order.
    pub fill_interval: Duration,
    /// Submission attempts before a transient relay rejection becomes an
    /// error.
    pub relay_attempts: u32,
    /// Pause between relay submission attempts.
    pub relay_backoff: Duration,
    /// Re-sync attempts when the merkle root goes stale mid-proof.
    pub sync_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fill_interval: Duration::from_secs(25),
            relay_attempts: 3,
            relay_backoff: Duration::from_secs(2),
            sync_attempts: 3,
        }
    }
}

/// User intent to place an order.
///
/// The order hash and the opaque fill payload come from the external
/// limit-order protocol; this core treats both as given.
#[derive(Clone, Debug)]
pub struct OrderIntent {
    /// Raw order hash; becomes the order id.
    pub order_hash: Hash32,
    /// Asset being sold.
    pub base_asset: Address,
    /// Asset being bought.
    pub quote_asset: Address,
    /// Amount of base asset to lock.
    pub base_amount: Amount,
    /// Minimum acceptable quote amount.
    pub min_quote_amount: Amount,
    /// Limit rate, for display and history.
    pub rate: f64,
    /// Offset from market price, for display and history.
    pub diff_percentage: f64,
    /// Unix seconds after which the order expires.
    pub expired_at: u64,
    /// Opaque order payload for the fill collaborator.
    pub fill_payload: Vec<u8>,
    /// Opaque order extension for the fill collaborator.
    pub fill_extension: Vec<u8>,
}

/// Result of a single fill attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// The order was filled and the quote note minted.
    Filled {
        /// Fill transaction.
        tx: Hash32,
    },
    /// Not filled this round; polling continues.
    NotFilled,
    /// Polling must stop: terminal state, concurrent close, or permanent
    /// rejection by the fill collaborator.
    Halted,
    /// The order passed its expiry and was reclassified into history.
    Expired,
}

/// Drives orders, deposits, and withdrawals through settlement.
pub struct SettlementEngine<S, R, F, C, P> {
    ledger: Arc<LedgerService>,
    merkle: Arc<MerkleSync<S>>,
    relay: R,
    fill: F,
    chain: C,
    prover: P,
    config: EngineConfig,
    pollers: Mutex<HashMap<Hash32, JoinHandle<()>>>,
}

impl<S, R, F, C, P> SettlementEngine<S, R, F, C, P>
where
    S: LeafSource + 'static,
    R: Relay + 'static,
    F: FillTaker + 'static,
    C: ChainClient + 'static,
    P: Prover + 'static,
{
    /// Wire an engine from its collaborators.
    pub fn new(
        ledger: Arc<LedgerService>,
        merkle: Arc<MerkleSync<S>>,
        relay: R,
        fill: F,
        chain: C,
        prover: P,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            merkle,
            relay,
            fill,
            chain,
            prover,
            config,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// The ledger this engine settles against.
    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    // ------------------------------------------------------------------
    // Deposit
    // ------------------------------------------------------------------

    /// Deposit `amount` of `asset` into the pool, minting a fresh note.
    pub async fn deposit(&self, asset: Address, amount: Amount) -> Result<NoteRecord, SettleError> {
        let secret = CombinedSecret::random();
        let secret_hash = combined_secret_hash(&secret)?;
        let tx = self
            .chain
            .deposit(asset, amount, secret_hash)
            .await
            .map_err(|e| SettleError::Chain(e.to_string()))?;
        let receipt = self.confirm(tx).await?;

        let note = Note {
            asset,
            amount,
            secret,
        };
        let commitment = note.commitment()?;
        let leaf = receipt
            .leaf_for(&commitment)
            .ok_or(SettleError::EventNotFound { tx })?;
        let record = self.ledger.add_note(note, leaf.inserted_index, now_unix())?;
        info!(tx = %tx, commitment = %record.commitment, "deposit confirmed");
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Order placement
    // ------------------------------------------------------------------

    /// Place an order: reserve inputs, prove, relay, confirm, reconcile.
    ///
    /// Coin selection runs before anything else so an unfundable order
    /// fails without spending proving cost. On success the order is
    /// `Open` and a background fill poller is running for it.
    pub async fn place_order(self: &Arc<Self>, intent: OrderIntent) -> Result<Hash32, SettleError> {
        let id = intent.order_hash;
        let selection = self
            .ledger
            .select_notes(&intent.base_asset, intent.base_amount)?;

        match self.place_order_inner(&intent, &selection).await {
            Ok(()) => {
                self.spawn_fill_poller(id);
                Ok(id)
            }
            Err(err) => {
                self.unwind_placement(&id, selection.attempt, &err);
                Err(err)
            }
        }
    }

    async fn place_order_inner(
        &self,
        intent: &OrderIntent,
        selection: &SpendSelection,
    ) -> Result<(), SettleError> {
        let id = intent.order_hash;
        let change = selection.change_note(intent.base_amount)?;
        let outputs: Vec<Note> = change.into_iter().collect();

        let cancel_preimage = random_field();
        let change_secret = CombinedSecret::random();
        let record = OrderRecord {
            id,
            normalized_hash: normalize_hash(&id)?,
            base_asset: intent.base_asset,
            quote_asset: intent.quote_asset,
            base_amount: intent.base_amount,
            min_quote_amount: intent.min_quote_amount,
            rate: intent.rate,
            diff_percentage: intent.diff_percentage,
            created_at: now_unix(),
            expired_at: intent.expired_at,
            cancel_preimage,
            cancel_hash: cancel_hash(&cancel_preimage),
            change_secret: change_secret.clone(),
            fill_payload: intent.fill_payload.clone(),
            fill_extension: intent.fill_extension.clone(),
            tx: None,
            fill_halted: false,
            state: OrderState::Draft,
        };
        let normalized_hash = record.normalized_hash;
        let cancel_h = record.cancel_hash;
        self.ledger.insert_order(record)?;

        let spend = SpendIntent {
            normalized_order_hash: normalized_hash,
            precomp_secret: combined_secret_hash(&change_secret)?,
            order_asset: Note {
                asset: intent.base_asset,
                amount: intent.base_amount,
                secret: CombinedSecret::zero(),
            },
            included_assets: [intent.base_asset, intent.quote_asset],
        };
        let (witness, proof) = self
            .prove_current(&spend, &selection.notes, &outputs, Some(&id))
            .await?;

        self.ledger.set_order_state(&id, OrderState::Relaying)?;
        let call = ChainCall::Order {
            input: order_call(&witness, id, cancel_h),
            proof: proof.0,
        };
        let tx = self.relay_with_retry(&call.encode()?).await?;
        self.ledger.update_order(&id, |o| {
            o.tx = Some(tx);
            o.state = OrderState::AwaitingConfirmation { tx };
        })?;

        let receipt = self.confirm(tx).await?;
        let confirmed = self.match_outputs(&receipt, &outputs)?;
        self.ledger
            .commit_attempt(selection.attempt, &confirmed, now_unix())?;
        self.ledger.set_order_state(&id, OrderState::Open)?;
        info!(order = %id, tx = %tx, "order placed");
        Ok(())
    }

    fn unwind_placement(&self, id: &Hash32, attempt: AttemptId, err: &SettleError) {
        match err {
            SettleError::TransactionReverted { tx } => {
                // Ledger untouched: reserved notes return to unspent and
                // the record is kept so the user can retry or inspect.
                if let Err(e) = self.ledger.abort_attempt(attempt) {
                    warn!(order = %id, %e, "failed to release reservation");
                }
                if let Err(e) = self.ledger.set_order_state(id, OrderState::Reverted { tx: *tx }) {
                    warn!(order = %id, %e, "failed to record reverted state");
                }
            }
            SettleError::EventNotFound { tx } => {
                // The spend may have landed on-chain. Releasing the notes
                // could let a later attempt double-spend them client-side,
                // so the reservation and the awaiting record stay put.
                warn!(
                    order = %id, tx = %tx,
                    "receipt lacked expected NewLeaf; reservation held for manual reconciliation"
                );
            }
            _ => {
                if let Err(e) = self.ledger.abort_attempt(attempt) {
                    debug!(order = %id, %e, "reservation already resolved");
                }
                // The draft may not have been inserted yet.
                let _ = self.ledger.remove_order(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Fill polling
    // ------------------------------------------------------------------

    /// Start the background fill poller for an open order. Replaces any
    /// existing poller for the same order.
    pub fn spawn_fill_poller(self: &Arc<Self>, id: Hash32) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.fill_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match engine.try_fill(&id).await {
                    Ok(FillOutcome::NotFilled) => {}
                    Ok(outcome) => {
                        debug!(order = %id, ?outcome, "fill polling stopped");
                        break;
                    }
                    // Attempts are independent; a failed one does not stop
                    // the schedule.
                    Err(err) => warn!(order = %id, %err, "fill attempt failed"),
                }
            }
            engine.drop_poller_entry(&id);
        });

        let mut pollers = self
            .pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = pollers.insert(id, handle) {
            old.abort();
        }
    }

    /// Restart pollers for every open order, e.g. after process restart.
    pub fn resume_fill_polling(self: &Arc<Self>) {
        for id in self.ledger.open_order_ids(now_unix()) {
            self.spawn_fill_poller(id);
        }
    }

    /// Cancel all background pollers.
    pub fn shutdown_pollers(&self) {
        let mut pollers = self
            .pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, handle) in pollers.drain() {
            handle.abort();
        }
    }

    fn stop_poller(&self, id: &Hash32) {
        let mut pollers = self
            .pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = pollers.remove(id) {
            handle.abort();
        }
    }

    fn drop_poller_entry(&self, id: &Hash32) {
        let mut pollers = self
            .pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pollers.remove(id);
    }

    /// Attempt to fill an open order once.
    ///
    /// Safe to race with a user-initiated cancel: the terminal transition
    /// is applied check-and-set under the ledger lock, so whichever side
    /// confirmed on-chain wins and the other becomes a no-op.
    pub async fn try_fill(&self, id: &Hash32) -> Result<FillOutcome, SettleError> {
        let order = self.ledger.get_order(id)?;
        if order.state.is_terminal() {
            return Ok(FillOutcome::Halted);
        }
        if order.state != OrderState::Open {
            return Err(SettleError::InvalidOrderState {
                id: *id,
                state: order.state.label(),
            });
        }
        if order.fill_halted {
            return Ok(FillOutcome::Halted);
        }
        if order.expired_at <= now_unix() {
            self.ledger.set_order_state(id, OrderState::Expired)?;
            info!(order = %id, "order expired");
            return Ok(FillOutcome::Expired);
        }

        let outcome = self
            .fill
            .try_fill(&order.fill_payload, &order.fill_extension)
            .await
            .map_err(|e| SettleError::Chain(e.to_string()))?;
        match outcome {
            RelayOutcome::Rejected {
                message,
                no_retry: true,
            } => {
                warn!(order = %id, %message, "fill permanently rejected; halting polling");
                self.ledger.update_order(id, |o| o.fill_halted = true)?;
                Ok(FillOutcome::Halted)
            }
            RelayOutcome::Rejected { message, .. } => {
                debug!(order = %id, %message, "order not filled this round");
                Ok(FillOutcome::NotFilled)
            }
            RelayOutcome::Accepted { tx } => {
                let receipt = match self.confirm(tx).await {
                    Ok(receipt) => receipt,
                    Err(SettleError::TransactionReverted { tx }) => {
                        warn!(order = %id, tx = %tx, "fill transaction reverted; order stays open");
                        return Ok(FillOutcome::NotFilled);
                    }
                    Err(e) => return Err(e),
                };

                let fill_note = Note {
                    asset: order.quote_asset,
                    amount: order.min_quote_amount,
                    secret: order.change_secret.clone(),
                };
                let commitment = fill_note.commitment()?;
                let leaf = receipt
                    .leaf_for(&commitment)
                    .ok_or(SettleError::EventNotFound { tx })?;

                let applied =
                    self.ledger
                        .apply_fill(id, fill_note, leaf.inserted_index, tx, now_unix())?;
                if applied {
                    Ok(FillOutcome::Filled { tx })
                } else {
                    warn!(order = %id, "fill confirmed but order no longer open");
                    Ok(FillOutcome::Halted)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Cancel an open order by revealing its preimage. The still-locked
    /// amount is re-minted as a fresh note before the order is retired.
    pub async fn cancel_order(&self, id: &Hash32) -> Result<Hash32, SettleError> {
        let order = self.ledger.get_order(id)?;
        if order.state != OrderState::Open {
            return Err(SettleError::InvalidOrderState {
                id: *id,
                state: order.state.label(),
            });
        }

        let call = ChainCall::Cancel {
            order_hash: *id,
            preimage: order.cancel_preimage,
        };
        let tx = self.relay_with_retry(&call.encode()?).await?;
        let receipt = self.confirm(tx).await?;

        let refund = Note {
            asset: order.base_asset,
            amount: order.base_amount,
            secret: order.change_secret.clone(),
        };
        let commitment = refund.commitment()?;
        let leaf = receipt
            .leaf_for(&commitment)
            .ok_or(SettleError::EventNotFound { tx })?;

        let applied = self
            .ledger
            .apply_cancel(id, refund, leaf.inserted_index, tx, now_unix())?;
        if !applied {
            warn!(order = %id, "cancel confirmed but order no longer open");
        }
        self.stop_poller(id);
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Withdrawal (two-phase)
    // ------------------------------------------------------------------

    /// Withdraw `amount` of `asset` to `recipient`.
    ///
    /// Round one places a withdraw order (same pipeline as a regular
    /// order, zero precomp secret and cancel hash); round two executes
    /// the withdraw call. A round-two failure surfaces as
    /// [`SettleError::SecondRoundFailed`] with the record left at
    /// `OrderConfirmed`, resumable via [`Self::resume_withdraw`].
    pub async fn withdraw(
        &self,
        asset: Address,
        amount: Amount,
        recipient: Address,
    ) -> Result<Hash32, SettleError> {
        let selection = self.ledger.select_notes(&asset, amount)?;
        let salt = random_field();
        let id = withdraw_order_hash(&asset, amount, &recipient, &salt);
        let record = WithdrawRecord {
            id,
            asset,
            amount,
            recipient,
            salt,
            created_at: now_unix(),
            stage: WithdrawStage::ProofPending,
        };
        if let Err(e) = self.ledger.insert_withdrawal(record) {
            let _ = self.ledger.abort_attempt(selection.attempt);
            return Err(e.into());
        }

        match self.withdraw_round_one(&id, asset, amount, &selection).await {
            Ok(order_tx) => {
                self.ledger
                    .set_withdraw_stage(&id, WithdrawStage::OrderConfirmed { order_tx })?;
                info!(withdraw = %id, tx = %order_tx, "withdraw order confirmed");
            }
            Err(err) => {
                self.unwind_withdraw(&id, selection.attempt, &err);
                return Err(err);
            }
        }

        self.run_withdraw_round_two(&id).await?;
        Ok(id)
    }

    /// Re-run round two of a withdrawal left at `OrderConfirmed`.
    pub async fn resume_withdraw(&self, id: &Hash32) -> Result<Hash32, SettleError> {
        self.run_withdraw_round_two(id).await
    }

    async fn withdraw_round_one(
        &self,
        id: &Hash32,
        asset: Address,
        amount: Amount,
        selection: &SpendSelection,
    ) -> Result<Hash32, SettleError> {
        let change = selection.change_note(amount)?;
        let outputs: Vec<Note> = change.into_iter().collect();

        let spend = SpendIntent {
            normalized_order_hash: normalize_hash(id)?,
            precomp_secret: Field32::ZERO,
            order_asset: Note {
                asset,
                amount,
                secret: CombinedSecret::zero(),
            },
            included_assets: [asset, asset],
        };
        let (witness, proof) = self
            .prove_current(&spend, &selection.notes, &outputs, None)
            .await?;

        let call = ChainCall::Order {
            input: order_call(&witness, *id, Hash32::ZERO),
            proof: proof.0,
        };
        let tx = self.relay_with_retry(&call.encode()?).await?;
        let receipt = self.confirm(tx).await?;
        let confirmed = self.match_outputs(&receipt, &outputs)?;
        self.ledger
            .commit_attempt(selection.attempt, &confirmed, now_unix())?;
        Ok(tx)
    }

    async fn run_withdraw_round_two(&self, id: &Hash32) -> Result<Hash32, SettleError> {
        let record = self.ledger.get_withdrawal(id)?;
        let order_tx = match record.stage {
            WithdrawStage::OrderConfirmed { order_tx } => order_tx,
            WithdrawStage::Completed { withdraw_tx, .. } => return Ok(withdraw_tx),
            WithdrawStage::ProofPending => {
                return Err(SettleError::InvalidOrderState {
                    id: *id,
                    state: "proof-pending",
                })
            }
        };

        let call = ChainCall::Withdraw {
            asset: record.asset,
            amount: record.amount,
            recipient: record.recipient,
            salt: record.salt,
        };
        let result: Result<Hash32, SettleError> = async {
            let tx = self.relay_with_retry(&call.encode()?).await?;
            self.confirm(tx).await?;
            Ok(tx)
        }
        .await;

        match result {
            Ok(tx) => {
                self.ledger
                    .set_withdraw_stage(id, WithdrawStage::Completed { order_tx, withdraw_tx: tx })?;
                info!(withdraw = %id, tx = %tx, "withdrawal completed");
                Ok(tx)
            }
            Err(e) => Err(SettleError::SecondRoundFailed {
                id: *id,
                message: e.to_string(),
            }),
        }
    }

    fn unwind_withdraw(&self, id: &Hash32, attempt: AttemptId, err: &SettleError) {
        match err {
            SettleError::EventNotFound { tx } => {
                warn!(
                    withdraw = %id, tx = %tx,
                    "receipt lacked expected NewLeaf; reservation held for manual reconciliation"
                );
            }
            _ => {
                if let Err(e) = self.ledger.abort_attempt(attempt) {
                    debug!(withdraw = %id, %e, "reservation already resolved");
                }
                let _ = self.ledger.remove_withdrawal(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared pipeline pieces
    // ------------------------------------------------------------------

    /// Sync, assemble, prove, and start over if the root went stale
    /// while the prover ran. A witness whose snapshot has been superseded
    /// is rebuilt, never submitted.
    async fn prove_current(
        &self,
        spend: &SpendIntent,
        inputs: &[NoteRecord],
        outputs: &[Note],
        order: Option<&Hash32>,
    ) -> Result<(Witness, Proof), SettleError> {
        for attempt in 0..self.config.sync_attempts {
            let snapshot = self.merkle.sync().await?;
            let witness = build_witness(&snapshot, spend, inputs, outputs)?;
            if attempt == 0 {
                if let Some(id) = order {
                    self.ledger.set_order_state(id, OrderState::ProofPending)?;
                }
            }
            let proof = self
                .prover
                .prove(&witness)
                .await
                .map_err(|e| SettleError::ProofGenerationFailed(e.to_string()))?;
            if self.merkle.is_current(&snapshot).await? {
                return Ok((witness, proof));
            }
            warn!(attempt, "merkle root superseded during proving; rebuilding witness");
        }
        Err(SettleError::StaleMerkleRoot)
    }

    async fn relay_with_retry(&self, tx_data: &[u8]) -> Result<Hash32, SettleError> {
        let mut last_message = String::new();
        for attempt in 1..=self.config.relay_attempts {
            let outcome = self
                .relay
                .submit(tx_data)
                .await
                .map_err(|e| SettleError::Chain(e.to_string()))?;
            match outcome {
                RelayOutcome::Accepted { tx } => return Ok(tx),
                RelayOutcome::Rejected {
                    message,
                    no_retry: true,
                } => {
                    return Err(SettleError::RelayRejected {
                        message,
                        permanent: true,
                    })
                }
                RelayOutcome::Rejected { message, .. } => {
                    warn!(attempt, %message, "transient relay rejection");
                    last_message = message;
                    if attempt < self.config.relay_attempts {
                        tokio::time::sleep(self.config.relay_backoff).await;
                    }
                }
            }
        }
        Err(SettleError::RelayRejected {
            message: last_message,
            permanent: false,
        })
    }

    async fn confirm(&self, tx: Hash32) -> Result<TxReceipt, SettleError> {
        let receipt = self
            .chain
            .await_receipt(tx)
            .await
            .map_err(|e| SettleError::Chain(e.to_string()))?;
        match receipt.status {
            TxStatus::Succeeded => Ok(receipt),
            TxStatus::Reverted => Err(SettleError::TransactionReverted { tx }),
        }
    }

    /// Match every planned output note to its `NewLeaf` event.
    fn match_outputs(
        &self,
        receipt: &TxReceipt,
        outputs: &[Note],
    ) -> Result<Vec<(Note, u32)>, SettleError> {
        let mut confirmed = Vec::with_capacity(outputs.len());
        for note in outputs {
            let commitment = note.commitment()?;
            let leaf = receipt
                .leaf_for(&commitment)
                .ok_or(SettleError::EventNotFound { tx: receipt.tx })?;
            confirmed.push((note.clone(), leaf.inserted_index));
        }
        Ok(confirmed)
    }
}
