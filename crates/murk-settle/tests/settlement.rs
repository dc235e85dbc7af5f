//! End-to-end settlement flows against fake collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use borsh::BorshDeserialize;
use tempfile::{tempdir, TempDir};

use murk_core::{
    commitment_from_secret_hash, Address, Amount, CombinedSecret, Field32, Hash32, Note,
};
use murk_ledger::{LedgerService, NoteState, OrderRecord, OrderState, WithdrawStage};
use murk_settle::{
    now_unix, ChainCall, ChainClient, EngineConfig, FillOutcome, FillTaker, NewLeaf, OrderIntent,
    Proof, Prover, ProverError, Relay, RelayOutcome, SettleError, SettlementEngine, TxReceipt,
    TxStatus, Witness,
};
use murk_tree::{LeafSource, MerkleSync};

// ----------------------------------------------------------------------
// Fake collaborators
// ----------------------------------------------------------------------

#[derive(Default)]
struct ChainState {
    leaves: Vec<Field32>,
    receipts: HashMap<Hash32, TxReceipt>,
    next_tx: u64,
    pending_mints: Vec<Field32>,
}

/// In-memory pool contract: the leaf sequence plus mined receipts.
#[derive(Clone, Default)]
struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    fn mint_locked(state: &mut ChainState, commitments: &[Field32]) -> Hash32 {
        state.next_tx += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        let tx = Hash32::from(bytes);

        let mut new_leaves = Vec::new();
        for commitment in commitments {
            let inserted_index = state.leaves.len() as u32;
            state.leaves.push(*commitment);
            new_leaves.push(NewLeaf {
                secret_hash: Field32::ZERO,
                note_hash: *commitment,
                inserted_index,
            });
        }
        state.receipts.insert(
            tx,
            TxReceipt {
                tx,
                status: TxStatus::Succeeded,
                new_leaves,
            },
        );
        tx
    }

    fn mint(&self, commitments: &[Field32]) -> Hash32 {
        let mut state = self.state.lock().unwrap();
        Self::mint_locked(&mut state, commitments)
    }

    /// Register a commitment the contract will derive itself on the next
    /// cancel call (the fake cannot recompute it from stored order data).
    fn expect_mint(&self, commitment: Field32) {
        self.state.lock().unwrap().pending_mints.push(commitment);
    }

    /// A leaf inserted by some other pool user.
    fn push_foreign_leaf(&self) {
        let mut state = self.state.lock().unwrap();
        let n = state.leaves.len() as u8;
        state.leaves.push(Field32::from([n | 0x80; 32]));
    }

    fn leaf_count_now(&self) -> u32 {
        self.state.lock().unwrap().leaves.len() as u32
    }
}

#[async_trait]
impl LeafSource for FakeChain {
    async fn leaf_count(&self) -> anyhow::Result<u32> {
        Ok(self.leaf_count_now())
    }

    async fn leaves(&self, start: u32, count: u32) -> anyhow::Result<Vec<Field32>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .leaves
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .copied()
            .collect())
    }

    async fn root_at(&self, _index: u32) -> anyhow::Result<Field32> {
        anyhow::bail!("not recorded")
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn deposit(
        &self,
        asset: Address,
        amount: Amount,
        secret_hash: Field32,
    ) -> anyhow::Result<Hash32> {
        let commitment = commitment_from_secret_hash(&asset, amount, &secret_hash)?;
        let mut state = self.state.lock().unwrap();
        state.next_tx += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        let tx = Hash32::from(bytes);
        let inserted_index = state.leaves.len() as u32;
        state.leaves.push(commitment);
        state.receipts.insert(
            tx,
            TxReceipt {
                tx,
                status: TxStatus::Succeeded,
                new_leaves: vec![NewLeaf {
                    secret_hash,
                    note_hash: commitment,
                    inserted_index,
                }],
            },
        );
        Ok(tx)
    }

    async fn await_receipt(&self, tx: Hash32) -> anyhow::Result<TxReceipt> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(&tx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown transaction {tx}"))
    }
}

/// What the fake relay should do with the next submission.
enum RelayScript {
    /// Mine the call and insert its leaves.
    Accept,
    /// Mine the call but emit no leaf events.
    AcceptNoEvents,
    /// Mine the call as reverted.
    Revert,
    /// Decline the submission.
    Reject { message: String, no_retry: bool },
}

#[derive(Clone)]
struct FakeRelay {
    chain: FakeChain,
    script: Arc<Mutex<VecDeque<RelayScript>>>,
    submissions: Arc<Mutex<u32>>,
}

impl FakeRelay {
    fn new(chain: FakeChain) -> Self {
        Self {
            chain,
            script: Arc::new(Mutex::new(VecDeque::new())),
            submissions: Arc::new(Mutex::new(0)),
        }
    }

    fn push(&self, step: RelayScript) {
        self.script.lock().unwrap().push_back(step);
    }

    fn submission_count(&self) -> u32 {
        *self.submissions.lock().unwrap()
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn submit(&self, tx_data: &[u8]) -> anyhow::Result<RelayOutcome> {
        *self.submissions.lock().unwrap() += 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RelayScript::Accept);
        let call = ChainCall::try_from_slice(tx_data)?;

        match step {
            RelayScript::Reject { message, no_retry } => {
                Ok(RelayOutcome::Rejected { message, no_retry })
            }
            RelayScript::Revert => {
                let mut state = self.chain.state.lock().unwrap();
                let tx = FakeChain::mint_locked(&mut state, &[]);
                if let Some(receipt) = state.receipts.get_mut(&tx) {
                    receipt.status = TxStatus::Reverted;
                }
                Ok(RelayOutcome::Accepted { tx })
            }
            RelayScript::AcceptNoEvents => {
                let tx = self.chain.mint(&[]);
                Ok(RelayOutcome::Accepted { tx })
            }
            RelayScript::Accept => {
                let commitments: Vec<Field32> = match &call {
                    ChainCall::Order { input, .. } => input
                        .new_note_hash
                        .iter()
                        .filter(|h| !h.is_zero())
                        .copied()
                        .collect(),
                    ChainCall::Cancel { .. } => {
                        let mut state = self.chain.state.lock().unwrap();
                        std::mem::take(&mut state.pending_mints)
                    }
                    ChainCall::Withdraw { .. } => Vec::new(),
                };
                Ok(RelayOutcome::Accepted {
                    tx: self.chain.mint(&commitments),
                })
            }
        }
    }
}

#[derive(Clone)]
struct FakeFill {
    script: Arc<Mutex<VecDeque<RelayOutcome>>>,
    attempts: Arc<Mutex<u32>>,
}

impl FakeFill {
    fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    fn push(&self, outcome: RelayOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    fn attempt_count(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl FillTaker for FakeFill {
    async fn try_fill(&self, _payload: &[u8], _extension: &[u8]) -> anyhow::Result<RelayOutcome> {
        *self.attempts.lock().unwrap() += 1;
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RelayOutcome::Rejected {
                message: "no taker".into(),
                no_retry: false,
            }))
    }
}

#[derive(Clone)]
struct FakeProver {
    calls: Arc<Mutex<u32>>,
    fail: bool,
    /// When set, the first proving call inserts a foreign leaf so the
    /// witness's snapshot goes stale mid-proof.
    stale_chain: Option<FakeChain>,
}

impl FakeProver {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(0)),
            fail: false,
            stale_chain: None,
        }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Prover for FakeProver {
    async fn prove(&self, _witness: &Witness) -> Result<Proof, ProverError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls == 1
        };
        if self.fail {
            return Err(ProverError::Backend("prover exploded".into()));
        }
        if first {
            if let Some(chain) = &self.stale_chain {
                chain.push_foreign_leaf();
            }
        }
        Ok(Proof(vec![0xab; 8]))
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

type Engine = SettlementEngine<FakeChain, FakeRelay, FakeFill, FakeChain, FakeProver>;

struct Harness {
    engine: Arc<Engine>,
    chain: FakeChain,
    relay: FakeRelay,
    fill: FakeFill,
    prover: FakeProver,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_prover(FakeProver::new())
    }

    fn with_prover(prover: FakeProver) -> Self {
        let dir = tempdir().unwrap();
        let chain = FakeChain::default();
        let relay = FakeRelay::new(chain.clone());
        let fill = FakeFill::new();
        let ledger = Arc::new(open_ledger(dir.path()));
        let merkle = Arc::new(MerkleSync::new(chain.clone()));
        let config = EngineConfig {
            fill_interval: Duration::from_secs(60),
            relay_attempts: 3,
            relay_backoff: Duration::from_millis(5),
            sync_attempts: 3,
        };
        let engine = Arc::new(SettlementEngine::new(
            ledger,
            merkle,
            relay.clone(),
            fill.clone(),
            chain.clone(),
            prover.clone(),
            config,
        ));
        Self {
            engine,
            chain,
            relay,
            fill,
            prover,
            _dir: dir,
        }
    }

    fn ledger(&self) -> &LedgerService {
        self.engine.ledger()
    }

    fn balance(&self, asset: &Address) -> u128 {
        self.ledger().balance_of(asset).unwrap().units()
    }
}

fn open_ledger(dir: &Path) -> LedgerService {
    LedgerService::open(&dir.join("ledger.db")).unwrap()
}

fn asset(n: u8) -> Address {
    Address::from([n; 20])
}

fn order_intent(n: u8, base: Address, quote: Address, amount: u128, min_quote: u128) -> OrderIntent {
    OrderIntent {
        order_hash: Hash32::from([n; 32]),
        base_asset: base,
        quote_asset: quote,
        base_amount: Amount::from_units(amount),
        min_quote_amount: Amount::from_units(min_quote),
        rate: 0.99,
        diff_percentage: 0.5,
        expired_at: now_unix() + 3600,
        fill_payload: vec![n, 0xf1],
        fill_extension: vec![n, 0xe2],
    }
}

/// An already-placed open order inserted straight into the ledger, for
/// tests that exercise fill and expiry paths in isolation.
fn seed_open_order(ledger: &LedgerService, n: u8, expired_at: u64) -> OrderRecord {
    let record = OrderRecord {
        id: Hash32::from([n; 32]),
        normalized_hash: Field32::ZERO,
        base_asset: asset(1),
        quote_asset: asset(2),
        base_amount: Amount::from_units(40),
        min_quote_amount: Amount::from_units(39),
        rate: 0.99,
        diff_percentage: 0.5,
        created_at: now_unix(),
        expired_at,
        cancel_preimage: Field32::from([n; 32]),
        cancel_hash: Hash32::ZERO,
        change_secret: CombinedSecret::random(),
        fill_payload: vec![n],
        fill_extension: vec![],
        tx: Some(Hash32::from([0xaa; 32])),
        fill_halted: false,
        state: OrderState::Open,
    };
    ledger.insert_order(record.clone()).unwrap();
    record
}

// ----------------------------------------------------------------------
// Deposit
// ----------------------------------------------------------------------

#[tokio::test]
async fn deposit_mints_one_unspent_note() {
    let h = Harness::new();
    let record = h
        .engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    assert_eq!(record.leaf_index, Some(0));
    assert_eq!(record.state, NoteState::Unspent);
    assert_eq!(h.balance(&asset(1)), 100);
    assert_eq!(h.ledger().notes().len(), 1);
}

// ----------------------------------------------------------------------
// Order placement
// ----------------------------------------------------------------------

#[tokio::test]
async fn placing_an_order_spends_the_note_and_mints_change() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    let id = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap();
    h.engine.shutdown_pollers();

    // Change of 60 minted, deposit note retired, order open.
    assert_eq!(h.balance(&asset(1)), 60);
    let order = h.ledger().get_order(&id).unwrap();
    assert_eq!(order.state, OrderState::Open);
    assert!(order.tx.is_some());

    let notes = h.ledger().notes();
    let change = notes
        .iter()
        .find(|n| n.state == NoteState::Unspent)
        .unwrap();
    assert_eq!(change.note.amount, Amount::from_units(60));
    // The change note's index comes from the NewLeaf event: deposit took
    // leaf 0, the order's change leaf is 1.
    assert_eq!(change.leaf_index, Some(1));
    let spent = notes.iter().find(|n| n.state == NoteState::Spent).unwrap();
    assert_eq!(spent.note.amount, Amount::from_units(100));

    assert_eq!(h.prover.call_count(), 1);
}

#[tokio::test]
async fn unfundable_order_fails_before_proving() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    let err = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 200, 190))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettleError::Ledger(murk_ledger::LedgerError::InsufficientBalance { .. })
    ));
    assert_eq!(h.prover.call_count(), 0);
    assert_eq!(h.relay.submission_count(), 0);
    assert_eq!(h.balance(&asset(1)), 100);
}

#[tokio::test]
async fn reverted_placement_releases_the_reservation() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::Revert);
    let err = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap_err();
    assert!(matches!(err, SettleError::TransactionReverted { .. }));

    // Ledger untouched: the note is unspent again, the record kept for
    // retry with its transaction hash.
    assert_eq!(h.balance(&asset(1)), 100);
    let order = h.ledger().get_order(&Hash32::from([7; 32])).unwrap();
    assert!(matches!(order.state, OrderState::Reverted { .. }));
}

#[tokio::test]
async fn permanent_relay_rejection_aborts_the_placement() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::Reject {
        message: "unsupported asset".into(),
        no_retry: true,
    });
    let err = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettleError::RelayRejected {
            permanent: true,
            ..
        }
    ));
    assert_eq!(h.relay.submission_count(), 1);
    assert_eq!(h.balance(&asset(1)), 100);
    // Nothing reached the chain; the draft is gone.
    assert!(h.ledger().get_order(&Hash32::from([7; 32])).is_err());
}

#[tokio::test]
async fn transient_relay_rejection_is_retried() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::Reject {
        message: "nonce too low".into(),
        no_retry: false,
    });
    let id = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap();
    h.engine.shutdown_pollers();

    assert_eq!(h.relay.submission_count(), 2);
    assert_eq!(h.ledger().get_order(&id).unwrap().state, OrderState::Open);
}

#[tokio::test]
async fn missing_leaf_event_keeps_the_reservation() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::AcceptNoEvents);
    let err = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap_err();
    assert!(matches!(err, SettleError::EventNotFound { .. }));

    // The spend may have landed on-chain: the input stays reserved and
    // the order waits at its last known stage for manual reconciliation.
    assert_eq!(h.balance(&asset(1)), 0);
    let order = h.ledger().get_order(&Hash32::from([7; 32])).unwrap();
    assert!(matches!(order.state, OrderState::AwaitingConfirmation { .. }));
}

#[tokio::test]
async fn proof_failure_releases_the_reservation() {
    let mut prover = FakeProver::new();
    prover.fail = true;
    let h = Harness::with_prover(prover);
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    let err = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap_err();
    assert!(matches!(err, SettleError::ProofGenerationFailed(_)));
    assert_eq!(h.balance(&asset(1)), 100);
    assert!(h.ledger().get_order(&Hash32::from([7; 32])).is_err());
}

#[tokio::test]
async fn stale_root_forces_a_witness_rebuild() {
    let mut prover = FakeProver::new();
    let chain_handle = FakeChain::default();
    // The harness must share this chain so the foreign leaf lands in the
    // same leaf sequence the engine syncs from.
    prover.stale_chain = Some(chain_handle.clone());
    let dir = tempdir().unwrap();
    let relay = FakeRelay::new(chain_handle.clone());
    let fill = FakeFill::new();
    let ledger = Arc::new(open_ledger(dir.path()));
    let merkle = Arc::new(MerkleSync::new(chain_handle.clone()));
    let engine = Arc::new(SettlementEngine::new(
        ledger,
        merkle,
        relay.clone(),
        fill,
        chain_handle.clone(),
        prover.clone(),
        EngineConfig {
            fill_interval: Duration::from_secs(60),
            relay_attempts: 3,
            relay_backoff: Duration::from_millis(5),
            sync_attempts: 3,
        },
    ));

    engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();
    let id = engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap();
    engine.shutdown_pollers();

    // First witness went stale mid-proof; it was rebuilt, never submitted.
    assert_eq!(prover.call_count(), 2);
    assert_eq!(relay.submission_count(), 1);
    assert_eq!(
        engine.ledger().get_order(&id).unwrap().state,
        OrderState::Open
    );
}

// ----------------------------------------------------------------------
// Filling
// ----------------------------------------------------------------------

#[tokio::test]
async fn a_fill_mints_the_quote_note_and_closes_the_order() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() + 3600);

    let quote_note = Note {
        asset: order.quote_asset,
        amount: order.min_quote_amount,
        secret: order.change_secret.clone(),
    };
    let tx = h.chain.mint(&[quote_note.commitment().unwrap()]);
    h.fill.push(RelayOutcome::Accepted { tx });

    let outcome = h.engine.try_fill(&order.id).await.unwrap();
    assert_eq!(outcome, FillOutcome::Filled { tx });
    assert_eq!(h.balance(&asset(2)), 39);
    assert!(matches!(
        h.ledger().get_order(&order.id).unwrap().state,
        OrderState::Filled { .. }
    ));

    // Terminal state halts any further polling.
    assert_eq!(
        h.engine.try_fill(&order.id).await.unwrap(),
        FillOutcome::Halted
    );
}

#[tokio::test]
async fn declined_fill_keeps_the_order_open() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() + 3600);

    let outcome = h.engine.try_fill(&order.id).await.unwrap();
    assert_eq!(outcome, FillOutcome::NotFilled);
    assert_eq!(h.ledger().get_order(&order.id).unwrap().state, OrderState::Open);
}

#[tokio::test]
async fn permanent_fill_rejection_halts_polling_without_closing() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() + 3600);

    h.fill.push(RelayOutcome::Rejected {
        message: "asset not supported".into(),
        no_retry: true,
    });
    assert_eq!(
        h.engine.try_fill(&order.id).await.unwrap(),
        FillOutcome::Halted
    );

    // Halted but still open and cancellable; later attempts short-circuit
    // before reaching the fill service.
    let record = h.ledger().get_order(&order.id).unwrap();
    assert_eq!(record.state, OrderState::Open);
    assert!(record.fill_halted);
    let before = h.fill.attempt_count();
    assert_eq!(
        h.engine.try_fill(&order.id).await.unwrap(),
        FillOutcome::Halted
    );
    assert_eq!(h.fill.attempt_count(), before);
}

#[tokio::test]
async fn reverted_fill_leaves_the_order_open() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() + 3600);

    let mut state = h.chain.state.lock().unwrap();
    let tx = FakeChain::mint_locked(&mut state, &[]);
    state.receipts.get_mut(&tx).unwrap().status = TxStatus::Reverted;
    drop(state);
    h.fill.push(RelayOutcome::Accepted { tx });

    assert_eq!(
        h.engine.try_fill(&order.id).await.unwrap(),
        FillOutcome::NotFilled
    );
    assert_eq!(h.ledger().get_order(&order.id).unwrap().state, OrderState::Open);
    assert_eq!(h.balance(&asset(2)), 0);
}

#[tokio::test]
async fn an_expired_order_is_retired_without_chain_interaction() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() - 1);

    assert_eq!(
        h.engine.try_fill(&order.id).await.unwrap(),
        FillOutcome::Expired
    );
    assert_eq!(h.fill.attempt_count(), 0);
    assert_eq!(h.relay.submission_count(), 0);
    assert_eq!(h.ledger().get_order(&order.id).unwrap().state, OrderState::Expired);

    let (active, history) = h.ledger().orders(now_unix());
    assert!(active.is_empty());
    assert_eq!(history.len(), 1);
}

// ----------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------

#[tokio::test]
async fn cancelling_remints_the_locked_amount() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();
    let id = h
        .engine
        .place_order(order_intent(7, asset(1), asset(2), 40, 39))
        .await
        .unwrap();
    h.engine.shutdown_pollers();
    assert_eq!(h.balance(&asset(1)), 60);

    let order = h.ledger().get_order(&id).unwrap();
    let refund = Note {
        asset: order.base_asset,
        amount: order.base_amount,
        secret: order.change_secret.clone(),
    };
    h.chain.expect_mint(refund.commitment().unwrap());

    h.engine.cancel_order(&id).await.unwrap();

    // The re-minted note lands before the order is retired.
    assert_eq!(h.balance(&asset(1)), 100);
    assert!(matches!(
        h.ledger().get_order(&id).unwrap().state,
        OrderState::Cancelled { .. }
    ));
}

#[tokio::test]
async fn cancel_is_rejected_for_a_closed_order() {
    let h = Harness::new();
    let order = seed_open_order(h.ledger(), 7, now_unix() + 3600);
    h.ledger()
        .set_order_state(&order.id, OrderState::Expired)
        .unwrap();

    let err = h.engine.cancel_order(&order.id).await.unwrap_err();
    assert!(matches!(err, SettleError::InvalidOrderState { .. }));
    assert_eq!(h.relay.submission_count(), 0);
}

// ----------------------------------------------------------------------
// Withdrawal
// ----------------------------------------------------------------------

#[tokio::test]
async fn withdrawal_runs_both_rounds() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    let id = h
        .engine
        .withdraw(asset(1), Amount::from_units(40), asset(9))
        .await
        .unwrap();

    assert_eq!(h.balance(&asset(1)), 60);
    let record = h.ledger().get_withdrawal(&id).unwrap();
    assert!(matches!(record.stage, WithdrawStage::Completed { .. }));
    // Round one (order) plus round two (withdraw call).
    assert_eq!(h.relay.submission_count(), 2);
}

#[tokio::test]
async fn failed_second_round_leaves_a_resumable_record() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::Accept);
    h.relay.push(RelayScript::Reject {
        message: "relayer drained".into(),
        no_retry: true,
    });
    let err = h
        .engine
        .withdraw(asset(1), Amount::from_units(40), asset(9))
        .await
        .unwrap_err();
    let id = match err {
        SettleError::SecondRoundFailed { id, .. } => id,
        other => panic!("expected SecondRoundFailed, got {other}"),
    };

    // Round one committed: the spend happened, change minted.
    assert_eq!(h.balance(&asset(1)), 60);
    let record = h.ledger().get_withdrawal(&id).unwrap();
    assert!(matches!(record.stage, WithdrawStage::OrderConfirmed { .. }));

    // Round two alone re-runs on resume.
    h.engine.resume_withdraw(&id).await.unwrap();
    let record = h.ledger().get_withdrawal(&id).unwrap();
    assert!(matches!(record.stage, WithdrawStage::Completed { .. }));
    assert_eq!(h.balance(&asset(1)), 60);
}

#[tokio::test]
async fn failed_first_round_unwinds_the_withdrawal() {
    let h = Harness::new();
    h.engine
        .deposit(asset(1), Amount::from_units(100))
        .await
        .unwrap();

    h.relay.push(RelayScript::Reject {
        message: "bad proof".into(),
        no_retry: true,
    });
    let err = h
        .engine
        .withdraw(asset(1), Amount::from_units(40), asset(9))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettleError::RelayRejected {
            permanent: true,
            ..
        }
    ));
    assert_eq!(h.balance(&asset(1)), 100);
    assert!(h.ledger().withdrawals().is_empty());
}
