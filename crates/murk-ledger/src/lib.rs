#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! The persisted note ledger.
//!
//! [`LedgerService`] owns the durable set of notes, orders, and
//! withdrawals (sled + Borsh) and every rule about how their states may
//! move. It is an explicit instance constructed with an injected storage
//! path, so tests substitute a temporary directory and fake collaborators
//! freely.
//!
//! All mutation goes through one internal mutex: a note selected by
//! [`LedgerService::select_notes`] is flipped to `Reserved` inside the
//! critical section, which is what makes two racing settlement attempts
//! unable to double-spend the same note.

pub mod error;
pub mod records;

pub use error::*;
pub use records::*;

use std::path::Path;
use std::sync::Mutex;

use borsh::BorshDeserialize;
use hashbrown::HashMap;
use tracing::{debug, info, warn};

use murk_core::{Address, Amount, Field32, Hash32, Note, MAX_SPEND_INPUTS};

const TREE_NOTES: &str = "notes";
const TREE_ORDERS: &str = "orders";
const TREE_WITHDRAWALS: &str = "withdrawals";

struct Inner {
    notes: HashMap<Field32, NoteRecord>,
    orders: HashMap<Hash32, OrderRecord>,
    withdrawals: HashMap<Hash32, WithdrawRecord>,
    reservations: HashMap<AttemptId, Vec<Field32>>,
    next_attempt: AttemptId,
}

/// Durable ledger of notes, orders, and withdrawals.
pub struct LedgerService {
    notes_tree: sled::Tree,
    orders_tree: sled::Tree,
    withdrawals_tree: sled::Tree,
    inner: Mutex<Inner>,
}

impl LedgerService {
    /// Open (or create) the ledger at `path` and load all records.
    ///
    /// Reservations are process-local: a note found `Reserved` on open
    /// belongs to an attempt that died with the previous process, so it is
    /// recovered to `Unspent`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let db = sled::open(path)?;
        let notes_tree = db.open_tree(TREE_NOTES)?;
        let orders_tree = db.open_tree(TREE_ORDERS)?;
        let withdrawals_tree = db.open_tree(TREE_WITHDRAWALS)?;

        let mut notes = HashMap::new();
        for item in notes_tree.iter() {
            let (_, bytes) = item?;
            let mut record = NoteRecord::try_from_slice(&bytes)?;
            if let NoteState::Reserved(attempt) = record.state {
                warn!(
                    commitment = %record.commitment,
                    attempt,
                    "recovering note reserved by a dead attempt"
                );
                record.state = NoteState::Unspent;
                notes_tree.insert(record.commitment.as_bytes(), borsh::to_vec(&record)?)?;
            }
            notes.insert(record.commitment, record);
        }

        let mut orders = HashMap::new();
        for item in orders_tree.iter() {
            let (_, bytes) = item?;
            let record = OrderRecord::try_from_slice(&bytes)?;
            orders.insert(record.id, record);
        }

        let mut withdrawals = HashMap::new();
        for item in withdrawals_tree.iter() {
            let (_, bytes) = item?;
            let record = WithdrawRecord::try_from_slice(&bytes)?;
            withdrawals.insert(record.id, record);
        }

        info!(
            notes = notes.len(),
            orders = orders.len(),
            withdrawals = withdrawals.len(),
            "ledger loaded"
        );

        Ok(Self {
            notes_tree,
            orders_tree,
            withdrawals_tree,
            inner: Mutex::new(Inner {
                notes,
                orders,
                withdrawals,
                reservations: HashMap::new(),
                next_attempt: 1,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_note(&self, record: &NoteRecord) -> Result<(), LedgerError> {
        self.notes_tree
            .insert(record.commitment.as_bytes(), borsh::to_vec(record)?)?;
        Ok(())
    }

    fn persist_order(&self, record: &OrderRecord) -> Result<(), LedgerError> {
        self.orders_tree
            .insert(record.id.as_bytes(), borsh::to_vec(record)?)?;
        Ok(())
    }

    fn persist_withdrawal(&self, record: &WithdrawRecord) -> Result<(), LedgerError> {
        self.withdrawals_tree
            .insert(record.id.as_bytes(), borsh::to_vec(record)?)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    /// Add a confirmed note (deposit, fill, cancel re-mint, change).
    pub fn add_note(
        &self,
        note: Note,
        leaf_index: u32,
        now: u64,
    ) -> Result<NoteRecord, LedgerError> {
        let record = NoteRecord::confirmed(note, leaf_index, now)?;
        let mut inner = self.lock();
        if inner.notes.contains_key(&record.commitment) {
            return Err(LedgerError::DuplicateNote(record.commitment));
        }
        self.persist_note(&record)?;
        inner.notes.insert(record.commitment, record.clone());
        debug!(commitment = %record.commitment, leaf_index, "note added");
        Ok(record)
    }

    /// Spendable balance for an asset: the sum over unspent notes.
    pub fn balance_of(&self, asset: &Address) -> Result<Amount, LedgerError> {
        let inner = self.lock();
        let mut total = Amount::ZERO;
        for record in inner.notes.values() {
            if record.is_unspent() && record.note.asset == *asset {
                total = total.checked_add(record.note.amount)?;
            }
        }
        Ok(total)
    }

    /// All note records, unordered.
    pub fn notes(&self) -> Vec<NoteRecord> {
        self.lock().notes.values().cloned().collect()
    }

    /// Select notes covering `amount` of `asset` and reserve them.
    ///
    /// Unspent notes of the asset are sorted descending by amount and
    /// accumulated greedily. At most two notes may back a spend (a circuit
    /// limit), so needing a third while notes remain fails
    /// [`LedgerError::TooManyNotes`] regardless of total balance;
    /// exhausting the notes below the target fails
    /// [`LedgerError::InsufficientBalance`].
    pub fn select_notes(
        &self,
        asset: &Address,
        amount: Amount,
    ) -> Result<SpendSelection, LedgerError> {
        let mut inner = self.lock();

        let mut candidates: Vec<NoteRecord> = inner
            .notes
            .values()
            .filter(|r| r.is_unspent() && r.note.asset == *asset)
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(LedgerError::NoNotes);
        }
        // Deterministic order: amount descending, commitment as tiebreak.
        candidates.sort_by(|a, b| {
            b.note
                .amount
                .cmp(&a.note.amount)
                .then_with(|| a.commitment.as_bytes().cmp(b.commitment.as_bytes()))
        });

        let mut selected: Vec<NoteRecord> = Vec::new();
        let mut achieved = Amount::ZERO;
        for candidate in candidates {
            if achieved >= amount {
                break;
            }
            if selected.len() == MAX_SPEND_INPUTS {
                return Err(LedgerError::TooManyNotes {
                    reachable: achieved,
                    need: amount,
                });
            }
            achieved = achieved.checked_add(candidate.note.amount)?;
            selected.push(candidate);
        }
        if achieved < amount {
            return Err(LedgerError::InsufficientBalance {
                have: achieved,
                need: amount,
            });
        }

        let attempt = inner.next_attempt;
        inner.next_attempt += 1;

        let mut reserved = Vec::with_capacity(selected.len());
        for record in &mut selected {
            record.state = NoteState::Reserved(attempt);
            self.persist_note(record)?;
            inner.notes.insert(record.commitment, record.clone());
            reserved.push(record.commitment);
        }
        inner.reservations.insert(attempt, reserved);

        debug!(
            attempt,
            notes = selected.len(),
            achieved = ?achieved,
            "notes reserved for spend"
        );
        Ok(SpendSelection {
            attempt,
            notes: selected,
            achieved,
        })
    }

    /// Commit a spend attempt after on-chain confirmation.
    ///
    /// Confirmed output notes are inserted **before** the consumed inputs
    /// are marked spent, so the ledger never transiently understates the
    /// balance. Applied together under one lock, or not at all.
    pub fn commit_attempt(
        &self,
        attempt: AttemptId,
        outputs: &[(Note, u32)],
        now: u64,
    ) -> Result<Vec<NoteRecord>, LedgerError> {
        let mut inner = self.lock();
        if !inner.reservations.contains_key(&attempt) {
            return Err(LedgerError::UnknownAttempt(attempt));
        }

        // Validate before mutating anything.
        let mut prepared = Vec::with_capacity(outputs.len());
        for (note, leaf_index) in outputs {
            let record = NoteRecord::confirmed(note.clone(), *leaf_index, now)?;
            if inner.notes.contains_key(&record.commitment) {
                return Err(LedgerError::DuplicateNote(record.commitment));
            }
            prepared.push(record);
        }

        // Mint outputs first.
        for record in &prepared {
            self.persist_note(record)?;
            inner.notes.insert(record.commitment, record.clone());
        }

        // Then retire the consumed inputs.
        let reserved = inner
            .reservations
            .remove(&attempt)
            .ok_or(LedgerError::UnknownAttempt(attempt))?;
        for commitment in reserved {
            if let Some(record) = inner.notes.get_mut(&commitment) {
                record.state = NoteState::Spent;
                let snapshot = record.clone();
                self.persist_note(&snapshot)?;
            }
        }

        info!(attempt, minted = prepared.len(), "spend attempt committed");
        Ok(prepared)
    }

    /// Abort a spend attempt, returning its reserved notes to `Unspent`.
    pub fn abort_attempt(&self, attempt: AttemptId) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let reserved = inner
            .reservations
            .remove(&attempt)
            .ok_or(LedgerError::UnknownAttempt(attempt))?;
        for commitment in reserved {
            if let Some(record) = inner.notes.get_mut(&commitment) {
                record.state = NoteState::Unspent;
                let snapshot = record.clone();
                self.persist_note(&snapshot)?;
            }
        }
        debug!(attempt, "spend attempt aborted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Register a new order record.
    pub fn insert_order(&self, record: OrderRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.orders.contains_key(&record.id) {
            return Err(LedgerError::DuplicateOrder(record.id));
        }
        self.persist_order(&record)?;
        inner.orders.insert(record.id, record);
        Ok(())
    }

    /// Fetch an order by id.
    pub fn get_order(&self, id: &Hash32) -> Result<OrderRecord, LedgerError> {
        self.lock()
            .orders
            .get(id)
            .cloned()
            .ok_or(LedgerError::UnknownOrder(*id))
    }

    /// Apply a mutation to an order and persist it.
    pub fn update_order<F>(&self, id: &Hash32, mutate: F) -> Result<OrderRecord, LedgerError>
    where
        F: FnOnce(&mut OrderRecord),
    {
        let mut inner = self.lock();
        let record = inner
            .orders
            .get_mut(id)
            .ok_or(LedgerError::UnknownOrder(*id))?;
        mutate(record);
        let snapshot = record.clone();
        self.persist_order(&snapshot)?;
        Ok(snapshot)
    }

    /// Move an order to a new settlement state.
    pub fn set_order_state(&self, id: &Hash32, state: OrderState) -> Result<(), LedgerError> {
        let label = state.label();
        self.update_order(id, |order| order.state = state)?;
        debug!(order = %id, state = label, "order state changed");
        Ok(())
    }

    /// Remove an order that never reached the chain.
    pub fn remove_order(&self, id: &Hash32) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner
            .orders
            .remove(id)
            .ok_or(LedgerError::UnknownOrder(*id))?;
        self.orders_tree.remove(id.as_bytes())?;
        Ok(())
    }

    /// Mark an open order filled, minting the received quote note first.
    ///
    /// Returns `false` without touching anything if the order is no longer
    /// open (a concurrent cancel won the race).
    pub fn apply_fill(
        &self,
        id: &Hash32,
        note: Note,
        leaf_index: u32,
        tx: Hash32,
        now: u64,
    ) -> Result<bool, LedgerError> {
        let quote_amount = note.amount;
        let mut inner = self.lock();
        match inner.orders.get(id) {
            Some(order) if order.state == OrderState::Open => {}
            Some(_) => return Ok(false),
            None => return Err(LedgerError::UnknownOrder(*id)),
        }

        let record = NoteRecord::confirmed(note, leaf_index, now)?;
        if inner.notes.contains_key(&record.commitment) {
            return Err(LedgerError::DuplicateNote(record.commitment));
        }
        self.persist_note(&record)?;
        inner.notes.insert(record.commitment, record);

        let order = inner
            .orders
            .get_mut(id)
            .ok_or(LedgerError::UnknownOrder(*id))?;
        order.state = OrderState::Filled {
            at: now,
            tx,
            quote_amount,
            leaf_index,
        };
        let snapshot = order.clone();
        self.persist_order(&snapshot)?;
        info!(order = %id, tx = %tx, "order filled");
        Ok(true)
    }

    /// Mark an open order cancelled, re-minting the locked note first.
    ///
    /// Returns `false` without touching anything if the order is no longer
    /// open.
    pub fn apply_cancel(
        &self,
        id: &Hash32,
        note: Note,
        leaf_index: u32,
        tx: Hash32,
        now: u64,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        match inner.orders.get(id) {
            Some(order) if order.state == OrderState::Open => {}
            Some(_) => return Ok(false),
            None => return Err(LedgerError::UnknownOrder(*id)),
        }

        let record = NoteRecord::confirmed(note, leaf_index, now)?;
        if inner.notes.contains_key(&record.commitment) {
            return Err(LedgerError::DuplicateNote(record.commitment));
        }
        self.persist_note(&record)?;
        inner.notes.insert(record.commitment, record);

        let order = inner
            .orders
            .get_mut(id)
            .ok_or(LedgerError::UnknownOrder(*id))?;
        order.state = OrderState::Cancelled {
            at: now,
            tx,
            leaf_index,
        };
        let snapshot = order.clone();
        self.persist_order(&snapshot)?;
        info!(order = %id, tx = %tx, "order cancelled");
        Ok(true)
    }

    /// Split all orders into the active list and history, as of `now`.
    pub fn orders(&self, now: u64) -> (Vec<OrderRecord>, Vec<OrderRecord>) {
        let inner = self.lock();
        let mut open = Vec::new();
        let mut history = Vec::new();
        for order in inner.orders.values() {
            if order.in_history(now) {
                history.push(order.clone());
            } else {
                open.push(order.clone());
            }
        }
        open.sort_by_key(|o| o.created_at);
        history.sort_by_key(|o| o.created_at);
        (open, history)
    }

    /// Ids of orders currently open and unexpired.
    pub fn open_order_ids(&self, now: u64) -> Vec<Hash32> {
        self.lock()
            .orders
            .values()
            .filter(|o| o.is_open(now))
            .map(|o| o.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------

    /// Register a new withdrawal record.
    pub fn insert_withdrawal(&self, record: WithdrawRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        self.persist_withdrawal(&record)?;
        inner.withdrawals.insert(record.id, record);
        Ok(())
    }

    /// Fetch a withdrawal by id.
    pub fn get_withdrawal(&self, id: &Hash32) -> Result<WithdrawRecord, LedgerError> {
        self.lock()
            .withdrawals
            .get(id)
            .cloned()
            .ok_or(LedgerError::UnknownWithdrawal(*id))
    }

    /// Move a withdrawal to a new stage.
    pub fn set_withdraw_stage(
        &self,
        id: &Hash32,
        stage: WithdrawStage,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let record = inner
            .withdrawals
            .get_mut(id)
            .ok_or(LedgerError::UnknownWithdrawal(*id))?;
        record.stage = stage;
        let snapshot = record.clone();
        self.persist_withdrawal(&snapshot)?;
        Ok(())
    }

    /// Remove a withdrawal that never reached the chain.
    pub fn remove_withdrawal(&self, id: &Hash32) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner
            .withdrawals
            .remove(id)
            .ok_or(LedgerError::UnknownWithdrawal(*id))?;
        self.withdrawals_tree.remove(id.as_bytes())?;
        Ok(())
    }

    /// All withdrawal records.
    pub fn withdrawals(&self) -> Vec<WithdrawRecord> {
        self.lock().withdrawals.values().cloned().collect()
    }
}
