//! Notes and their secret material.

use borsh::{BorshDeserialize, BorshSerialize};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::commitment::note_commitment;
use crate::field::random_field;
use crate::types::{Address, Amount, CoreError, Field32};

/// The secret pair seeding a note's commitment.
///
/// Both halves are freshly random per note. Reusing a pair across notes
/// links them and must never happen; the only non-deserializing
/// constructor is [`CombinedSecret::random`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CombinedSecret {
    /// Random field element.
    pub secret: Field32,
    /// Random field element, disclosed on-chain as the public nullifier
    /// component when the note is spent.
    pub nonce: Field32,
}

impl CombinedSecret {
    /// Sample a fresh secret pair.
    pub fn random() -> Self {
        Self {
            secret: random_field(),
            nonce: random_field(),
        }
    }

    /// The all-zero pair used by placeholder notes.
    pub const fn zero() -> Self {
        Self {
            secret: Field32::ZERO,
            nonce: Field32::ZERO,
        }
    }

    /// Whether both halves are zero.
    pub fn is_zero(&self) -> bool {
        self.secret.is_zero() && self.nonce.is_zero()
    }
}

/// The primitive committed value: an asset, an amount, and the secret
/// pair binding them.
///
/// Invariant: `commitment = H3(asset, amount, H2(secret, nonce))`. A note
/// is immutable once created; spend/reserve bookkeeping lives on the
/// ledger's record wrapper, never here.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Note {
    /// Token address.
    pub asset: Address,
    /// Balance in integer base units.
    pub amount: Amount,
    /// Secret pair; fresh per note.
    pub secret: CombinedSecret,
}

impl Note {
    /// Create a note with a freshly sampled secret pair.
    pub fn fresh(asset: Address, amount: Amount) -> Self {
        Self {
            asset,
            amount,
            secret: CombinedSecret::random(),
        }
    }

    /// The all-zero placeholder note.
    ///
    /// Fills unused input/output slots of a spend; the circuit treats it
    /// as a zero-amount no-op.
    pub const fn zero() -> Self {
        Self {
            asset: Address::ZERO,
            amount: Amount::ZERO,
            secret: CombinedSecret::zero(),
        }
    }

    /// Whether this is the placeholder note.
    pub fn is_zero(&self) -> bool {
        self.asset == Address::ZERO && self.amount.is_zero() && self.secret.is_zero()
    }

    /// Compute this note's commitment.
    pub fn commitment(&self) -> Result<Field32, CoreError> {
        note_commitment(self)
    }
}
