//! Canonical value types used across the client.
//!
//! All fixed-size types follow the same newtype pattern: a public byte
//! array, hex `Display`/`FromStr`, and Borsh for persistence. `Field32`
//! and `Hash32` are deliberately distinct: a raw hash (keccak order hash,
//! transaction hash) may exceed the BN254 scalar order, while a `Field32`
//! produced by this crate is always a reduced field element.

use crate::constants::*;
use core::fmt;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors related to parsing, validation, or construction of core types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Arithmetic overflow or underflow occurred.
    #[error("amount overflow or underflow")]
    AmountOverflow,

    /// A value violated a structural constraint.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// The underlying Poseidon hasher rejected its input.
    #[error("poseidon hash failed: {0}")]
    Hash(#[from] light_poseidon::PoseidonError),
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], CoreError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(CoreError::InvalidHexLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Big-endian encoding of a BN254 scalar field element.
///
/// Commitments, nullifier components, Merkle nodes, and secrets are all
/// field elements. Values constructed through [`crate::field`] are reduced
/// modulo the curve order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Field32(pub [u8; WORD_LEN]);

impl Field32 {
    /// The zero field element, also the tree's empty-leaf placeholder.
    pub const ZERO: Self = Self([0u8; WORD_LEN]);

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; WORD_LEN] {
        &self.0
    }

    /// Whether this is the zero element.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; WORD_LEN]
    }
}

impl fmt::Debug for Field32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Field32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; WORD_LEN]> for Field32 {
    fn from(value: [u8; WORD_LEN]) -> Self {
        Self(value)
    }
}

impl FromStr for Field32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<WORD_LEN>(s).map(Self)
    }
}

/// A raw 32-byte hash.
///
/// Used for externally-sourced hashes that are not field elements: limit
/// order hashes, cancel hashes, transaction hashes. Reduce with
/// [`crate::commitment::normalize_hash`] before handing one to the circuit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hash32(pub [u8; WORD_LEN]);

impl Hash32 {
    /// Returns an all-zero hash.
    pub const ZERO: Self = Self([0u8; WORD_LEN]);

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; WORD_LEN] {
        &self.0
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; WORD_LEN]> for Hash32 {
    fn from(value: [u8; WORD_LEN]) -> Self {
        Self(value)
    }
}

impl FromStr for Hash32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<WORD_LEN>(s).map(Self)
    }
}

/// A 20-byte account or token address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Returns an all-zero address (the empty-note asset placeholder).
    pub const ZERO: Self = Self([0u8; ADDRESS_LEN]);

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(value: [u8; ADDRESS_LEN]) -> Self {
        Self(value)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<ADDRESS_LEN>(s).map(Self)
    }
}

/// A token amount in integer base units.
///
/// Wide enough for any realistic ERC-20 balance; persisted exactly, never
/// as floating point. All arithmetic is checked.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Amount(pub u128);

impl Amount {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Constructs an amount from base units.
    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    /// Returns the underlying base-unit value.
    pub const fn units(self) -> u128 {
        self.0
    }

    /// Whether the amount is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let f: Field32 = "0x0000000000000000000000000000000000000000000000000000000000000007"
            .parse()
            .unwrap();
        assert_eq!(f.0[31], 7);
        assert_eq!(f.to_string().parse::<Field32>().unwrap(), f);

        let a: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(a.0[19], 0xff);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            "0x0011".parse::<Field32>(),
            Err(CoreError::InvalidHexLength { expected: 32, got: 2 })
        ));
    }

    #[test]
    fn amount_checked_math() {
        let a = Amount::from_units(u128::MAX);
        assert!(matches!(
            a.checked_add(Amount::from_units(1)),
            Err(CoreError::AmountOverflow)
        ));
        assert!(matches!(
            Amount::ZERO.checked_sub(Amount::from_units(1)),
            Err(CoreError::AmountOverflow)
        ));
        assert_eq!(
            Amount::from_units(70)
                .checked_add(Amount::from_units(30))
                .unwrap(),
            Amount::from_units(100)
        );
    }
}
