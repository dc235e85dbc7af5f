//! Field codec: moving addresses, amounts, secrets, and raw bytes in and
//! out of the BN254 scalar field.
//!
//! Every value the circuit sees must be a reduced field element. Raw
//! 32-byte values can exceed the curve order, so conversion always goes
//! through `from_be_bytes_mod_order`; plain truncation is never correct.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use rand_core::{OsRng, RngCore};

use crate::types::{Address, Amount, Field32, Hash32};

/// Reduce arbitrary big-endian bytes into a field element.
pub fn fr_from_be_bytes(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Decode a canonical [`Field32`] into a field element.
///
/// Reduction is applied again so that even a hand-constructed non-canonical
/// value cannot smuggle an out-of-range scalar into a hash input.
pub fn to_fr(value: &Field32) -> Fr {
    Fr::from_be_bytes_mod_order(value.as_bytes())
}

/// Encode a field element into its canonical big-endian form.
pub fn from_fr(value: Fr) -> Field32 {
    let be = value.into_bigint().to_bytes_be();
    let mut arr = [0u8; 32];
    arr[32 - be.len()..].copy_from_slice(&be);
    Field32(arr)
}

/// Encode a 20-byte address as a field element.
///
/// 160 bits always fit below the curve order, so this is injective.
pub fn address_to_fr(addr: &Address) -> Fr {
    Fr::from_be_bytes_mod_order(addr.as_bytes())
}

/// Encode an amount as a field element.
pub fn amount_to_fr(amount: Amount) -> Fr {
    Fr::from(amount.units())
}

/// Reduce a raw hash into the field. The result of `h mod n`, not yet
/// re-hashed; see [`crate::commitment::normalize_hash`] for the circuit's
/// normalized form.
pub fn hash_to_fr(hash: &Hash32) -> Fr {
    Fr::from_be_bytes_mod_order(hash.as_bytes())
}

/// Sample a fresh uniformly-random field element from the OS RNG.
///
/// This is the sole source of note secrets and nonces.
pub fn random_field() -> Field32 {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    from_fr(Fr::from_be_bytes_mod_order(&bytes))
}
