#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Canonical types and cryptographic primitives for the murk client.
//!
//! Everything that both the ledger and the settlement pipeline must agree
//! on lives here: fixed-size value types, the BN254 field codec, and the
//! Poseidon commitment scheme that binds a note's asset, amount, and
//! combined secret into the leaf published on-chain.
//!
//! This crate intentionally does NOT implement novel cryptography. Poseidon
//! comes from `light-poseidon` (circom parameter set) and field arithmetic
//! from `ark-bn254`; both must stay in lockstep with the external circuit.

pub mod commitment;
pub mod constants;
pub mod field;
pub mod note;
pub mod types;

pub use commitment::*;
pub use constants::*;
pub use field::*;
pub use note::*;
pub use types::*;
