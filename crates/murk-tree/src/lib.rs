#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Commitment-tree synchronization for the murk client.
//!
//! The on-chain contract maintains a fixed-depth, zero-filled, append-only
//! Merkle tree of note commitments. This crate rebuilds that tree locally
//! from the contract's ordered leaf sequence and produces the inclusion
//! proofs spends need.
//!
//! Synchronization always yields an immutable [`TreeSnapshot`]; a witness
//! that draws its root and all of its proofs from one snapshot is
//! consistent by construction, and a snapshot that has been superseded by
//! new on-chain leaves is detectable via [`MerkleSync::is_current`].

pub mod error;
pub mod sync;
pub mod tree;

pub use error::*;
pub use sync::*;
pub use tree::*;
