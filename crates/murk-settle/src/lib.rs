#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Settlement pipeline for the murk client.
//!
//! This crate turns a reserved coin selection into a confirmed on-chain
//! state change: it assembles the zero-knowledge witness from one tree
//! snapshot, obtains a proof from the external prover, pushes the
//! prepared call through the relay, waits for the receipt, and reconciles
//! the ledger from the emitted leaf-insertion events.
//!
//! The collaborators at the system boundary (relay, fill taker, chain,
//! prover) are traits; production wires HTTP gateways, tests wire fakes.

pub mod call;
pub mod chain;
pub mod engine;
pub mod error;
pub mod prover;
pub mod relay;
pub mod witness;

pub use call::*;
pub use chain::*;
pub use engine::*;
pub use error::*;
pub use prover::*;
pub use relay::*;
pub use witness::*;
