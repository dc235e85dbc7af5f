//! Protocol-wide constants for the murk client.

/// Depth of the on-chain commitment tree.
pub const TREE_DEPTH: usize = 10;

/// Maximum number of leaves the commitment tree can hold.
pub const MAX_LEAVES: u32 = 1 << TREE_DEPTH;

/// Maximum number of input notes a single spend may consume.
///
/// This is a circuit limitation, not a policy choice: the proof system
/// has exactly two input slots, with all-zero notes filling unused ones.
pub const MAX_SPEND_INPUTS: usize = 2;

/// Maximum number of output notes a single spend may produce.
pub const MAX_SPEND_OUTPUTS: usize = 2;

/// Length in bytes of a field element encoding and of a raw hash.
pub const WORD_LEN: usize = 32;

/// Length in bytes of an account or token address.
pub const ADDRESS_LEN: usize = 20;
