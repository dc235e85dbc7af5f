//! Fixed-depth append-only Merkle tree over note commitments.
//!
//! Depth is fixed at [`TREE_DEPTH`] with the zero field element filling
//! every vacant position, matching the on-chain contract. Leaves are
//! strictly ordered by insertion index; the root is a pure function of
//! the ordered sequence, so replaying the same leaves always reproduces
//! the same root and the same proofs.

use hashbrown::HashMap;

use murk_core::{merkle_node, Field32, MAX_LEAVES, TREE_DEPTH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// A sibling path proving a commitment sits at `leaf_index` under a root.
///
/// Only valid against the root of the snapshot that produced it; any later
/// leaf insertion changes the root and invalidates the proof.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InclusionProof {
    /// Index of the proven leaf.
    pub leaf_index: u32,
    /// Sibling hashes from the leaf level upward.
    pub path: [Field32; TREE_DEPTH],
}

impl InclusionProof {
    /// The deterministic placeholder proof for an unused spend slot:
    /// index 0 with an all-zero path. The circuit skips verification for
    /// the all-zero note this accompanies.
    pub const fn empty() -> Self {
        Self {
            leaf_index: 0,
            path: [Field32::ZERO; TREE_DEPTH],
        }
    }

    /// Fold the path over a leaf and compare against a root.
    pub fn verify(&self, leaf: &Field32, root: &Field32) -> Result<bool, TreeError> {
        let mut node = *leaf;
        let mut idx = self.leaf_index;
        for sibling in &self.path {
            node = if idx & 1 == 0 {
                merkle_node(&node, sibling)?
            } else {
                merkle_node(sibling, &node)?
            };
            idx >>= 1;
        }
        Ok(node == *root)
    }
}

/// The local rebuild of the on-chain commitment tree.
///
/// Stores every level explicitly; at a fixed depth of ten this is at most
/// ~2k hashes, and keeping full levels makes proof extraction a straight
/// sibling lookup.
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    levels: Vec<Vec<Field32>>,
    zeros: [Field32; TREE_DEPTH + 1],
    positions: HashMap<Field32, u32>,
}

impl CommitmentTree {
    /// Create an empty tree.
    pub fn new() -> Result<Self, TreeError> {
        let mut zeros = [Field32::ZERO; TREE_DEPTH + 1];
        for level in 0..TREE_DEPTH {
            zeros[level + 1] = merkle_node(&zeros[level], &zeros[level])?;
        }
        Ok(Self {
            levels: vec![Vec::new(); TREE_DEPTH + 1],
            zeros,
            positions: HashMap::new(),
        })
    }

    /// Build a tree from an ordered leaf sequence.
    pub fn from_leaves(leaves: &[Field32]) -> Result<Self, TreeError> {
        let mut tree = Self::new()?;
        tree.bulk_insert(leaves)?;
        Ok(tree)
    }

    /// Append leaves in order.
    pub fn bulk_insert(&mut self, leaves: &[Field32]) -> Result<(), TreeError> {
        for leaf in leaves {
            self.push(*leaf)?;
        }
        Ok(())
    }

    /// Append a single leaf, returning its index.
    pub fn push(&mut self, leaf: Field32) -> Result<u32, TreeError> {
        let index = self.len();
        if index >= MAX_LEAVES {
            return Err(TreeError::Full);
        }
        self.levels[0].push(leaf);
        self.positions.insert(leaf, index);

        // Recompute the path from this leaf to the root.
        let mut idx = index as usize;
        for level in 0..TREE_DEPTH {
            let parent = idx / 2;
            let left = self.node(level, parent * 2);
            let right = self.node(level, parent * 2 + 1);
            let hash = merkle_node(&left, &right)?;
            if parent < self.levels[level + 1].len() {
                self.levels[level + 1][parent] = hash;
            } else {
                self.levels[level + 1].push(hash);
            }
            idx = parent;
        }
        Ok(index)
    }

    /// Number of leaves inserted so far.
    pub fn len(&self) -> u32 {
        self.levels[0].len() as u32
    }

    /// Whether the tree holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// The current root.
    pub fn root(&self) -> Field32 {
        self.levels[TREE_DEPTH]
            .first()
            .copied()
            .unwrap_or(self.zeros[TREE_DEPTH])
    }

    /// Index of a commitment among the leaves, if present.
    pub fn position(&self, commitment: &Field32) -> Option<u32> {
        self.positions.get(commitment).copied()
    }

    /// Produce the inclusion proof for a commitment.
    pub fn proof(&self, commitment: &Field32) -> Result<InclusionProof, TreeError> {
        let leaf_index = self.position(commitment).ok_or(TreeError::NotFound)?;
        let mut path = [Field32::ZERO; TREE_DEPTH];
        let mut idx = leaf_index as usize;
        for (level, slot) in path.iter_mut().enumerate() {
            *slot = self.node(level, idx ^ 1);
            idx >>= 1;
        }
        Ok(InclusionProof { leaf_index, path })
    }

    fn node(&self, level: usize, idx: usize) -> Field32 {
        self.levels[level]
            .get(idx)
            .copied()
            .unwrap_or(self.zeros[level])
    }
}
