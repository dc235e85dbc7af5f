//! Rebuilding the tree from on-chain leaves.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use murk_core::Field32;

use crate::error::TreeError;
use crate::tree::{CommitmentTree, InclusionProof};

/// Read access to the contract's leaf sequence.
///
/// Implementations wrap whatever transport reaches the chain (an RPC
/// gateway in production, an in-memory vector in tests). `leaves` is
/// batched: one call covers the whole requested range.
#[async_trait]
pub trait LeafSource: Send + Sync {
    /// Number of leaves inserted so far (the contract's next index).
    async fn leaf_count(&self) -> anyhow::Result<u32>;

    /// Leaves `start..start + count` in insertion order.
    async fn leaves(&self, start: u32, count: u32) -> anyhow::Result<Vec<Field32>>;

    /// Historical root recorded after the leaf at `index` was inserted.
    async fn root_at(&self, index: u32) -> anyhow::Result<Field32>;
}

/// An immutable view of the tree at one synchronization point.
///
/// A witness must draw its root and every inclusion proof from a single
/// snapshot; mixing snapshots produces proofs that cannot verify together.
#[derive(Clone, Debug)]
pub struct TreeSnapshot {
    tree: CommitmentTree,
}

impl TreeSnapshot {
    /// Freeze a locally built tree into a snapshot.
    pub fn from_tree(tree: CommitmentTree) -> Self {
        Self { tree }
    }

    /// The synchronized root.
    pub fn root(&self) -> Field32 {
        self.tree.root()
    }

    /// Number of leaves in this snapshot.
    pub fn leaf_count(&self) -> u32 {
        self.tree.len()
    }

    /// Inclusion proof for a commitment within this snapshot.
    pub fn proof(&self, commitment: &Field32) -> Result<InclusionProof, TreeError> {
        self.tree.proof(commitment)
    }

    /// Leaf index of a commitment within this snapshot, if present.
    pub fn position(&self, commitment: &Field32) -> Option<u32> {
        self.tree.position(commitment)
    }
}

/// Synchronizes the local tree against the chain collaborator.
pub struct MerkleSync<S> {
    source: S,
    current: RwLock<Option<Arc<TreeSnapshot>>>,
}

impl<S: LeafSource> MerkleSync<S> {
    /// Wrap a leaf source. No chain access happens until [`Self::sync`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: RwLock::new(None),
        }
    }

    /// Read the current leaf count and all leaves in index order, rebuild
    /// the tree by ordered bulk insertion, and return the snapshot.
    ///
    /// A partial read (fewer leaves than the reported count) fails with
    /// [`TreeError::ChainRead`]; truncation would produce a root that
    /// disagrees with the contract for every proof built afterwards.
    pub async fn sync(&self) -> Result<Arc<TreeSnapshot>, TreeError> {
        let count = self
            .source
            .leaf_count()
            .await
            .map_err(|e| TreeError::ChainRead(e.to_string()))?;
        let leaves = self
            .source
            .leaves(0, count)
            .await
            .map_err(|e| TreeError::ChainRead(e.to_string()))?;
        if leaves.len() != count as usize {
            return Err(TreeError::ChainRead(format!(
                "partial leaf read: expected {count}, got {}",
                leaves.len()
            )));
        }

        let tree = CommitmentTree::from_leaves(&leaves)?;
        let snapshot = Arc::new(TreeSnapshot { tree });
        info!(leaves = count, root = %snapshot.root(), "synchronized commitment tree");

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// The most recent snapshot, if any sync has completed.
    pub fn snapshot(&self) -> Option<Arc<TreeSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Root of the most recent snapshot.
    pub fn root(&self) -> Result<Field32, TreeError> {
        self.snapshot().map(|s| s.root()).ok_or(TreeError::NotSynced)
    }

    /// Inclusion proof against the most recent snapshot.
    pub fn proof(&self, commitment: &Field32) -> Result<InclusionProof, TreeError> {
        self.snapshot()
            .ok_or(TreeError::NotSynced)?
            .proof(commitment)
    }

    /// Whether a snapshot still matches the live chain state.
    ///
    /// The contract only ever appends, so an unchanged leaf count means the
    /// snapshot's root is still current. A witness built on a snapshot that
    /// fails this check must be rebuilt, never submitted.
    pub async fn is_current(&self, snapshot: &TreeSnapshot) -> Result<bool, TreeError> {
        let count = self
            .source
            .leaf_count()
            .await
            .map_err(|e| TreeError::ChainRead(e.to_string()))?;
        if count != snapshot.leaf_count() {
            debug!(
                snapshot = snapshot.leaf_count(),
                chain = count,
                "snapshot superseded by new leaves"
            );
        }
        Ok(count == snapshot.leaf_count())
    }

    /// Access the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeLeaves {
        leaves: Mutex<Vec<Field32>>,
        short_read: bool,
    }

    impl FakeLeaves {
        fn new(leaves: Vec<Field32>) -> Self {
            Self {
                leaves: Mutex::new(leaves),
                short_read: false,
            }
        }

        fn push(&self, leaf: Field32) {
            self.leaves.lock().unwrap().push(leaf);
        }
    }

    #[async_trait]
    impl LeafSource for FakeLeaves {
        async fn leaf_count(&self) -> anyhow::Result<u32> {
            Ok(self.leaves.lock().unwrap().len() as u32)
        }

        async fn leaves(&self, start: u32, count: u32) -> anyhow::Result<Vec<Field32>> {
            let all = self.leaves.lock().unwrap();
            let mut out: Vec<Field32> = all
                .iter()
                .skip(start as usize)
                .take(count as usize)
                .copied()
                .collect();
            if self.short_read {
                out.pop();
            }
            Ok(out)
        }

        async fn root_at(&self, _index: u32) -> anyhow::Result<Field32> {
            anyhow::bail!("not recorded")
        }
    }

    fn leaf(n: u8) -> Field32 {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        Field32::from(bytes)
    }

    #[tokio::test]
    async fn sync_rebuilds_and_proves() {
        let sync = MerkleSync::new(FakeLeaves::new(vec![leaf(1), leaf(2), leaf(3)]));
        let snapshot = sync.sync().await.unwrap();
        assert_eq!(snapshot.leaf_count(), 3);
        let proof = snapshot.proof(&leaf(2)).unwrap();
        assert!(proof.verify(&leaf(2), &snapshot.root()).unwrap());
        assert_eq!(sync.root().unwrap(), snapshot.root());
    }

    #[tokio::test]
    async fn partial_reads_fail_loudly() {
        let mut source = FakeLeaves::new(vec![leaf(1), leaf(2)]);
        source.short_read = true;
        let sync = MerkleSync::new(source);
        assert!(matches!(sync.sync().await, Err(TreeError::ChainRead(_))));
        assert!(sync.snapshot().is_none());
    }

    #[tokio::test]
    async fn staleness_is_detected_after_insertion() {
        let sync = MerkleSync::new(FakeLeaves::new(vec![leaf(1)]));
        let snapshot = sync.sync().await.unwrap();
        assert!(sync.is_current(&snapshot).await.unwrap());

        sync.source().push(leaf(2));
        assert!(!sync.is_current(&snapshot).await.unwrap());

        let fresh = sync.sync().await.unwrap();
        assert!(sync.is_current(&fresh).await.unwrap());
        assert_ne!(fresh.root(), snapshot.root());
    }

    #[tokio::test]
    async fn proof_before_sync_is_rejected() {
        let sync = MerkleSync::new(FakeLeaves::new(vec![]));
        assert!(matches!(sync.proof(&leaf(1)), Err(TreeError::NotSynced)));
    }
}
