//! Provenance snapshots
//!
//! Every block is stamped, at insertion, with the block sequence as it stood
//! immediately before it was inserted. The snapshot shares ownership with the
//! store's previous version and is never updated afterwards, so backward
//! lookups made long after the fact see the conversation exactly as it was
//! when the block appeared.

use std::sync::Arc;

use crate::types::{Block, BlockId, BlockKind};

use super::SharedBlock;

/// Immutable view of the conversation at a block's creation.
#[derive(Clone)]
pub struct Provenance {
    snapshot: Arc<[SharedBlock]>,
    /// Index in `snapshot` the block was inserted at
    position: usize,
}

impl Provenance {
    pub(crate) fn capture(snapshot: Arc<[SharedBlock]>, position: usize) -> Self {
        let position = position.min(snapshot.len());
        Self { snapshot, position }
    }

    /// The full sequence as it stood before insertion.
    pub fn blocks(&self) -> &[SharedBlock] {
        &self.snapshot
    }

    /// Where in [`blocks`](Self::blocks) the owning block was inserted.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Blocks preceding the owning block, nearest first.
    pub fn preceding(&self) -> impl Iterator<Item = &Block> {
        self.snapshot[..self.position].iter().rev().map(Arc::as_ref)
    }

    /// Nearest block of `kind` preceding the owning block.
    pub fn nearest(&self, kind: BlockKind) -> Option<&Block> {
        self.preceding().find(|b| b.kind() == kind)
    }

    /// Nearest block of `kind` preceding `before`, where `before` must itself
    /// precede the owning block in this snapshot.
    pub fn nearest_before(&self, before: &BlockId, kind: BlockKind) -> Option<&Block> {
        let visible = &self.snapshot[..self.position];
        let index = visible.iter().position(|b| &b.id == before)?;
        visible[..index]
            .iter()
            .rev()
            .map(Arc::as_ref)
            .find(|b| b.kind() == kind)
    }

    /// Whether both provenances reference the same stored sequence.
    pub fn shares_snapshot_with(&self, other: &Provenance) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot)
    }

    /// Whether this provenance references `snapshot`.
    pub fn is_snapshot(&self, snapshot: &Arc<[SharedBlock]>) -> bool {
        Arc::ptr_eq(&self.snapshot, snapshot)
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            snapshot: Arc::from(Vec::<SharedBlock>::new()),
            position: 0,
        }
    }
}

impl std::fmt::Debug for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The snapshot nests other snapshots; print its shape only.
        f.debug_struct("Provenance")
            .field("len", &self.snapshot.len())
            .field("position", &self.position)
            .finish()
    }
}
