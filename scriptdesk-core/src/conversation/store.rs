//! Block store
//!
//! The ordered block sequence and the operations that insert, replace and
//! remove blocks relative to an anchor. Every mutation produces a new shared
//! sequence; the previous one lives on inside the provenance of the blocks
//! inserted by that mutation. Blocks are individually shared, so a new
//! version copies pointers, never block contents.
//!
//! All operations are total: a missing anchor degrades to an append and a
//! missing id is a no-op, never a panic or a lost block.

use std::sync::Arc;

use crate::types::{Block, BlockId, BlockPayload};

use super::Provenance;

/// A block shared between store versions and provenance snapshots.
pub type SharedBlock = Arc<Block>;

/// Field updates applied by [`BlockStore::replace`].
#[derive(Debug, Clone, Default)]
pub struct BlockPatch {
    pub payload: Option<BlockPayload>,
    pub is_recently_created: Option<bool>,
}

impl BlockPatch {
    /// Replace the payload and retrigger the entrance animation.
    pub fn edited(payload: BlockPayload) -> Self {
        Self {
            payload: Some(payload),
            is_recently_created: Some(true),
        }
    }

    /// Clear the entrance animation flag.
    pub fn settled() -> Self {
        Self {
            payload: None,
            is_recently_created: Some(false),
        }
    }
}

/// Ordered, shared conversation sequence.
#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: Arc<[SharedBlock]>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore {
    pub fn new() -> Self {
        Self {
            blocks: Arc::from(Vec::<SharedBlock>::new()),
        }
    }

    pub fn blocks(&self) -> &[SharedBlock] {
        &self.blocks
    }

    /// Shared handle to the current sequence.
    pub fn snapshot(&self) -> Arc<[SharedBlock]> {
        Arc::clone(&self.blocks)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id).map(Arc::as_ref)
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| &b.id == id)
    }

    /// Add a block at the end.
    pub fn append(&mut self, block: Block) -> BlockId {
        let position = self.blocks.len();
        self.insert_at(position, vec![block])
            .pop()
            .unwrap_or_default()
    }

    /// Insert `blocks` immediately after `anchor`, in order.
    ///
    /// Falls back to appending when the anchor is not in the store.
    pub fn splice_after(&mut self, anchor: &BlockId, blocks: Vec<Block>) -> Vec<BlockId> {
        let position = match self.position(anchor) {
            Some(index) => index + 1,
            None => {
                tracing::warn!(
                    anchor = %anchor,
                    "Anchor block missing, appending at the end"
                );
                self.blocks.len()
            }
        };
        self.insert_at(position, blocks)
    }

    /// Merge `patch` into the block with `id`. Returns false if it is absent.
    pub fn replace(&mut self, id: &BlockId, patch: BlockPatch) -> bool {
        let Some(index) = self.position(id) else {
            tracing::debug!(block_id = %id, "Replace skipped, block not found");
            return false;
        };

        let mut block = Block::clone(&self.blocks[index]);
        if let Some(payload) = patch.payload {
            block.payload = payload;
        }
        if let Some(recent) = patch.is_recently_created {
            block.is_recently_created = recent;
        }
        let mut next = self.blocks.to_vec();
        next[index] = Arc::new(block);
        self.blocks = Arc::from(next);
        true
    }

    /// Remove exactly one block.
    pub fn remove_by_id(&mut self, id: &BlockId) -> Option<SharedBlock> {
        let index = self.position(id)?;
        let mut next = self.blocks.to_vec();
        let removed = next.remove(index);
        self.blocks = Arc::from(next);
        Some(removed)
    }

    fn insert_at(&mut self, position: usize, blocks: Vec<Block>) -> Vec<BlockId> {
        if blocks.is_empty() {
            return Vec::new();
        }

        let previous = self.snapshot();
        let mut next = Vec::with_capacity(previous.len() + blocks.len());
        next.extend_from_slice(&previous[..position]);

        let mut ids = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            block.provenance = Provenance::capture(Arc::clone(&previous), position);
            ids.push(block.id);
            next.push(Arc::new(block));
        }

        next.extend_from_slice(&previous[position..]);
        self.blocks = Arc::from(next);
        ids
    }
}
