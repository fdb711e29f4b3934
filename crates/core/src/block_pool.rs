//! Holding area for blocks that arrived ahead of the commit frontier.

use sable_common::types::{Block, Hash};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct PoolState {
    by_index: HashMap<u32, Block>,
    index_by_hash: HashMap<Hash, u32>,
}

/// Blocks keyed by index and by hash. One lock guards both maps so a reader
/// never observes a block in one map and not the other.
#[derive(Default)]
pub struct BlockPool {
    state: RwLock<PoolState>,
}

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a validated block. Returns `false` without touching the pool
    /// if the hash is already present, the index is already occupied, or the
    /// block carries no hash.
    pub async fn add(&self, block: Block) -> bool {
        let Some(hash) = block.hash() else {
            warn!(index = block.index(), "Refusing to pool block without hash");
            return false;
        };
        let index = block.index();

        let mut state = self.state.write().await;
        if state.index_by_hash.contains_key(&hash) {
            debug!(%hash, index, "Block already pooled");
            return false;
        }
        if let Some(existing) = state.by_index.get(&index) {
            warn!(
                index,
                %hash,
                pooled = ?existing.hash(),
                "Another block already pooled at this index"
            );
            return false;
        }

        state.index_by_hash.insert(hash, index);
        state.by_index.insert(index, block);
        debug!(%hash, index, size = state.by_index.len(), "Block pooled");
        true
    }

    pub async fn contains(&self, hash: &Hash) -> bool {
        self.state.read().await.index_by_hash.contains_key(hash)
    }

    /// Block at `index`, left in place.
    pub async fn try_get(&self, index: u32) -> Option<Block> {
        self.state.read().await.by_index.get(&index).cloned()
    }

    /// Drops the block at `index`. Only the commit loop calls this.
    pub(crate) async fn remove(&self, index: u32) -> Option<Block> {
        let mut state = self.state.write().await;
        let block = state.by_index.remove(&index)?;
        if let Some(hash) = block.hash() {
            state.index_by_hash.remove(&hash);
        }
        Some(block)
    }

    /// Drops every block at or below `index`. Returns how many were dropped.
    pub(crate) async fn prune_through(&self, index: u32) -> usize {
        let mut state = self.state.write().await;
        let stale: Vec<u32> = state.by_index.keys().copied().filter(|i| *i <= index).collect();
        for i in &stale {
            if let Some(hash) = state.by_index.remove(i).and_then(|block| block.hash()) {
                state.index_by_hash.remove(&hash);
            }
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.by_index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.by_index.is_empty()
    }
}
