use crate::repository::Repository;
use sable_common::error::{DatabaseError, Result};
use sable_common::types::{Block, BlockHeader};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read-mostly view of the committed chain and the header frontier.
///
/// Only the persister writes through the crate-private setters, and it is
/// driven by the single commit loop (blocks) and the header sync path
/// (headers).
pub struct Blockchain {
    current_block: RwLock<Option<Block>>,
    last_block_header: RwLock<Option<BlockHeader>>,
}

impl Blockchain {
    pub fn new(current_block: Option<Block>, last_block_header: Option<BlockHeader>) -> Self {
        Self {
            current_block: RwLock::new(current_block),
            last_block_header: RwLock::new(last_block_header),
        }
    }

    /// Rebuilds the view from stored heights.
    pub async fn load(repository: &dyn Repository) -> Result<Arc<Self>> {
        let current_block = match repository.get_total_block_height().await? {
            Some(height) => {
                let header = repository
                    .get_block_header_by_height(height)
                    .await?
                    .ok_or_else(|| {
                        DatabaseError::Corruption(format!("no header stored at block height {}", height))
                    })?;
                // Bodies are owned by storage; the loop only needs the index and hash.
                Some(Block { header, transactions: Vec::new() })
            }
            None => None,
        };

        let stored_frontier = match repository.get_total_header_height().await? {
            Some(height) => repository.get_block_header_by_height(height).await?,
            None => None,
        };
        // Commits do not write the header height, so the tip can be ahead of it.
        let last_block_header = match (stored_frontier, current_block.as_ref()) {
            (Some(header), Some(block)) if header.index < block.index() => Some(block.header.clone()),
            (Some(header), _) => Some(header),
            (None, block) => block.map(|b| b.header.clone()),
        };

        info!(
            block_height = ?current_block.as_ref().map(Block::index),
            header_height = ?last_block_header.as_ref().map(|h| h.index),
            "Loaded chain state"
        );
        Ok(Arc::new(Self::new(current_block, last_block_header)))
    }

    pub async fn current_block(&self) -> Option<Block> {
        self.current_block.read().await.clone()
    }

    /// Index of the last committed block; `None` on an empty chain.
    pub async fn current_block_height(&self) -> Option<u32> {
        self.current_block.read().await.as_ref().map(Block::index)
    }

    pub async fn last_block_header(&self) -> Option<BlockHeader> {
        self.last_block_header.read().await.clone()
    }

    pub async fn last_header_index(&self) -> Option<u32> {
        self.last_block_header.read().await.as_ref().map(|h| h.index)
    }

    pub(crate) async fn set_current_block(&self, block: Block) {
        *self.current_block.write().await = Some(block);
    }

    /// Moves the header frontier forward, never back.
    pub(crate) async fn advance_last_header(&self, header: BlockHeader) -> bool {
        let mut last = self.last_block_header.write().await;
        match last.as_ref() {
            Some(current) if current.index >= header.index => false,
            _ => {
                *last = Some(header);
                true
            }
        }
    }
}

/// True when a local height lags the peer's advertised height.
pub fn is_behind(local: Option<u32>, peer: u32) -> bool {
    local.map_or(true, |height| height < peer)
}
