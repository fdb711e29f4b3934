use crate::blockchain::Blockchain;
use crate::repository::Repository;
use async_trait::async_trait;
use sable_common::error::{ErrorContext, Result};
use sable_common::types::{Block, BlockHeader, HeaderKind};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockPersister: Send + Sync {
    /// Durably commits a block and advances the committed height. The caller
    /// guarantees each index is persisted at most once.
    async fn persist(&self, block: &Block) -> Result<()>;

    /// Durably stores a header batch. Returns exactly the headers written by
    /// this call; headers without a hash or already known are skipped.
    async fn persist_headers(&self, headers: Vec<BlockHeader>) -> Result<Vec<BlockHeader>>;
}

pub struct ChainPersister {
    repository: Arc<dyn Repository>,
    chain: Arc<Blockchain>,
}

impl ChainPersister {
    pub fn new(repository: Arc<dyn Repository>, chain: Arc<Blockchain>) -> Self {
        Self { repository, chain }
    }
}

#[async_trait]
impl BlockPersister for ChainPersister {
    async fn persist(&self, block: &Block) -> Result<()> {
        self.repository
            .commit_block(block)
            .await
            .with_context(&format!("committing block {}", block.index()))?;

        self.chain.advance_last_header(block.to_extended_header()).await;
        self.chain.set_current_block(block.clone()).await;

        info!(index = block.index(), hash = ?block.hash(), txs = block.transactions.len(), "Persisted block");
        Ok(())
    }

    async fn persist_headers(&self, headers: Vec<BlockHeader>) -> Result<Vec<BlockHeader>> {
        let mut persisted = Vec::with_capacity(headers.len());

        for mut header in headers {
            let Some(hash) = header.hash else {
                debug!(index = header.index, "Skipping header without hash");
                continue;
            };

            // A known header can still sit above a frontier that was not saved.
            let known = self.repository.get_block_header(&hash).await?;
            let is_new = known.is_none();
            if is_new {
                header.kind = HeaderKind::Header;
                self.repository.add_block_header(&header).await?;
            }

            let index = header.index;
            if self.chain.advance_last_header(known.unwrap_or_else(|| header.clone())).await {
                self.repository.set_total_header_height(index).await?;
            }
            if is_new {
                persisted.push(header);
            }
        }

        if !persisted.is_empty() {
            let last_index = self.chain.last_header_index().await;
            info!(count = persisted.len(), last_index = ?last_index, "Persisted block headers");
        }
        Ok(persisted)
    }
}
