//! Key-value backed record store for headers and transactions.

use async_trait::async_trait;
use moka::future::Cache;
use sable_common::error::{DatabaseError, Result};
use sable_common::traits::DBInterface;
use sable_common::types::{Block, BlockHeader, Hash, Transaction};
use sable_common::utils::codec::StorageFormat;
use sable_common::utils::db_keys;
use std::sync::Arc;
use tracing::debug;

const HEADER_CACHE_SIZE: u64 = 4096;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Stores the header under its hash and indexes it by height.
    async fn add_block_header(&self, header: &BlockHeader) -> Result<()>;
    /// Writes the block's transactions, its extended header, the height
    /// index and the committed height as one atomic batch.
    async fn commit_block(&self, block: &Block) -> Result<()>;
    async fn get_block_header(&self, hash: &Hash) -> Result<Option<BlockHeader>>;
    async fn get_block_header_by_height(&self, height: u32) -> Result<Option<BlockHeader>>;
    async fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>>;
    async fn get_total_block_height(&self) -> Result<Option<u32>>;
    async fn set_total_header_height(&self, height: u32) -> Result<()>;
    async fn get_total_header_height(&self) -> Result<Option<u32>>;
}

pub struct KvRepository {
    db: Arc<dyn DBInterface>,
    format: StorageFormat,
    header_cache: Cache<Hash, BlockHeader>,
}

impl KvRepository {
    pub fn new(db: Arc<dyn DBInterface>, format: StorageFormat) -> Self {
        Self {
            db,
            format,
            header_cache: Cache::new(HEADER_CACHE_SIZE),
        }
    }

    /// Transactions listed by the stored header, in block order. Missing
    /// entries are skipped.
    pub async fn get_transactions_for_block(&self, hash: &Hash) -> Result<Vec<Transaction>> {
        let Some(header) = self.get_block_header(hash).await? else {
            return Ok(Vec::new());
        };

        let mut transactions = Vec::with_capacity(header.transaction_hashes.len());
        for tx_hash in &header.transaction_hashes {
            if let Some(tx) = self.get_transaction(tx_hash).await? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    async fn get_height(&self, key: &[u8]) -> Result<Option<u32>> {
        let Some(bytes) = self.db.get(key).await? else {
            return Ok(None);
        };
        let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
            DatabaseError::Corruption(format!("height value has {} bytes", bytes.len()))
        })?;
        Ok(Some(u32::from_be_bytes(raw)))
    }
}

#[async_trait]
impl Repository for KvRepository {
    async fn add_block_header(&self, header: &BlockHeader) -> Result<()> {
        let hash = header.hash.ok_or_else(|| {
            DatabaseError::OperationFailed(format!("header {} has no hash", header.index))
        })?;

        let keys = vec![
            db_keys::header_hash_to_db_key(&hash),
            db_keys::height_to_db_key(header.index),
        ];
        let values = vec![self.format.encode(header)?, hash.0.to_vec()];
        self.db.batch_insert(&keys, &values).await?;

        self.header_cache.insert(hash, header.clone()).await;
        debug!(%hash, index = header.index, kind = ?header.kind, "Stored block header");
        Ok(())
    }

    async fn commit_block(&self, block: &Block) -> Result<()> {
        let header = block.to_extended_header();
        let hash = header.hash.ok_or_else(|| {
            DatabaseError::OperationFailed(format!("block {} has no hash", header.index))
        })?;

        let mut keys = Vec::with_capacity(block.transactions.len() + 3);
        let mut values = Vec::with_capacity(block.transactions.len() + 3);
        for tx in &block.transactions {
            keys.push(db_keys::tx_hash_to_db_key(&tx.hash));
            values.push(self.format.encode(tx)?);
        }
        keys.push(db_keys::header_hash_to_db_key(&hash));
        values.push(self.format.encode(&header)?);
        keys.push(db_keys::height_to_db_key(header.index));
        values.push(hash.0.to_vec());
        keys.push(db_keys::TOTAL_BLOCK_HEIGHT_KEY.to_vec());
        values.push(header.index.to_be_bytes().to_vec());

        self.db.batch_insert(&keys, &values).await?;
        self.header_cache.insert(hash, header).await;
        Ok(())
    }

    async fn get_block_header(&self, hash: &Hash) -> Result<Option<BlockHeader>> {
        if let Some(header) = self.header_cache.get(hash).await {
            return Ok(Some(header));
        }

        let Some(bytes) = self.db.get(&db_keys::header_hash_to_db_key(hash)).await? else {
            return Ok(None);
        };
        let header: BlockHeader = self.format.decode(&bytes)?;
        self.header_cache.insert(*hash, header.clone()).await;
        Ok(Some(header))
    }

    async fn get_block_header_by_height(&self, height: u32) -> Result<Option<BlockHeader>> {
        let Some(hash_bytes) = self.db.get(&db_keys::height_to_db_key(height)).await? else {
            return Ok(None);
        };
        if hash_bytes.len() != 32 {
            return Err(DatabaseError::Corruption(format!(
                "height index {} holds {} bytes",
                height,
                hash_bytes.len()
            ))
            .into());
        }
        self.get_block_header(&Hash::from_slice(&hash_bytes)).await
    }

    async fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>> {
        match self.db.get(&db_keys::tx_hash_to_db_key(hash)).await? {
            Some(bytes) => Ok(Some(self.format.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_total_block_height(&self) -> Result<Option<u32>> {
        self.get_height(db_keys::TOTAL_BLOCK_HEIGHT_KEY).await
    }

    async fn set_total_header_height(&self, height: u32) -> Result<()> {
        self.db
            .insert(db_keys::TOTAL_HEADER_HEIGHT_KEY, &height.to_be_bytes())
            .await?;
        Ok(())
    }

    async fn get_total_header_height(&self) -> Result<Option<u32>> {
        self.get_height(db_keys::TOTAL_HEADER_HEIGHT_KEY).await
    }
}
