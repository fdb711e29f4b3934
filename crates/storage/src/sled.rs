use anyhow::{Context, Result};
use async_trait::async_trait;
use sable_common::traits::DBInterface;
use sled::{Batch, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const CHAIN_TREE: &str = "chain";

pub struct SledDB {
    db: sled::Db,
    tree: Arc<Tree>,
}

impl SledDB {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).context("Failed to open Sled database")?;
        debug!(path = %path.as_ref().display(), "Opened sled database");
        Self::from_db(db)
    }

    /// Create a new SledDB instance from an existing sled::Db
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(CHAIN_TREE).context("Failed to open chain tree")?;
        Ok(Self { db, tree: Arc::new(tree) })
    }

    /// Flushes dirty pages to disk.
    pub async fn flush(&self) -> Result<usize> {
        self.db.flush_async().await.context("Failed to flush SledDB")
    }
}

#[async_trait]
impl DBInterface for SledDB {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree.clone();
        let key = key.to_vec();

        tokio::task::spawn_blocking(move || {
            tree.get(&key)
                .map(|v| v.map(|ivec| ivec.to_vec()))
                .map_err(|e| anyhow::anyhow!("Failed to get from SledDB: {}", e))
        })
        .await?
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tree = self.tree.clone();
        let key = key.to_vec();
        let value = value.to_vec();

        tokio::task::spawn_blocking(move || {
            tree.insert(key, value)
                .map(|_| ())
                .map_err(|e| anyhow::anyhow!("Failed to insert into SledDB: {}", e))
        })
        .await?
    }

    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            anyhow::bail!("Batch insert failed: Key/Value length mismatch");
        }

        let mut batch = Batch::default();
        for (key, value) in keys.iter().zip(values.iter()) {
            batch.insert(key.as_slice(), value.as_slice());
        }

        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || {
            tree.apply_batch(batch)
                .map_err(|e| anyhow::anyhow!("Failed to apply batch to SledDB: {}", e))
        })
        .await?
    }
}
