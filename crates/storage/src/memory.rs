use anyhow::Result;
use async_trait::async_trait;
use sable_common::traits::DBInterface;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Ephemeral store for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemoryDB {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDB {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DBInterface for MemoryDB {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            anyhow::bail!("Batch insert failed: Key/Value length mismatch");
        }
        let mut guard = self.inner.write().await;
        for (key, value) in keys.iter().zip(values.iter()) {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
