use anyhow::Result;
use async_trait::async_trait;

/// Byte-oriented key-value store the repository is built on.
#[async_trait]
pub trait DBInterface: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Writes every pair or none of them.
    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()>;
}
