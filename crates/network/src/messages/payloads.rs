use sable_common::error::NetworkError;
use sable_common::types::{BlockHeader, Hash};
use serde::{Deserialize, Serialize};

/// Upper bound on hashes carried by one inventory message.
pub const MAX_INVENTORY_HASHES: usize = 500;

/// Upper bound on headers carried by one headers message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VersionPayload {
    pub version: u32,
    pub services: u64,
    pub timestamp: u32,
    pub port: u16,
    pub nonce: u32,
    pub user_agent: String,
    /// Index of the peer's last committed block.
    pub current_block_index: u32,
    pub relay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BlockHeadersPayload {
    pub headers: Vec<BlockHeader>,
}

impl BlockHeadersPayload {
    pub fn new(headers: Vec<BlockHeader>) -> Self {
        Self { headers }
    }
}

/// Requests headers after `hash_start`, up to `hash_stop` or the peer's
/// per-message limit when `hash_stop` is zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetBlockHeadersPayload {
    pub hash_start: Vec<Hash>,
    pub hash_stop: Hash,
}

impl GetBlockHeadersPayload {
    pub fn new(hash_start: Hash) -> Self {
        Self { hash_start: vec![hash_start], hash_stop: Hash::ZERO }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InventoryType {
    Transaction,
    Block,
    Consensus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryPayload {
    pub kind: InventoryType,
    pub hashes: Vec<Hash>,
}

impl InventoryPayload {
    pub fn new(kind: InventoryType, hashes: Vec<Hash>) -> Result<Self, NetworkError> {
        let payload = Self { kind, hashes };
        payload.validate()?;
        Ok(payload)
    }

    pub fn blocks(hashes: Vec<Hash>) -> Result<Self, NetworkError> {
        Self::new(InventoryType::Block, hashes)
    }

    fn validate(&self) -> Result<(), NetworkError> {
        if self.hashes.len() > MAX_INVENTORY_HASHES {
            return Err(NetworkError::Protocol(format!(
                "inventory carries {} hashes, limit is {}",
                self.hashes.len(),
                MAX_INVENTORY_HASHES
            )));
        }
        Ok(())
    }
}
