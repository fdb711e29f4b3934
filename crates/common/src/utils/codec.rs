use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// On-disk encoding for stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Human readable, the default.
    #[default]
    Json,
    /// Compact bincode.
    Binary,
}

/// Serialize any serde-compatible type to JSON bytes.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| anyhow::anyhow!("Serialization failed: {}", e))
}

/// Deserialize JSON bytes to a type.
pub fn deserialize<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| anyhow::anyhow!("Deserialization failed: {}", e))
}

impl StorageFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            StorageFormat::Json => serialize(value),
            StorageFormat::Binary => bincode::serialize(value)
                .map_err(|e| anyhow::anyhow!("Binary serialization failed: {}", e)),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            StorageFormat::Json => deserialize(bytes),
            StorageFormat::Binary => bincode::deserialize(bytes)
                .map_err(|e| anyhow::anyhow!("Binary deserialization failed: {}", e)),
        }
    }
}
