use crate::logging::LoggingConfig;
use crate::metrics_server::MetricsConfig;
use sable_common::utils::codec::StorageFormat;
use sable_core::config::ProcessorConfig;
use sable_network::config::NetworkConfig;
use sable_network::messages::MAX_HEADERS_PER_MESSAGE;
use sable_network::MAX_INVENTORY_HASHES;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    /// Nothing survives a restart.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub format: StorageFormat,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StorageBackend::default(),
            format: StorageFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Hashes per body request. Clamped to the protocol inventory limit.
    #[serde(default = "default_max_blocks_per_request")]
    pub max_blocks_per_request: usize,

    /// Heights above the committed tip scanned for missing bodies per cycle.
    #[serde(default = "default_request_window")]
    pub request_window: u32,
}

fn default_max_blocks_per_request() -> usize {
    MAX_INVENTORY_HASHES
}

fn default_request_window() -> u32 {
    MAX_HEADERS_PER_MESSAGE as u32
}

impl SyncConfig {
    pub fn chunk_size(&self) -> usize {
        self.max_blocks_per_request.clamp(1, MAX_INVENTORY_HASHES)
    }

    pub fn request_window(&self) -> u32 {
        self.request_window.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_request: default_max_blocks_per_request(),
            request_window: default_request_window(),
        }
    }
}
