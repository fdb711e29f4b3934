use anyhow::Result;
use sable_common::utils::config::load_config;
use sable_node::NodeConfig;
use std::path::{Path, PathBuf};

pub fn load_node_config<P: AsRef<Path>>(path: P, data_dir_override: Option<PathBuf>) -> Result<NodeConfig> {
    let mut config: NodeConfig = load_config(path)?;

    if let Some(dd) = data_dir_override {
        config.storage.data_dir = dd;
    }

    Ok(config)
}
