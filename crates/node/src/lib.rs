pub mod config;
pub mod logging;
pub mod metrics_server;
pub mod service;
pub mod syncer;

pub use config::NodeConfig;
pub use logging::LoggingConfig;
pub use metrics_server::{MetricsConfig, MetricsServer};
pub use service::{Inbound, NodeStatus, SableNode};
pub use syncer::{HeaderSyncCoordinator, SyncReport};
