pub mod config;
pub mod messages;
pub mod peer;

pub use config::NetworkConfig;
pub use messages::{InventoryPayload, InventoryType, Message, MAX_INVENTORY_HASHES};
pub use peer::{ChannelPeer, Peer};
