pub mod payloads;

pub use payloads::{
    BlockHeadersPayload, GetBlockHeadersPayload, InventoryPayload, InventoryType, VersionPayload,
    MAX_HEADERS_PER_MESSAGE, MAX_INVENTORY_HASHES,
};

use sable_common::types::Block;
use serde::{Deserialize, Serialize};

/// Messages exchanged with peers during chain sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// Handshake, carries the peer's advertised height.
    Version(VersionPayload),

    /// Batch of headers answering `GetBlockHeaders`.
    BlockHeaders(BlockHeadersPayload),

    /// Ask for headers following a known hash.
    GetBlockHeaders(GetBlockHeadersPayload),

    /// Ask for inventory bodies by hash.
    GetData(InventoryPayload),

    /// A block body. Peers may send an empty body.
    Block(Option<Block>),
}

impl Message {
    /// Command name used in logs.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::BlockHeaders(_) => "headers",
            Message::GetBlockHeaders(_) => "getheaders",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
        }
    }
}
