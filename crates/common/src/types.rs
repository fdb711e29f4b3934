use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_LENGTH: usize = 32;
pub const ADDRESS_LENGTH: usize = 20;

// --- NewTypes ---

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl Hash {
    /// All-zero sentinel. Never a valid block identity.
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; HASH_LENGTH];
        let len = bytes.len().min(HASH_LENGTH);
        arr[..len].copy_from_slice(&bytes[..len]);
        Hash(arr)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Double SHA-256 of `data`.
    pub fn digest(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Hash::from_slice(&second)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut arr = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut arr)?;
        Ok(Hash(arr))
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(serde::de::Error::custom("Invalid address length"));
        }
        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

// --- Domain Structs ---

/// What a stored header stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HeaderKind {
    /// Header-first sync stored it; the body has not been committed yet.
    #[default]
    Header,
    /// Header of a block whose body has been committed.
    Extended,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Transaction {
    pub hash: Hash,
    #[serde(with = "hex_serde")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub timestamp: u32,
    pub index: u32,
    pub consensus_data: u64,
    pub next_consensus: Address,
    pub kind: HeaderKind,
    #[serde(default)]
    pub transaction_hashes: Vec<Hash>,
    /// Set by `sign`. Peers may send headers without it.
    pub hash: Option<Hash>,
}

impl BlockHeader {
    /// Hash over the signed header fields. Kind, transaction list and the
    /// cached hash itself are not part of the preimage.
    pub fn compute_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(4 + HASH_LENGTH + 4 + 4 + 8 + ADDRESS_LENGTH);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash.0);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.consensus_data.to_le_bytes());
        buf.extend_from_slice(&self.next_consensus.0);
        Hash::digest(&buf)
    }

    pub fn sign(&mut self) -> Hash {
        let hash = self.compute_hash();
        self.hash = Some(hash);
        hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn hash(&self) -> Option<Hash> {
        self.header.hash
    }

    /// Fills the transaction hash list and the block hash.
    pub fn sign(&mut self) -> Hash {
        self.header.transaction_hashes = self.transactions.iter().map(|tx| tx.hash).collect();
        self.header.sign()
    }

    /// Header stored for a committed block.
    pub fn to_extended_header(&self) -> BlockHeader {
        let mut header = self.header.clone();
        header.kind = HeaderKind::Extended;
        header.transaction_hashes = self.transactions.iter().map(|tx| tx.hash).collect();
        header
    }
}

// --- Helper Modules for Serde ---

mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
