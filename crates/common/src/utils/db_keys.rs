use crate::types::Hash;

const HEADER_PREFIX: &[u8] = b"header#";
const HEIGHT_PREFIX: &[u8] = b"height#";
const TX_PREFIX: &[u8] = b"tx#";

pub const TOTAL_BLOCK_HEIGHT_KEY: &[u8] = b"meta#block_height";
pub const TOTAL_HEADER_HEIGHT_KEY: &[u8] = b"meta#header_height";

pub fn header_hash_to_db_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(HEADER_PREFIX.len() + hash.0.len());
    key.extend_from_slice(HEADER_PREFIX);
    key.extend_from_slice(&hash.0);
    key
}

/// Big-endian so keys sort by height.
pub fn height_to_db_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(HEIGHT_PREFIX.len() + 4);
    key.extend_from_slice(HEIGHT_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

pub fn tx_hash_to_db_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(TX_PREFIX.len() + hash.0.len());
    key.extend_from_slice(TX_PREFIX);
    key.extend_from_slice(&hash.0);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_keys_sort_numerically() {
        assert!(height_to_db_key(9) < height_to_db_key(10));
        assert!(height_to_db_key(255) < height_to_db_key(256));
    }

    #[test]
    fn test_prefixes_do_not_collide() {
        let hash = Hash([7u8; 32]);
        assert_ne!(header_hash_to_db_key(&hash), tx_hash_to_db_key(&hash));
    }
}
