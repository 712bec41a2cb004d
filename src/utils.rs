// src/utils.rs
// Small helpers shared by the log retriever and the domain modules.

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use crate::error::{Error, Result};

/// Splits `[from_block, to_block]` into inclusive `(start, end)` windows of at
/// most `chunk_size` blocks. Returns nothing for an empty range or a zero size.
pub fn create_block_chunks(from_block: u64, to_block: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    if chunk_size == 0 {
        return chunks;
    }
    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = current_from.saturating_add(chunk_size - 1).min(to_block);
        chunks.push((current_from, current_to));
        match current_to.checked_add(1) {
            Some(next) => current_from = next,
            None => break,
        }
    }
    chunks
}

/// Left-pads an address into a 32-byte topic.
pub fn address_to_topic(address: Address) -> H256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address.as_bytes());
    H256::from(topic)
}

/// Reads the address held in the low 20 bytes of an indexed topic.
pub fn topic_to_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

/// Topic for an indexed `string` parameter: the keccak of its bytes.
pub fn string_topic(value: &str) -> H256 {
    H256::from(keccak256(value.as_bytes()))
}

/// Indexed topic `position` of a log, or a decode error naming `what`.
pub fn topic_at(topics: &[H256], position: usize, what: &str) -> Result<H256> {
    topics
        .get(position)
        .copied()
        .ok_or_else(|| Error::decode(what, format!("log has no topic {}", position)))
}

/// Narrow a `uint256` to `u64`, failing on overflow.
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(Error::decode(what, format!("{} does not fit in u64", value)));
    }
    Ok(value.as_u64())
}
