//! Hash slot calculation.
//!
//! Cluster keyspace partitioning uses CRC-16/XMODEM (polynomial `0x1021`,
//! initial value 0, no reflection, no final XOR) modulo 16384. When a key
//! contains a non-empty `{...}` section, only the bytes between the first
//! `{` and the next `}` are hashed, so related keys can be forced onto one
//! slot.

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a key.
///
/// Keys are raw bytes; the hash-tag rule applies before hashing. The empty
/// key maps to slot 0.
///
/// # Examples
///
/// ```
/// use shoal::key_slot;
///
/// assert_eq!(key_slot(b"foo"), 12182);
/// assert_eq!(key_slot(b"{user1000}.following"), key_slot(b"{user1000}.followers"));
/// ```
pub fn key_slot(key: &[u8]) -> u16 {
    if key.is_empty() {
        return 0;
    }
    CRC16.checksum(extract_hash_tag(key)) % SLOT_COUNT
}

/// The bytes between the first `{` and the next `}`, when non-empty;
/// otherwise the whole key.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') else {
        return key;
    };
    if len == 0 {
        return key;
    }
    &key[open + 1..open + 1 + len]
}
