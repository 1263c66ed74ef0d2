//! Double-SHA256 hashing primitives and merkle helpers.
//!
//! Every commitment in the registry is a 32-byte double-SHA256 value.
//! Hashes display in reversed byte order, matching the way the chain
//! reports them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ClaimTrieError, Result};

/// A 256-bit (32-byte) hash value.
///
/// The wrapped bytes are in internal order; [`Display`](std::fmt::Display)
/// and [`Hash256::from_hex`] use the reversed legacy order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

/// Merkle hash of an empty trie, `0000…0001` in display order.
pub const EMPTY_TRIE_HASH: Hash256 = Hash256::sentinel(1);

/// Stand-in child root for a trie vertex with no children, `0000…0002`.
pub const NO_CHILDREN_HASH: Hash256 = Hash256::sentinel(2);

/// Stand-in claims root for a trie vertex with no claims, `0000…0003`.
pub const NO_CLAIMS_HASH: Hash256 = Hash256::sentinel(3);

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    const fn sentinel(tag: u8) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        Self(bytes)
    }

    /// Create a Hash256 from raw bytes in internal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ClaimTrieError::InvalidInput(format!(
                "hash must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Create a Hash256 from a fixed array in internal order.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a byte slice in internal order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Double SHA-256 of the input.
    pub fn sha256d(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&second);
        Self(arr)
    }

    /// Format as reversed-byte hex (legacy display order).
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse from reversed-byte hex.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| ClaimTrieError::InvalidInput(format!("invalid hash hex: {e}")))?;
        let mut hash = Self::from_bytes(&raw)?;
        hash.0.reverse();
        Ok(hash)
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash two merkle branches together: `sha256d(left ‖ right)`.
pub fn merkle_branches(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    Hash256::sha256d(&buf)
}

/// Compute a merkle root over the given leaves.
///
/// Odd-length levels duplicate their last element, the chain's pairing
/// rule. Returns `None` for an empty slice.
pub fn merkle_root(hashes: &[Hash256]) -> Option<Hash256> {
    if hashes.is_empty() {
        return None;
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        level = level
            .chunks(2)
            .map(|pair| merkle_branches(&pair[0], &pair[1]))
            .collect();
    }
    Some(level[0])
}
