//! Primitive value types: claim identifiers, outpoints, claim status.

use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{ClaimTrieError, Result};
use crate::hash::Hash256;

/// A 20-byte claim identifier.
///
/// Derived once from the creating output and preserved across updates:
/// `RIPEMD160(SHA256(txid ‖ index_be32))`. Displays as reversed-byte hex
/// and persists as that hex string so stored records stay readable across
/// versions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimId([u8; 20]);

impl ClaimId {
    /// Identifier size in bytes.
    pub const SIZE: usize = 20;

    /// Derive the identifier for a claim created at `out_point`.
    pub fn from_outpoint(out_point: &OutPoint) -> Self {
        let mut buf = [0u8; Hash256::SIZE + 4];
        buf[..Hash256::SIZE].copy_from_slice(out_point.txid.as_bytes());
        buf[Hash256::SIZE..].copy_from_slice(&out_point.index.to_be_bytes());

        let sha = Sha256::digest(buf);
        let ripe = Ripemd160::digest(sha);

        let mut id = [0u8; Self::SIZE];
        id.copy_from_slice(&ripe);
        Self(id)
    }

    /// Create from raw bytes in internal order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ClaimTrieError::InvalidInput(format!(
                "claim id must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut id = [0u8; Self::SIZE];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// The raw bytes in internal order.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Format as reversed-byte hex (legacy display order).
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse from reversed-byte hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| ClaimTrieError::InvalidInput(format!("invalid claim id hex: {e}")))?;
        let mut id = Self::from_bytes(&raw)?;
        id.0.reverse();
        Ok(id)
    }
}

impl std::fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClaimId({})", self.to_hex())
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Persisted records carry the hex string, not raw bytes.
impl Serialize for ClaimId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ClaimId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ClaimId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A reference to a transaction output: `(txid, index)`.
///
/// Globally unique per output. Displays and persists as
/// `"{txid_hex}:{index}"`. Ordering is lexicographic on the txid's
/// internal bytes, then the index — the tie-break order used by best-claim
/// selection.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction id in internal byte order.
    pub txid: Hash256,
    /// Output index within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// Create an outpoint.
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// Parse from the `"{txid_hex}:{index}"` string form.
    pub fn from_string(s: &str) -> Result<Self> {
        let (txid, index) = s
            .rsplit_once(':')
            .ok_or_else(|| ClaimTrieError::InvalidInput(format!("invalid outpoint: {s}")))?;
        Ok(Self {
            txid: Hash256::from_hex(txid)?,
            index: index
                .parse()
                .map_err(|e| ClaimTrieError::InvalidInput(format!("invalid outpoint index: {e}")))?,
        })
    }
}

impl std::fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutPoint({self})")
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl Serialize for OutPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OutPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OutPoint::from_string(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a claim or support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Accepted into the node but not yet bidding.
    Accepted,
    /// Active: counts toward (and may be) the best claim.
    Activated,
    /// Spent; removed at the next height adjustment.
    Deactivated,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Accepted => write!(f, "Accepted"),
            Status::Activated => write!(f, "Activated"),
            Status::Deactivated => write!(f, "Deactivated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(tag: u8, index: u32) -> OutPoint {
        OutPoint::new(Hash256::sha256d(&[tag]), index)
    }

    #[test]
    fn test_claim_id_is_deterministic() {
        let a = ClaimId::from_outpoint(&op(1, 0));
        let b = ClaimId::from_outpoint(&op(1, 0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_claim_id_depends_on_index() {
        let a = ClaimId::from_outpoint(&op(1, 0));
        let b = ClaimId::from_outpoint(&op(1, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_claim_id_hex_roundtrip() {
        let id = ClaimId::from_outpoint(&op(7, 3));
        assert_eq!(id.to_hex().len(), 40);
        assert_eq!(ClaimId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_outpoint_string_roundtrip() {
        let o = op(2, 11);
        let parsed = OutPoint::from_string(&o.to_string()).unwrap();
        assert_eq!(o, parsed);
    }

    #[test]
    fn test_outpoint_string_rejects_garbage() {
        assert!(OutPoint::from_string("deadbeef").is_err());
        assert!(OutPoint::from_string("zz:1").is_err());
        assert!(OutPoint::from_string(
            "0000000000000000000000000000000000000000000000000000000000000000:x"
        )
        .is_err());
    }

    #[test]
    fn test_outpoint_ordering_txid_before_index() {
        let low = OutPoint::new(Hash256::from_raw([0u8; 32]), 9);
        let high = OutPoint::new(Hash256::from_raw([1u8; 32]), 0);
        assert!(low < high);

        let a = OutPoint::new(Hash256::from_raw([1u8; 32]), 0);
        let b = OutPoint::new(Hash256::from_raw([1u8; 32]), 1);
        assert!(a < b);
    }

    #[test]
    fn test_zero_outpoint_string_form() {
        let o = OutPoint::default();
        assert_eq!(
            o.to_string(),
            "0000000000000000000000000000000000000000000000000000000000000000:0"
        );
    }
}
