//! Change records: the append-only per-name command stream.
//!
//! A node's entire history is the ordered list of its change records.
//! Records persist as a raw concatenation of msgpack maps; claim ids and
//! outpoints encode as their string forms so stored streams remain
//! readable across versions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClaimTrieError, Result};
use crate::types::{ClaimId, OutPoint};

/// The kind of command a change record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    /// A new claim on a name.
    AddClaim,
    /// Spend of an existing claim's outpoint.
    SpendClaim,
    /// Replacement of a claim's outpoint/amount/value, same identity.
    UpdateClaim,
    /// A new support for a claim.
    AddSupport,
    /// Spend of an existing support's outpoint.
    SpendSupport,
}

impl ChangeType {
    /// Wire tag of this change type.
    pub fn as_u8(self) -> u8 {
        match self {
            ChangeType::AddClaim => 0,
            ChangeType::SpendClaim => 1,
            ChangeType::UpdateClaim => 2,
            ChangeType::AddSupport => 3,
            ChangeType::SpendSupport => 4,
        }
    }

    /// Decode a wire tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => ChangeType::AddClaim,
            1 => ChangeType::SpendClaim,
            2 => ChangeType::UpdateClaim,
            3 => ChangeType::AddSupport,
            4 => ChangeType::SpendSupport,
            _ => {
                return Err(ClaimTrieError::Decode(format!(
                    "unknown change type tag {tag}"
                )))
            }
        })
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChangeType::AddClaim => "AddClaim",
            ChangeType::SpendClaim => "SpendClaim",
            ChangeType::UpdateClaim => "UpdateClaim",
            ChangeType::AddSupport => "AddSupport",
            ChangeType::SpendSupport => "SpendSupport",
        };
        write!(f, "{name}")
    }
}

impl Serialize for ChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ChangeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = u8::deserialize(deserializer)?;
        ChangeType::from_u8(tag).map_err(serde::de::Error::custom)
    }
}

/// One command against one name at one height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Command kind.
    pub change_type: ChangeType,
    /// Raw or normalized name bytes, depending on the recording height.
    pub name: Vec<u8>,
    /// Block height the command takes effect at.
    pub height: i32,
    /// Claim identity (for supports: the supported claim's identity).
    pub claim_id: ClaimId,
    /// The output carrying the command.
    pub out_point: OutPoint,
    /// Amount in base units.
    pub amount: i64,
    /// Opaque value payload.
    pub value: Vec<u8>,
    /// Pre-computed activation height, when the command carries one.
    pub active_height: Option<i32>,
}

impl Change {
    /// Create an empty change of the given kind.
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            name: Vec::new(),
            height: 0,
            claim_id: ClaimId::default(),
            out_point: OutPoint::default(),
            amount: 0,
            value: Vec::new(),
            active_height: None,
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    /// Set the effective height.
    pub fn with_height(mut self, height: i32) -> Self {
        self.height = height;
        self
    }

    /// Set the claim id.
    pub fn with_claim_id(mut self, claim_id: ClaimId) -> Self {
        self.claim_id = claim_id;
        self
    }

    /// Set the outpoint.
    pub fn with_out_point(mut self, out_point: OutPoint) -> Self {
        self.out_point = out_point;
        self
    }

    /// Set the amount.
    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = amount;
        self
    }

    /// Set the value payload.
    pub fn with_value(mut self, value: &[u8]) -> Self {
        self.value = value.to_vec();
        self
    }

    /// Set a pre-computed activation height.
    pub fn with_active_height(mut self, height: i32) -> Self {
        self.active_height = Some(height);
        self
    }
}

/// Append one encoded record to a stream buffer.
pub fn append_encoded(buf: &mut Vec<u8>, change: &Change) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(change)
        .map_err(|e| ClaimTrieError::Encode(format!("msgpack marshal change: {e}")))?;
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Encode a list of records as one concatenated stream.
pub fn encode_changes(changes: &[Change]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for change in changes {
        append_encoded(&mut buf, change)?;
    }
    Ok(buf)
}

/// Decode a concatenated stream back into records.
///
/// The result is stable-sorted by height: batches may interleave heights
/// for the same name (the normalization fork does), and replay requires
/// non-decreasing order.
pub fn decode_changes(data: &[u8]) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    let mut cursor = std::io::Cursor::new(data);
    while (cursor.position() as usize) < data.len() {
        let change: Change = rmp_serde::decode::from_read(&mut cursor)
            .map_err(|e| ClaimTrieError::Decode(format!("msgpack unmarshal change: {e}")))?;
        changes.push(change);
    }
    changes.sort_by_key(|c| c.height);
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash256;

    fn sample(height: i32) -> Change {
        let op = OutPoint::new(Hash256::sha256d(&[height as u8]), 2);
        Change::new(ChangeType::AddClaim)
            .with_name(b"sample")
            .with_height(height)
            .with_claim_id(ClaimId::from_outpoint(&op))
            .with_out_point(op)
            .with_amount(42)
            .with_value(b"payload")
    }

    #[test]
    fn test_stream_roundtrip() {
        let changes = vec![sample(1), sample(2), sample(3)];
        let encoded = encode_changes(&changes).unwrap();
        let decoded = decode_changes(&encoded).unwrap();
        assert_eq!(changes, decoded);
    }

    #[test]
    fn test_decode_sorts_by_height_stably() {
        let a = sample(5).with_amount(1);
        let b = sample(2);
        let c = sample(5).with_amount(2);
        let encoded = encode_changes(&[a.clone(), b.clone(), c.clone()]).unwrap();

        let decoded = decode_changes(&encoded).unwrap();
        assert_eq!(decoded, vec![b, a, c]);
    }

    #[test]
    fn test_decode_empty_stream() {
        assert!(decode_changes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let encoded = encode_changes(&[sample(1)]).unwrap();
        assert!(decode_changes(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_active_height_survives_roundtrip() {
        let chg = sample(4).with_active_height(9);
        let decoded = decode_changes(&encode_changes(&[chg.clone()]).unwrap()).unwrap();
        assert_eq!(decoded[0].active_height, Some(9));
    }

    #[test]
    fn test_change_type_tags_are_stable() {
        for (tag, ct) in [
            ChangeType::AddClaim,
            ChangeType::SpendClaim,
            ChangeType::UpdateClaim,
            ChangeType::AddSupport,
            ChangeType::SpendSupport,
        ]
        .into_iter()
        .enumerate()
        {
            assert_eq!(ct.as_u8() as usize, tag);
            assert_eq!(ChangeType::from_u8(tag as u8).unwrap(), ct);
        }
        assert!(ChangeType::from_u8(9).is_err());
    }
}
