//! Claims and supports held by a name node.

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::types::{ClaimId, OutPoint, Status};

/// A bid on a name, or a support backing one.
///
/// Supports reuse this struct; their `claim_id` references the supported
/// claim (by identity only, never by pointer), and a support can never
/// become the best claim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Identity, stable across updates.
    pub claim_id: ClaimId,
    /// Output currently carrying the claim.
    pub out_point: OutPoint,
    /// Amount in base units.
    pub amount: i64,
    /// Opaque value payload.
    pub value: Vec<u8>,
    /// Height the claim was accepted at.
    pub accepted_at: i32,
    /// Height the claim activates (or activated) at.
    pub active_at: i32,
    /// Lifecycle state.
    pub status: Status,
}

impl Claim {
    /// Commitment hash of a claim at a given takeover height:
    /// `sha256d( sha256d(txid) ‖ sha256d(ascii(index)) ‖ sha256d(u64_be(takeover)) )`.
    pub fn commitment_hash(out_point: &OutPoint, taken_over_at: i32) -> Hash256 {
        let tx_hash = Hash256::sha256d(out_point.txid.as_bytes());
        let index_hash = Hash256::sha256d(out_point.index.to_string().as_bytes());
        let takeover_hash = Hash256::sha256d(&(taken_over_at as u64).to_be_bytes());

        let mut buf = Vec::with_capacity(3 * Hash256::SIZE);
        buf.extend_from_slice(tx_hash.as_bytes());
        buf.extend_from_slice(index_hash.as_bytes());
        buf.extend_from_slice(takeover_hash.as_bytes());
        Hash256::sha256d(&buf)
    }
}
