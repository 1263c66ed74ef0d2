//! Ingest adapter: classified transaction outputs → registry commands.
//!
//! The script decoder, UTXO view, and transaction iteration live outside
//! the core. Callers classify each relevant input/output and hand it
//! here; one [`TxIngest`] spans one transaction, and within it every
//! spent input must be fed before any created output. That ordering is
//! what lets an update find the claim its input just spent.

use std::collections::HashMap;

use tracing::warn;

use crate::claimtrie::ClaimTrie;
use crate::error::{ClaimTrieError, Result};
use crate::normalization::normalize_if_necessary;
use crate::types::{ClaimId, OutPoint};

/// Claim-script opcode of a classified output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimScriptOp {
    /// `OP_CLAIMNAME`: create a claim; identity derives from the outpoint.
    ClaimName,
    /// `OP_SUPPORTCLAIM`: support the claim named in the script.
    SupportClaim,
    /// `OP_UPDATECLAIM`: move an existing claim to a new output.
    UpdateClaim,
}

/// An output (or spent input's previous output) already classified by the
/// external script decoder.
#[derive(Clone, Debug)]
pub struct ClassifiedScript {
    /// Which claim opcode the script carried.
    pub op: ClaimScriptOp,
    /// The name named by the script.
    pub name: Vec<u8>,
    /// Claim identity carried by update and support scripts.
    pub claim_id: Option<ClaimId>,
    /// Value payload.
    pub value: Vec<u8>,
}

/// Per-transaction command translation with the spent-claim gate.
pub struct TxIngest<'a> {
    trie: &'a mut ClaimTrie,
    spent: HashMap<ClaimId, Vec<u8>>,
}

impl<'a> TxIngest<'a> {
    /// Start translating one transaction against `trie`.
    pub fn new(trie: &'a mut ClaimTrie) -> Self {
        Self {
            trie,
            spent: HashMap::new(),
        }
    }

    fn normalized_now(&self, name: &[u8]) -> Vec<u8> {
        normalize_if_necessary(
            name,
            self.trie.height(),
            self.trie.params().normalized_name_fork_height,
        )
        .into_owned()
    }

    /// Feed one spent input whose previous output carried a claim script.
    pub fn spend_input(&mut self, out_point: OutPoint, script: &ClassifiedScript) -> Result<()> {
        match script.op {
            ClaimScriptOp::ClaimName => {
                let id = ClaimId::from_outpoint(&out_point);
                self.spent.insert(id, self.normalized_now(&script.name));
                self.trie.spend_claim(&script.name, out_point, id)
            }
            ClaimScriptOp::UpdateClaim => {
                let id = required_id(script)?;
                self.spent.insert(id, self.normalized_now(&script.name));
                self.trie.spend_claim(&script.name, out_point, id)
            }
            ClaimScriptOp::SupportClaim => {
                let id = required_id(script)?;
                self.trie.spend_support(&script.name, out_point, id)
            }
        }
    }

    /// Feed one created output carrying a claim script.
    ///
    /// Updates only go through when this transaction spent the same claim
    /// under the same (normalized) name; anything else is logged and
    /// dropped, matching the original validation gap.
    pub fn add_output(
        &mut self,
        out_point: OutPoint,
        amount: i64,
        script: &ClassifiedScript,
    ) -> Result<()> {
        match script.op {
            ClaimScriptOp::ClaimName => {
                let id = ClaimId::from_outpoint(&out_point);
                self.trie
                    .add_claim(&script.name, out_point, id, amount, &script.value)
            }
            ClaimScriptOp::SupportClaim => {
                let id = required_id(script)?;
                self.trie
                    .add_support(&script.name, &script.value, out_point, amount, id)
            }
            ClaimScriptOp::UpdateClaim => {
                let id = required_id(script)?;
                let normalized = self.normalized_now(&script.name);
                if self.spent.get(&id) != Some(&normalized) {
                    warn!(
                        name = %String::from_utf8_lossy(&normalized),
                        claim_id = %id,
                        "invalid update operation: name or id mismatch",
                    );
                    return Ok(());
                }
                self.spent.remove(&id);
                self.trie
                    .update_claim(&script.name, out_point, amount, id, &script.value)
            }
        }
    }
}

fn required_id(script: &ClassifiedScript) -> Result<ClaimId> {
    script.claim_id.ok_or_else(|| {
        ClaimTrieError::InvalidInput(format!(
            "{:?} script without a claim id",
            script.op
        ))
    })
}
