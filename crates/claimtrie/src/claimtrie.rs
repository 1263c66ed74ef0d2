//! The registry façade.
//!
//! A [`ClaimTrie`] accepts per-block commands, drives the node manager and
//! the merkle trie, and emits one root hash per appended block. Blocks
//! advance one height at a time; [`ClaimTrie::reset_height`] rewinds.
//!
//! All state mutation is single-threaded by design: command order within a
//! block and block order across heights are consensus inputs.

use std::collections::HashSet;

use tracing::{error, warn};

use crate::change::{Change, ChangeType};
use crate::config::Config;
use crate::error::{ClaimTrieError, Result};
use crate::hash::{self, Hash256, EMPTY_TRIE_HASH};
use crate::manager::{BaseManager, NormalizingManager};
use crate::node::Node;
use crate::normalization::normalize_if_necessary;
use crate::params::Params;
use crate::repo::{self, BlockRepo, ChainRepo, SledChangeRepo, TemporalRepo};
use crate::trie::{HashMode, MerkleTrie};
use crate::types::{ClaimId, OutPoint};

/// The consensus-critical naming registry.
pub struct ClaimTrie {
    params: Params,
    manager: NormalizingManager,
    trie: MerkleTrie,
    state_db: sled::Db,
    block_roots: BlockRepo,
    reported_roots: BlockRepo,
    temporal: TemporalRepo,
    chain: Option<ChainRepo>,
    raw_changes: Vec<Change>,
    height: i32,
    fail_on_hash_mismatch: bool,
    mismatch_logged: bool,
}

impl ClaimTrie {
    /// Open (or create) a registry under `config.data_dir`.
    ///
    /// When the stores already hold blocks, the trie view is rebuilt to
    /// the last appended height.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| ClaimTrieError::Repo(format!("create data dir: {e}")))?;

        let node_repo = SledChangeRepo::open(&config.nodes_dir())?;
        let state_db = repo::open_state_db(&config.state_dir())?;
        let block_roots = BlockRepo::computed(&state_db)?;
        let reported_roots = BlockRepo::reported(&state_db)?;
        let temporal = TemporalRepo::new(&state_db)?;
        let chain = if config.record_changes {
            Some(ChainRepo::new(&state_db)?)
        } else {
            None
        };

        let height = block_roots.max_height()?.unwrap_or(0);
        let manager = NormalizingManager::new(BaseManager::new(
            Box::new(node_repo),
            config.params.clone(),
            height,
        ));

        let mut ct = Self {
            trie: MerkleTrie::new(hash_mode(&config.params, height)),
            params: config.params,
            manager,
            state_db,
            block_roots,
            reported_roots,
            temporal,
            chain,
            raw_changes: Vec::new(),
            height,
            fail_on_hash_mismatch: config.fail_on_hash_mismatch,
            mismatch_logged: false,
        };
        if height > 0 {
            ct.rebuild_trie()?;
        }
        Ok(ct)
    }

    /// Current block height.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// The consensus parameters in effect.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Root hash of the current state.
    pub fn merkle_hash(&mut self) -> Hash256 {
        self.trie.merkle_hash()
    }

    /// The node for `name` at the current height (debugging/test access).
    pub fn node(&mut self, name: &[u8]) -> Result<Option<Node>> {
        self.manager.node(name)
    }

    /// Queue a new claim for the next block.
    pub fn add_claim(
        &mut self,
        name: &[u8],
        out_point: OutPoint,
        claim_id: ClaimId,
        amount: i64,
        value: &[u8],
    ) -> Result<()> {
        self.queue(
            Change::new(ChangeType::AddClaim)
                .with_name(name)
                .with_height(self.height + 1)
                .with_claim_id(claim_id)
                .with_out_point(out_point)
                .with_amount(amount)
                .with_value(value),
        )
    }

    /// Queue a claim update for the next block.
    pub fn update_claim(
        &mut self,
        name: &[u8],
        out_point: OutPoint,
        amount: i64,
        claim_id: ClaimId,
        value: &[u8],
    ) -> Result<()> {
        self.queue(
            Change::new(ChangeType::UpdateClaim)
                .with_name(name)
                .with_height(self.height + 1)
                .with_claim_id(claim_id)
                .with_out_point(out_point)
                .with_amount(amount)
                .with_value(value),
        )
    }

    /// Queue a claim spend for the next block.
    pub fn spend_claim(&mut self, name: &[u8], out_point: OutPoint, claim_id: ClaimId) -> Result<()> {
        self.queue(
            Change::new(ChangeType::SpendClaim)
                .with_name(name)
                .with_height(self.height + 1)
                .with_claim_id(claim_id)
                .with_out_point(out_point),
        )
    }

    /// Queue a new support for the next block.
    pub fn add_support(
        &mut self,
        name: &[u8],
        value: &[u8],
        out_point: OutPoint,
        amount: i64,
        supports_claim_id: ClaimId,
    ) -> Result<()> {
        self.queue(
            Change::new(ChangeType::AddSupport)
                .with_name(name)
                .with_height(self.height + 1)
                .with_claim_id(supports_claim_id)
                .with_out_point(out_point)
                .with_amount(amount)
                .with_value(value),
        )
    }

    /// Queue a support spend for the next block.
    pub fn spend_support(
        &mut self,
        name: &[u8],
        out_point: OutPoint,
        claim_id: ClaimId,
    ) -> Result<()> {
        self.queue(
            Change::new(ChangeType::SpendSupport)
                .with_name(name)
                .with_height(self.height + 1)
                .with_claim_id(claim_id)
                .with_out_point(out_point),
        )
    }

    fn queue(&mut self, chg: Change) -> Result<()> {
        if self.chain.is_some() {
            self.raw_changes.push(chg.clone());
        }
        self.manager.append_change(chg);
        Ok(())
    }

    /// Record the root the surrounding node expects at `height`.
    ///
    /// Consulted by [`ClaimTrie::append_block`] for diagnostics, and by
    /// replay to verify a recorded chain.
    pub fn report_hash(&mut self, height: i32, hash: Hash256) -> Result<()> {
        self.reported_roots.set(height, &hash)
    }

    /// Finalize the pending block: advance one height, flush its changes,
    /// recompute affected names, and commit to a new root.
    pub fn append_block(&mut self) -> Result<()> {
        let next = self.height + 1;

        if let Some(chain) = &self.chain {
            chain.save(next, &self.raw_changes)?;
        }
        self.raw_changes.clear();

        let mut names = self.manager.increment_height_to(next)?;
        self.height = next;

        // Names scheduled earlier for activation at this height need their
        // leaves recomputed even without new changes.
        names.extend(self.temporal.nodes_at(next)?);
        let names = dedup_names(names);

        if next == self.params.normalized_name_fork_height
            || next == self.params.all_claims_in_merkle_fork_height
        {
            self.rebuild_trie()?;
        } else {
            for name in &names {
                self.update_name(name)?;
            }
        }
        self.temporal.set_nodes_at(next, &names)?;

        let root = self.trie.merkle_hash();
        self.block_roots.set(next, &root)?;
        self.check_reported(next, &root)
    }

    /// Rewind to `height`. Afterwards the root equals the value it had
    /// just after the block at `height` was appended.
    pub fn reset_height(&mut self, height: i32) -> Result<()> {
        if height < 0 || height >= self.height {
            return Err(ClaimTrieError::Invariant(format!(
                "reset to {height} at height {}",
                self.height
            )));
        }

        let names = dedup_names(self.temporal.nodes_in_range(height, self.height)?);
        self.manager.decrement_height_to(&names, height)?;
        self.block_roots.delete_above(height)?;

        let expected = if height == 0 {
            EMPTY_TRIE_HASH
        } else {
            self.block_roots.get(height)?.ok_or_else(|| {
                ClaimTrieError::Invariant(format!("no stored root at height {height}"))
            })?
        };

        let crossed_normalization = height < self.params.normalized_name_fork_height
            && self.height >= self.params.normalized_name_fork_height;
        let crossed_all_claims = height < self.params.all_claims_in_merkle_fork_height
            && self.height >= self.params.all_claims_in_merkle_fork_height;
        self.height = height;

        if crossed_normalization || crossed_all_claims {
            self.rebuild_trie()?;
        } else {
            for name in &names {
                self.update_name(name)?;
            }
        }

        let root = self.trie.merkle_hash();
        if root != expected {
            warn!(height, computed = %root, expected = %expected, "rewound root differs, rebuilding trie");
            self.rebuild_trie()?;
            let root = self.trie.merkle_hash();
            if root != expected {
                return Err(ClaimTrieError::Invariant(format!(
                    "root mismatch after rewind to {height}: computed {root}, expected {expected}"
                )));
            }
        }
        Ok(())
    }

    /// Flush all stores to disk.
    pub fn flush(&self) -> Result<()> {
        self.manager.flush()?;
        self.state_db
            .flush()
            .map_err(|e| ClaimTrieError::Repo(format!("flush state: {e}")))?;
        Ok(())
    }

    /// Recompute one name's trie leaf and (re)schedule its next activation.
    fn update_name(&mut self, name: &[u8]) -> Result<()> {
        let (value, next_update) = self.name_value_hash(name)?;
        self.trie.update(name, value);
        if let Some(h) = next_update {
            if h > self.height {
                self.temporal.add_node_at(h, name)?;
            }
        }
        Ok(())
    }

    /// The trie leaf value for a name under the current hash mode, plus
    /// the node's next scheduled activation height.
    fn name_value_hash(&mut self, name: &[u8]) -> Result<(Option<Hash256>, Option<i32>)> {
        let Some(node) = self.manager.node(name)? else {
            return Ok((None, None));
        };
        let next_update = node.next_update();
        let value = match self.trie.mode() {
            HashMode::Legacy => self.manager.hash(name)?,
            HashMode::AllClaims => hash::merkle_root(&self.manager.claim_hashes(name)?),
        };
        Ok((value, next_update))
    }

    /// Rebuild the whole trie from the repository at the current height.
    ///
    /// Used at fork transitions (the key space or the hash algorithm
    /// changes wholesale) and when restoring a persisted registry.
    fn rebuild_trie(&mut self) -> Result<()> {
        self.trie = MerkleTrie::new(hash_mode(&self.params, self.height));

        let mut raw_names: Vec<Vec<u8>> = Vec::new();
        self.manager.iterate_names(&mut |name| {
            raw_names.push(name.to_vec());
            true
        })?;

        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for raw in raw_names {
            let key = normalize_if_necessary(
                &raw,
                self.height,
                self.params.normalized_name_fork_height,
            )
            .into_owned();
            if !seen.insert(key.clone()) {
                continue;
            }
            self.update_name(&key)?;
        }
        Ok(())
    }

    fn check_reported(&mut self, height: i32, root: &Hash256) -> Result<()> {
        let Some(expected) = self.reported_roots.get(height)? else {
            return Ok(());
        };
        if expected == *root {
            return Ok(());
        }
        if self.fail_on_hash_mismatch {
            return Err(ClaimTrieError::HashMismatch {
                height,
                computed: *root,
                expected,
            });
        }
        if !self.mismatch_logged {
            error!(height, computed = %root, expected = %expected, "merkle root mismatch");
            self.mismatch_logged = true;
        }
        Ok(())
    }
}

fn hash_mode(params: &Params, height: i32) -> HashMode {
    if height >= params.all_claims_in_merkle_fork_height {
        HashMode::AllClaims
    } else {
        HashMode::Legacy
    }
}

fn dedup_names(names: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    names.into_iter().filter(|n| seen.insert(n.clone())).collect()
}
