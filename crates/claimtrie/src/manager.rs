//! Replay engine: turns persisted change streams into [`Node`]s at a
//! height, with caching, activation-delay calculation, and the
//! normalization fork.
//!
//! [`BaseManager`] works on raw names. [`NormalizingManager`] wraps it and
//! rewrites names through the normalizer from the fork height onward,
//! replaying merged histories under their new identities.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::change::{Change, ChangeType};
use crate::claim::Claim;
use crate::error::{ClaimTrieError, Result};
use crate::hash::Hash256;
use crate::node::Node;
use crate::normalization::{normalize, normalize_if_necessary};
use crate::params::{self, Params, DELAY_WORKAROUNDS_PART2_MAX_HEIGHT};
use crate::repo::ChangeRepo;
use crate::types::Status;

/// Replays change streams into nodes at the current height.
pub struct BaseManager {
    repo: Box<dyn ChangeRepo>,
    params: Params,
    height: i32,
    cache: HashMap<Vec<u8>, Node>,
    changes: Vec<Change>,
}

impl BaseManager {
    /// Create a manager over `repo`, starting at `height`.
    pub fn new(repo: Box<dyn ChangeRepo>, params: Params, height: i32) -> Self {
        Self {
            repo,
            params,
            height,
            cache: HashMap::new(),
            changes: Vec::new(),
        }
    }

    /// Current height.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// The consensus parameters in effect.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Queue a change for the next block.
    ///
    /// The first change after a flush doubles as the block-complete signal:
    /// that is when an oversized cache gets cleared wholesale.
    pub fn append_change(&mut self, chg: Change) {
        if self.changes.is_empty() && self.cache.len() > self.params.max_node_manager_cache_size {
            debug!(height = self.height, "clearing node manager cache");
            self.cache.clear();
        }
        self.cache.remove(&chg.name);
        self.changes.push(chg);
    }

    /// Flush pending changes and advance to `height`. Returns the names
    /// touched by the flushed changes.
    pub fn increment_height_to(&mut self, height: i32) -> Result<Vec<Vec<u8>>> {
        if height <= self.height {
            return Err(ClaimTrieError::Invariant(format!(
                "increment to {height} at height {}",
                self.height
            )));
        }

        let names: Vec<Vec<u8>> = self.changes.iter().map(|c| c.name.clone()).collect();
        self.repo.append_changes(&self.changes)?;
        self.changes.clear();
        self.height = height;
        Ok(names)
    }

    /// Rewind to `height`, discarding the affected names' changes above it.
    pub fn decrement_height_to(&mut self, affected_names: &[Vec<u8>], height: i32) -> Result<()> {
        if height >= self.height {
            return Err(ClaimTrieError::Invariant(format!(
                "decrement to {height} at height {}",
                self.height
            )));
        }

        for name in affected_names {
            self.cache.remove(name);
            self.repo.drop_changes(name, height)?;
        }
        self.height = height;
        Ok(())
    }

    /// The node for `name` at the current height, or `None` when the name
    /// has no history.
    pub fn node(&mut self, name: &[u8]) -> Result<Option<Node>> {
        let height = self.height;
        if let Some(cached) = self.cache.get_mut(name) {
            cached.adjust_to(height, None);
            return Ok(Some(cached.clone()));
        }

        let changes = self.repo.load_changes(name)?;
        let Some(node) = self.node_from_changes(&changes, self.height)? else {
            return Ok(None);
        };
        self.cache.insert(name.to_vec(), node.clone());
        Ok(Some(node))
    }

    /// Replay `changes` (already sorted by height) into a node at
    /// `height`. Changes above `height` are ignored.
    fn node_from_changes(&self, changes: &[Change], height: i32) -> Result<Option<Node>> {
        if changes.is_empty() {
            return Ok(None);
        }

        let mut node = Node::new();
        let mut previous = changes[0].height;
        let mut count = changes.len();

        for (i, chg) in changes.iter().enumerate() {
            if chg.height < previous {
                return Err(ClaimTrieError::Invariant(
                    "changes are not ordered by height".into(),
                ));
            }
            if chg.height > height {
                count = i;
                break;
            }
            if previous < chg.height {
                node.adjust_to(previous, Some(chg.height - 1));
                previous = chg.height;
            }

            let delay = self.delay_for_name(&node, chg)?;
            node.apply_change(chg, delay);
        }

        if count == 0 {
            return Ok(None);
        }
        node.adjust_to(changes[count - 1].height, Some(height));
        Ok(Some(node))
    }

    /// Activation delay for `chg` against the node's current state.
    fn delay_for_name(&self, node: &Node, chg: &Change) -> Result<i32> {
        if let Some(best) = node.best_claim() {
            if best.claim_id == chg.claim_id {
                return Ok(0);
            }
        }
        if let Some(active_height) = chg.active_height {
            if active_height >= chg.height {
                return Ok(active_height - chg.height);
            }
        }
        if node.best_claim().is_none() {
            return Ok(0);
        }

        let delay = self.calculate_delay(chg.height, node.taken_over_at);
        if delay > 0 && self.workaround_needed(node, chg)? {
            debug!(
                name = %String::from_utf8_lossy(&chg.name),
                height = chg.height,
                "delay workaround applies",
            );
            return Ok(0);
        }
        Ok(delay)
    }

    fn calculate_delay(&self, current: i32, took_over: i32) -> i32 {
        let delay = (current - took_over) / self.params.active_delay_factor;
        delay.min(self.params.max_active_delay)
    }

    /// Reproduces delay bugs shipped by earlier versions. Consensus
    /// behavior; see the workaround tables in [`params`].
    fn workaround_needed(&self, node: &Node, chg: &Change) -> Result<bool> {
        if chg.height >= self.params.max_removal_workaround_height {
            if chg.height <= DELAY_WORKAROUNDS_PART2_MAX_HEIGHT {
                if params::delay_workaround_part2(&chg.name, chg.height) {
                    return Ok(true);
                }
            } else if self.has_children_but_no_self(&chg.name, chg.height, 2)? {
                return Ok(true);
            }
        } else if !node.claims.is_empty() && params::delay_workaround(&chg.name, chg.height) {
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether `name` has at least `required` distinct child branches with
    /// an activated winner, without an activated claim of its own.
    fn has_children_but_no_self(&self, name: &[u8], height: i32, required: usize) -> Result<bool> {
        let mut children: HashSet<u8> = HashSet::new();
        self.repo.iterate_children(name, &mut |changes| {
            if changes.is_empty() {
                return true;
            }
            let node = match self.node_from_changes(changes, height) {
                Ok(node) => node,
                Err(_) => None,
            };
            let Some(node) = node else {
                return true;
            };
            if !node.has_active_best() {
                return true;
            }
            if name.len() >= changes[0].name.len() {
                return false; // hit self
            }
            children.insert(changes[0].name[name.len()]);
            children.len() < required
        })?;
        Ok(children.len() >= required)
    }

    /// Visit every stored name.
    pub fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        self.repo.iterate_all(f)
    }

    /// Commitment hashes of every activated claim, in bid order.
    pub fn claim_hashes(&mut self, name: &[u8]) -> Result<Vec<Hash256>> {
        let Some(mut node) = self.node(name)? else {
            return Ok(Vec::new());
        };
        node.sort_claims();
        Ok(node
            .claims
            .iter()
            .filter(|c| c.status == Status::Activated)
            .map(|c| Claim::commitment_hash(&c.out_point, node.taken_over_at))
            .collect())
    }

    /// Commitment hash of the activated winner, if there is one.
    pub fn hash(&mut self, name: &[u8]) -> Result<Option<Hash256>> {
        let Some(node) = self.node(name)? else {
            return Ok(None);
        };
        if node.claims.is_empty() || !node.has_active_best() {
            return Ok(None);
        }
        let best = node.best_claim().expect("active winner checked above");
        Ok(Some(Claim::commitment_hash(
            &best.out_point,
            node.taken_over_at,
        )))
    }

    /// Flush the underlying repository.
    pub fn flush(&self) -> Result<()> {
        self.repo.flush()
    }
}

/// Name-normalizing wrapper around [`BaseManager`].
///
/// Before the fork it is transparent. At the fork it re-emits the live
/// claims of every name whose normalized form differs, under that
/// normalized form; from then on all incoming and queried names are
/// normalized first.
pub struct NormalizingManager {
    inner: BaseManager,
}

impl NormalizingManager {
    /// Wrap a base manager.
    pub fn new(inner: BaseManager) -> Self {
        Self { inner }
    }

    /// Current height.
    pub fn height(&self) -> i32 {
        self.inner.height()
    }

    /// The consensus parameters in effect.
    pub fn params(&self) -> &Params {
        self.inner.params()
    }

    fn fork_height(&self) -> i32 {
        self.inner.params.normalized_name_fork_height
    }

    /// Queue a change, normalizing its name when the change height is at
    /// or past the fork.
    pub fn append_change(&mut self, mut chg: Change) {
        chg.name = normalize_if_necessary(&chg.name, chg.height, self.fork_height()).into_owned();
        self.inner.append_change(chg);
    }

    /// Flush pending changes and advance to `height`, emitting the fork
    /// migration first when `height` is the fork height.
    pub fn increment_height_to(&mut self, height: i32) -> Result<Vec<Vec<u8>>> {
        self.add_normalization_fork_changes_if_necessary()?;
        self.inner.increment_height_to(height)
    }

    /// Rewind to `height`.
    pub fn decrement_height_to(&mut self, affected_names: &[Vec<u8>], height: i32) -> Result<()> {
        self.inner.decrement_height_to(affected_names, height)
    }

    /// The node for `name` at the current height, normalizing the lookup
    /// key when past the fork.
    pub fn node(&mut self, name: &[u8]) -> Result<Option<Node>> {
        let key = normalize_if_necessary(name, self.inner.height(), self.fork_height()).into_owned();
        self.inner.node(&key)
    }

    /// Visit every stored name (raw keys).
    pub fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        self.inner.iterate_names(f)
    }

    /// Commitment hashes of every activated claim of `name`, in bid order.
    pub fn claim_hashes(&mut self, name: &[u8]) -> Result<Vec<Hash256>> {
        let key = normalize_if_necessary(name, self.inner.height(), self.fork_height()).into_owned();
        self.inner.claim_hashes(&key)
    }

    /// Commitment hash of the activated winner of `name`.
    pub fn hash(&mut self, name: &[u8]) -> Result<Option<Hash256>> {
        let key = normalize_if_necessary(name, self.inner.height(), self.fork_height()).into_owned();
        self.inner.hash(&key)
    }

    /// Flush the underlying repository.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// One block before the fork, walk every stored name and re-add the
    /// live claims of differently-normalizing names under their normalized
    /// form. The re-emitted records carry the fork height as their
    /// activation height, so every migrated claim re-activates (and
    /// re-bids) at the fork. That immediate re-activation is historical
    /// consensus behavior.
    fn add_normalization_fork_changes_if_necessary(&mut self) -> Result<()> {
        let fork_height = self.fork_height();
        if self.inner.height() + 1 != fork_height {
            return Ok(());
        }
        debug!(height = fork_height, "emitting normalization fork changes");

        let mut names: Vec<Vec<u8>> = Vec::new();
        self.inner.iterate_names(&mut |name| {
            names.push(name.to_vec());
            true
        })?;

        for name in names {
            let norm = normalize(&name);
            if norm.as_ref() == name.as_slice() {
                continue;
            }
            let norm = norm.into_owned();

            let Some(node) = self.inner.node(&name)? else {
                continue;
            };

            for claim in &node.claims {
                self.inner.append_change(
                    Change::new(ChangeType::AddClaim)
                        .with_name(&norm)
                        .with_height(fork_height)
                        .with_claim_id(claim.claim_id)
                        .with_out_point(claim.out_point)
                        .with_amount(claim.amount)
                        .with_value(&claim.value)
                        .with_active_height(fork_height),
                );
            }
            for support in &node.supports {
                self.inner.append_change(
                    Change::new(ChangeType::AddSupport)
                        .with_name(&norm)
                        .with_height(fork_height)
                        .with_claim_id(support.claim_id)
                        .with_out_point(support.out_point)
                        .with_amount(support.amount)
                        .with_value(&support.value)
                        .with_active_height(fork_height),
                );
            }
        }
        Ok(())
    }
}
