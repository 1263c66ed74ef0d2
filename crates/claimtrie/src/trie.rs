//! The merkle trie over names.
//!
//! One vertex per name byte, children kept in byte order. Subtree hashes
//! are cached per vertex and invalidated along the path of every update,
//! so recomputing the root after a block touches only the changed paths.
//!
//! Two vertex hash algorithms exist. The legacy one commits to the
//! winning claim only: `sha256d( (letter ‖ child_hash)* ‖ value_hash? )`.
//! From the all-claims fork, a vertex commits to
//! `sha256d( merkle(children) ‖ claims_root )` with sentinel hashes for
//! missing sides. The algorithm is fixed per trie instance; fork
//! transitions rebuild the trie under the other mode.

use std::collections::BTreeMap;

use crate::error::{ClaimTrieError, Result};
use crate::hash::{self, Hash256, EMPTY_TRIE_HASH, NO_CHILDREN_HASH, NO_CLAIMS_HASH};

/// Which vertex hash algorithm a trie commits with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMode {
    /// Winning-claim commitment (before the all-claims fork).
    Legacy,
    /// Every-active-claim commitment (from the all-claims fork).
    AllClaims,
}

#[derive(Default)]
struct Vertex {
    children: BTreeMap<u8, Vertex>,
    value_hash: Option<Hash256>,
    merkle_hash: Option<Hash256>,
}

impl Vertex {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.value_hash.is_none()
    }
}

/// Radix trie keyed by (normalized) name bytes, committing to per-name
/// value hashes.
pub struct MerkleTrie {
    root: Vertex,
    mode: HashMode,
}

impl MerkleTrie {
    /// Create an empty trie hashing under `mode`.
    pub fn new(mode: HashMode) -> Self {
        Self {
            root: Vertex::default(),
            mode,
        }
    }

    /// The hash algorithm this trie commits with.
    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Set or clear the value hash of `name`, invalidating cached hashes
    /// along its path.
    pub fn update(&mut self, name: &[u8], value_hash: Option<Hash256>) {
        if value_hash.is_none() && !self.contains(name) {
            return; // nothing to clear, keep the path untouched
        }

        let mut vertex = &mut self.root;
        vertex.merkle_hash = None;
        for &byte in name {
            vertex = vertex.children.entry(byte).or_default();
            vertex.merkle_hash = None;
        }
        vertex.value_hash = value_hash;

        if value_hash.is_none() {
            prune(&mut self.root, name);
        }
    }

    /// Whether `name` currently has a value hash.
    pub fn contains(&self, name: &[u8]) -> bool {
        let mut vertex = &self.root;
        for byte in name {
            match vertex.children.get(byte) {
                Some(child) => vertex = child,
                None => return false,
            }
        }
        vertex.value_hash.is_some()
    }

    /// The root hash under this trie's mode.
    pub fn merkle_hash(&mut self) -> Hash256 {
        let hash = match self.mode {
            HashMode::Legacy => legacy_hash(&mut self.root),
            HashMode::AllClaims => all_claims_hash(&mut self.root),
        };
        hash.unwrap_or(EMPTY_TRIE_HASH)
    }

    /// Adopt a known root, e.g. from a snapshot.
    ///
    /// Succeeds only when the cached state already produces that root;
    /// otherwise the caller must rebuild from the repository.
    pub fn set_root(&mut self, root: &Hash256) -> Result<()> {
        if self.merkle_hash() == *root {
            Ok(())
        } else {
            Err(ClaimTrieError::TrieRebuildRequired)
        }
    }
}

/// Drop empty vertices along `name`, bottom-up. Returns whether the
/// visited vertex itself became removable.
fn prune(vertex: &mut Vertex, name: &[u8]) -> bool {
    if let Some((&first, rest)) = name.split_first() {
        if let Some(child) = vertex.children.get_mut(&first) {
            if prune(child, rest) {
                vertex.children.remove(&first);
            }
        }
    }
    vertex.is_empty()
}

fn legacy_hash(vertex: &mut Vertex) -> Option<Hash256> {
    if let Some(cached) = vertex.merkle_hash {
        return Some(cached);
    }

    let mut buf = Vec::with_capacity(256);
    for (&letter, child) in vertex.children.iter_mut() {
        if let Some(child_hash) = legacy_hash(child) {
            buf.push(letter);
            buf.extend_from_slice(child_hash.as_bytes());
        }
    }
    if let Some(value) = &vertex.value_hash {
        buf.extend_from_slice(value.as_bytes());
    }

    if buf.is_empty() {
        return None;
    }
    let computed = Hash256::sha256d(&buf);
    vertex.merkle_hash = Some(computed);
    Some(computed)
}

fn all_claims_hash(vertex: &mut Vertex) -> Option<Hash256> {
    if let Some(cached) = vertex.merkle_hash {
        return Some(cached);
    }

    let child_hashes: Vec<Hash256> = vertex
        .children
        .values_mut()
        .filter_map(all_claims_hash)
        .collect();

    if child_hashes.is_empty() && vertex.value_hash.is_none() {
        return None;
    }

    let child_root = hash::merkle_root(&child_hashes).unwrap_or(NO_CHILDREN_HASH);
    let claims_root = vertex.value_hash.unwrap_or(NO_CLAIMS_HASH);
    let computed = hash::merkle_branches(&child_root, &claims_root);
    vertex.merkle_hash = Some(computed);
    Some(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(tag: u8) -> Hash256 {
        Hash256::sha256d(&[tag])
    }

    #[test]
    fn test_empty_trie_root() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        assert_eq!(trie.merkle_hash(), EMPTY_TRIE_HASH);
        let mut trie = MerkleTrie::new(HashMode::AllClaims);
        assert_eq!(trie.merkle_hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn test_single_name_legacy_root() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        trie.update(b"ab", Some(value(1)));

        // leaf 'b': sha256d(value); child 'a': sha256d('b' ‖ leaf);
        // root: sha256d('a' ‖ child).
        let leaf = Hash256::sha256d(value(1).as_bytes());
        let mut buf = vec![b'b'];
        buf.extend_from_slice(leaf.as_bytes());
        let mid = Hash256::sha256d(&buf);
        let mut buf = vec![b'a'];
        buf.extend_from_slice(mid.as_bytes());
        assert_eq!(trie.merkle_hash(), Hash256::sha256d(&buf));
    }

    #[test]
    fn test_update_changes_root_and_remove_restores() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        trie.update(b"test", Some(value(1)));
        let one = trie.merkle_hash();

        trie.update(b"tes", Some(value(2)));
        let two = trie.merkle_hash();
        assert_ne!(one, two);

        trie.update(b"tes", None);
        assert_eq!(trie.merkle_hash(), one);

        trie.update(b"test", None);
        assert_eq!(trie.merkle_hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn test_removing_absent_name_is_a_noop() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        trie.update(b"present", Some(value(1)));
        let before = trie.merkle_hash();

        trie.update(b"absent", None);
        trie.update(b"presentee", None);
        assert_eq!(trie.merkle_hash(), before);
        assert!(!trie.contains(b"absent"));
    }

    #[test]
    fn test_same_updates_same_root() {
        let build = |order: &[(&[u8], u8)]| {
            let mut trie = MerkleTrie::new(HashMode::Legacy);
            for (name, tag) in order {
                trie.update(name, Some(value(*tag)));
            }
            trie.merkle_hash()
        };

        let forward = build(&[(b"alpha", 1), (b"beta", 2), (b"alp", 3)]);
        let backward = build(&[(b"alp", 3), (b"beta", 2), (b"alpha", 1)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_cache_invalidation_on_shared_path() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        trie.update(b"car", Some(value(1)));
        trie.update(b"cart", Some(value(2)));
        let before = trie.merkle_hash();

        // Touch a vertex on the shared path; root must change.
        trie.update(b"cart", Some(value(3)));
        assert_ne!(trie.merkle_hash(), before);

        trie.update(b"cart", Some(value(2)));
        assert_eq!(trie.merkle_hash(), before);
    }

    #[test]
    fn test_all_claims_mode_uses_sentinels() {
        let mut trie = MerkleTrie::new(HashMode::AllClaims);
        trie.update(b"x", Some(value(1)));

        let leaf = hash::merkle_branches(&NO_CHILDREN_HASH, &value(1));
        let expected = {
            let child_root = hash::merkle_root(&[leaf]).unwrap();
            hash::merkle_branches(&child_root, &NO_CLAIMS_HASH)
        };
        assert_eq!(trie.merkle_hash(), expected);
    }

    #[test]
    fn test_set_root_matches_or_demands_rebuild() {
        let mut trie = MerkleTrie::new(HashMode::Legacy);
        trie.update(b"name", Some(value(1)));
        let root = trie.merkle_hash();

        assert!(trie.set_root(&root).is_ok());
        let other = Hash256::sha256d(b"other");
        assert!(matches!(
            trie.set_root(&other),
            Err(ClaimTrieError::TrieRebuildRequired)
        ));
    }
}
