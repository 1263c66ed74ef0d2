//! Persistence layer: the per-name change store and its sibling stores.
//!
//! Everything is sled-backed. The change store maps raw name bytes to the
//! concatenation of that name's encoded change records, in append order.
//! The block-root, temporal, and chain stores live as named trees inside a
//! single state database.

use std::path::Path;

use sled::transaction::TransactionError;
use tracing::debug;

use crate::change::{self, Change};
use crate::error::{ClaimTrieError, Result};
use crate::hash::Hash256;

/// Tree name for per-name change streams.
const CHANGES_TREE: &str = "changes";

/// Tree name for computed block roots.
pub const BLOCK_ROOTS_TREE: &str = "block_roots";

/// Tree name for externally reported block roots.
pub const REPORTED_ROOTS_TREE: &str = "reported_roots";

/// Tree name for the height → touched-names index.
pub const TEMPORAL_TREE: &str = "temporal";

/// Tree name for recorded per-block raw changes.
pub const CHAIN_CHANGES_TREE: &str = "chain_changes";

/// Access to persisted per-name change streams.
///
/// Implementations must guarantee that once `append_changes` returns, a
/// subsequent `load_changes` observes the batch.
pub trait ChangeRepo {
    /// Append changes, batched atomically. Changes may target different
    /// names; per-name chronological order must be preserved by the caller.
    fn append_changes(&self, changes: &[Change]) -> Result<()>;

    /// Load all changes for a name, stable-sorted by height.
    ///
    /// A missing name is not an error; the result is empty.
    fn load_changes(&self, name: &[u8]) -> Result<Vec<Change>>;

    /// Discard changes with `height > final_height` for a name.
    fn drop_changes(&self, name: &[u8], final_height: i32) -> Result<()>;

    /// Visit the change streams of every name starting with `prefix`, in
    /// byte-lexicographic key order. The callback returns false to halt.
    fn iterate_children(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[Change]) -> bool,
    ) -> Result<()>;

    /// Visit every stored name in byte-lexicographic order. The callback
    /// returns false to halt.
    fn iterate_all(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()>;

    /// Flush buffered writes to disk.
    fn flush(&self) -> Result<()>;
}

/// Sled-backed [`ChangeRepo`].
pub struct SledChangeRepo {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledChangeRepo {
    /// Open or create the change store under `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()
            .map_err(|e| ClaimTrieError::Repo(format!("sled open {}: {e}", path.display())))?;
        let tree = db
            .open_tree(CHANGES_TREE)
            .map_err(|e| ClaimTrieError::Repo(format!("open changes tree: {e}")))?;
        Ok(Self { db, tree })
    }
}

impl ChangeRepo for SledChangeRepo {
    fn append_changes(&self, changes: &[Change]) -> Result<()> {
        // Pre-encode and coalesce per name, preserving per-name order.
        let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for chg in changes {
            match merged.iter_mut().find(|(name, _)| *name == chg.name) {
                Some((_, buf)) => change::append_encoded(buf, chg)?,
                None => {
                    let mut buf = Vec::new();
                    change::append_encoded(&mut buf, chg)?;
                    merged.push((chg.name.clone(), buf));
                }
            }
        }

        self.tree
            .transaction(|tx| {
                for (name, bytes) in &merged {
                    let mut value = tx
                        .get(name)?
                        .map(|v| v.to_vec())
                        .unwrap_or_default();
                    value.extend_from_slice(bytes);
                    tx.insert(name.as_slice(), value)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| {
                ClaimTrieError::Repo(format!("append changes: {e:?}"))
            })?;
        Ok(())
    }

    fn load_changes(&self, name: &[u8]) -> Result<Vec<Change>> {
        match self
            .tree
            .get(name)
            .map_err(|e| ClaimTrieError::Repo(format!("load changes: {e}")))?
        {
            Some(value) => change::decode_changes(&value),
            None => Ok(Vec::new()),
        }
    }

    fn drop_changes(&self, name: &[u8], final_height: i32) -> Result<()> {
        let changes = self.load_changes(name)?;
        let keep: Vec<Change> = changes
            .into_iter()
            .filter(|c| c.height <= final_height)
            .collect();
        debug!(
            name = %String::from_utf8_lossy(name),
            final_height,
            kept = keep.len(),
            "dropping changes",
        );
        // One atomic rewrite; a crash leaves either the old or the new value.
        let value = change::encode_changes(&keep)?;
        self.tree
            .insert(name, value)
            .map_err(|e| ClaimTrieError::Repo(format!("drop changes: {e}")))?;
        Ok(())
    }

    fn iterate_children(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[Change]) -> bool,
    ) -> Result<()> {
        for item in self.tree.scan_prefix(prefix) {
            let (_, value) =
                item.map_err(|e| ClaimTrieError::Repo(format!("iterate children: {e}")))?;
            let changes = change::decode_changes(&value)?;
            if !f(&changes) {
                break;
            }
        }
        Ok(())
    }

    fn iterate_all(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        for item in self.tree.iter() {
            let (key, _) = item.map_err(|e| ClaimTrieError::Repo(format!("iterate all: {e}")))?;
            if !f(&key) {
                break;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| ClaimTrieError::Repo(format!("flush: {e}")))?;
        Ok(())
    }
}

/// Open (or create) the state database holding the root, temporal, and
/// chain trees.
pub fn open_state_db(path: &Path) -> Result<sled::Db> {
    sled::open(path)
        .map_err(|e| ClaimTrieError::Repo(format!("sled open {}: {e}", path.display())))
}

fn open_tree(db: &sled::Db, name: &str) -> Result<sled::Tree> {
    db.open_tree(name)
        .map_err(|e| ClaimTrieError::Repo(format!("open {name} tree: {e}")))
}

fn height_key(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

/// Height-indexed root hashes: `u32` big-endian key → 32-byte hash.
pub struct BlockRepo {
    tree: sled::Tree,
}

impl BlockRepo {
    /// Open the computed-roots store inside `db`.
    pub fn computed(db: &sled::Db) -> Result<Self> {
        Ok(Self { tree: open_tree(db, BLOCK_ROOTS_TREE)? })
    }

    /// Open the reported-roots store inside `db`.
    pub fn reported(db: &sled::Db) -> Result<Self> {
        Ok(Self { tree: open_tree(db, REPORTED_ROOTS_TREE)? })
    }

    /// Root stored at `height`, if any.
    pub fn get(&self, height: i32) -> Result<Option<Hash256>> {
        match self
            .tree
            .get(height_key(height))
            .map_err(|e| ClaimTrieError::Repo(format!("root lookup: {e}")))?
        {
            Some(value) => Ok(Some(Hash256::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    /// Store the root for `height`.
    pub fn set(&self, height: i32, hash: &Hash256) -> Result<()> {
        self.tree
            .insert(height_key(height), hash.as_bytes())
            .map_err(|e| ClaimTrieError::Repo(format!("root store: {e}")))?;
        Ok(())
    }

    /// The highest height with a stored root.
    ///
    /// Big-endian keys make the last tree entry the highest height.
    pub fn max_height(&self) -> Result<Option<i32>> {
        match self
            .tree
            .last()
            .map_err(|e| ClaimTrieError::Repo(format!("max height: {e}")))?
        {
            Some((key, _)) => {
                let raw: [u8; 4] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| ClaimTrieError::Repo("corrupt height key".into()))?;
                Ok(Some(u32::from_be_bytes(raw) as i32))
            }
            None => Ok(None),
        }
    }

    /// Remove all roots above `height`.
    pub fn delete_above(&self, height: i32) -> Result<()> {
        let mut doomed = Vec::new();
        for item in self.tree.range(height_key(height + 1)..) {
            let (key, _) = item.map_err(|e| ClaimTrieError::Repo(format!("root range: {e}")))?;
            doomed.push(key);
        }
        for key in doomed {
            self.tree
                .remove(key)
                .map_err(|e| ClaimTrieError::Repo(format!("root remove: {e}")))?;
        }
        Ok(())
    }
}

/// Height → names touched or scheduled at that height.
///
/// Serves two purposes: rewinding needs every name whose state moved above
/// the target height, and future activations need their names revisited at
/// the height they fire even though no change record exists there.
pub struct TemporalRepo {
    tree: sled::Tree,
}

impl TemporalRepo {
    /// Open the temporal index inside `db`.
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self { tree: open_tree(db, TEMPORAL_TREE)? })
    }

    /// Names recorded at `height`.
    pub fn nodes_at(&self, height: i32) -> Result<Vec<Vec<u8>>> {
        match self
            .tree
            .get(height_key(height))
            .map_err(|e| ClaimTrieError::Repo(format!("temporal lookup: {e}")))?
        {
            Some(value) => rmp_serde::from_slice(&value)
                .map_err(|e| ClaimTrieError::Decode(format!("temporal decode: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the name set recorded at `height`.
    pub fn set_nodes_at(&self, height: i32, names: &[Vec<u8>]) -> Result<()> {
        let value = rmp_serde::to_vec(&names)
            .map_err(|e| ClaimTrieError::Encode(format!("temporal encode: {e}")))?;
        self.tree
            .insert(height_key(height), value)
            .map_err(|e| ClaimTrieError::Repo(format!("temporal store: {e}")))?;
        Ok(())
    }

    /// Add one name to the set recorded at `height`.
    pub fn add_node_at(&self, height: i32, name: &[u8]) -> Result<()> {
        let mut names = self.nodes_at(height)?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_vec());
            self.set_nodes_at(height, &names)?;
        }
        Ok(())
    }

    /// All names recorded in the interval `(from, to]`.
    pub fn nodes_in_range(&self, from: i32, to: i32) -> Result<Vec<Vec<u8>>> {
        let mut names = Vec::new();
        for height in (from + 1)..=to {
            names.extend(self.nodes_at(height)?);
        }
        Ok(names)
    }
}

/// Per-block recording of raw (pre-normalization) changes, for replay.
pub struct ChainRepo {
    tree: sled::Tree,
}

impl ChainRepo {
    /// Open the chain recording inside `db`.
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self { tree: open_tree(db, CHAIN_CHANGES_TREE)? })
    }

    /// Record the changes of one block.
    pub fn save(&self, height: i32, changes: &[Change]) -> Result<()> {
        let value = change::encode_changes(changes)?;
        self.tree
            .insert(height_key(height), value)
            .map_err(|e| ClaimTrieError::Repo(format!("chain store: {e}")))?;
        Ok(())
    }

    /// Load the recorded changes of one block, empty when none recorded.
    pub fn load(&self, height: i32) -> Result<Vec<Change>> {
        match self
            .tree
            .get(height_key(height))
            .map_err(|e| ClaimTrieError::Repo(format!("chain lookup: {e}")))?
        {
            Some(value) => change::decode_changes(&value),
            None => Ok(Vec::new()),
        }
    }

    /// The highest recorded height.
    pub fn max_height(&self) -> Result<Option<i32>> {
        match self
            .tree
            .last()
            .map_err(|e| ClaimTrieError::Repo(format!("chain max height: {e}")))?
        {
            Some((key, _)) => {
                let raw: [u8; 4] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| ClaimTrieError::Repo("corrupt height key".into()))?;
                Ok(Some(u32::from_be_bytes(raw) as i32))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeType;
    use crate::types::OutPoint;
    use tempfile::TempDir;

    const NAME: &[u8] = b"name1";

    fn chg(height: i32) -> Change {
        Change::new(ChangeType::AddClaim)
            .with_name(NAME)
            .with_height(height)
            .with_out_point(
                OutPoint::from_string(
                    "0000000000000000000000000000000000000000000000000000000000000000:1",
                )
                .unwrap(),
            )
    }

    fn open_repo(dir: &TempDir) -> SledChangeRepo {
        SledChangeRepo::open(dir.path()).unwrap()
    }

    // ==================== Round-trip and drop ====================

    #[test]
    fn test_append_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        repo.append_changes(&[chg(1), chg(3), chg(5)]).unwrap();
        let loaded = repo.load_changes(NAME).unwrap();
        assert_eq!(loaded, vec![chg(1), chg(3), chg(5)]);
    }

    #[test]
    fn test_load_missing_name_is_empty() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        assert!(repo.load_changes(b"nothing").unwrap().is_empty());
    }

    #[test]
    fn test_drop_changes_truncates_by_height() {
        for (final_height, expected) in [
            (1, vec![chg(1)]),
            (2, vec![chg(1)]),
            (3, vec![chg(1), chg(3)]),
            (4, vec![chg(1), chg(3)]),
            (5, vec![chg(1), chg(3), chg(5)]),
            (6, vec![chg(1), chg(3), chg(5)]),
        ] {
            let dir = TempDir::new().unwrap();
            let repo = open_repo(&dir);
            repo.append_changes(&[chg(1), chg(3), chg(5)]).unwrap();
            repo.drop_changes(NAME, final_height).unwrap();
            assert_eq!(repo.load_changes(NAME).unwrap(), expected, "final height {final_height}");
        }
    }

    #[test]
    fn test_append_in_batches_preserves_order() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        repo.append_changes(&[chg(1), chg(3), chg(5)]).unwrap();
        repo.append_changes(&[chg(6), chg(8), chg(9)]).unwrap();

        let loaded = repo.load_changes(NAME).unwrap();
        assert_eq!(
            loaded,
            vec![chg(1), chg(3), chg(5), chg(6), chg(8), chg(9)]
        );
    }

    #[test]
    fn test_drop_after_multiple_batches() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        repo.append_changes(&[chg(1), chg(3)]).unwrap();
        repo.append_changes(&[chg(5)]).unwrap();
        repo.append_changes(&[chg(6), chg(8), chg(9)]).unwrap();

        repo.drop_changes(NAME, 8).unwrap();
        assert_eq!(
            repo.load_changes(NAME).unwrap(),
            vec![chg(1), chg(3), chg(5), chg(6), chg(8)]
        );
    }

    #[test]
    fn test_load_sorts_interleaved_heights() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        // A later batch may carry an earlier height for the same name; the
        // normalization fork does exactly this.
        repo.append_changes(&[chg(5)]).unwrap();
        repo.append_changes(&[chg(2)]).unwrap();

        let loaded = repo.load_changes(NAME).unwrap();
        assert_eq!(loaded, vec![chg(2), chg(5)]);
    }

    // ==================== Iteration ====================

    #[test]
    fn test_iterate_children_visits_in_byte_order() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        let creation = vec![
            chg(5).with_name(b"test\x00"),
            chg(5).with_name(b"test\x00\x00"),
            chg(5).with_name(b"test\x00b"),
            chg(5).with_name(b"test\x00\xFF"),
            chg(5).with_name(b"testa"),
        ];
        repo.append_changes(&creation).unwrap();

        let mut received = Vec::new();
        repo.iterate_children(b"", &mut |changes| {
            received.extend_from_slice(changes);
            true
        })
        .unwrap();
        assert_eq!(received, creation);
    }

    #[test]
    fn test_iterate_children_prefix_bounds() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        repo.append_changes(&[
            chg(1).with_name(b"a"),
            chg(1).with_name(b"ab"),
            chg(1).with_name(b"abc"),
            chg(1).with_name(b"b"),
        ])
        .unwrap();

        let mut seen = Vec::new();
        repo.iterate_children(b"ab", &mut |changes| {
            seen.push(changes[0].name.clone());
            true
        })
        .unwrap();
        assert_eq!(seen, vec![b"ab".to_vec(), b"abc".to_vec()]);
    }

    #[test]
    fn test_iterate_halts_on_false() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        repo.append_changes(&[
            chg(1).with_name(b"a"),
            chg(1).with_name(b"b"),
            chg(1).with_name(b"c"),
        ])
        .unwrap();

        let mut count = 0;
        repo.iterate_all(&mut |_| {
            count += 1;
            count < 2
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_changes_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open_repo(&dir);
            repo.append_changes(&[chg(1), chg(2)]).unwrap();
            repo.flush().unwrap();
        }
        {
            let repo = open_repo(&dir);
            assert_eq!(repo.load_changes(NAME).unwrap(), vec![chg(1), chg(2)]);
        }
    }

    // ==================== Sibling stores ====================

    #[test]
    fn test_block_repo_roundtrip_and_truncate() {
        let dir = TempDir::new().unwrap();
        let db = open_state_db(dir.path()).unwrap();
        let roots = BlockRepo::computed(&db).unwrap();

        for h in 1..=5 {
            roots.set(h, &Hash256::sha256d(&[h as u8])).unwrap();
        }
        assert_eq!(roots.max_height().unwrap(), Some(5));
        assert_eq!(roots.get(3).unwrap(), Some(Hash256::sha256d(&[3])));

        roots.delete_above(2).unwrap();
        assert_eq!(roots.max_height().unwrap(), Some(2));
        assert_eq!(roots.get(3).unwrap(), None);
        assert_eq!(roots.get(2).unwrap(), Some(Hash256::sha256d(&[2])));
    }

    #[test]
    fn test_temporal_repo_set_union() {
        let dir = TempDir::new().unwrap();
        let db = open_state_db(dir.path()).unwrap();
        let temporal = TemporalRepo::new(&db).unwrap();

        temporal.add_node_at(7, b"a").unwrap();
        temporal.add_node_at(7, b"b").unwrap();
        temporal.add_node_at(7, b"a").unwrap();
        assert_eq!(temporal.nodes_at(7).unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);

        temporal.add_node_at(9, b"c").unwrap();
        let range = temporal.nodes_in_range(6, 9).unwrap();
        assert_eq!(range, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(temporal.nodes_in_range(9, 9).unwrap().is_empty());
    }

    #[test]
    fn test_chain_repo_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = open_state_db(dir.path()).unwrap();
        let chain = ChainRepo::new(&db).unwrap();

        let block = vec![chg(4), chg(4).with_name(b"other")];
        chain.save(4, &block).unwrap();
        assert_eq!(chain.load(4).unwrap(), block);
        assert!(chain.load(5).unwrap().is_empty());
        assert_eq!(chain.max_height().unwrap(), Some(4));
    }
}
