//! Runtime configuration for a registry instance.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::params::Params;

/// Configuration for one [`ClaimTrie`](crate::ClaimTrie) instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the node and state databases.
    pub data_dir: PathBuf,
    /// Consensus parameters.
    pub params: Params,
    /// Record every block's raw changes for later replay.
    pub record_changes: bool,
    /// Treat a mismatch against a reported root as fatal instead of a
    /// one-time diagnostic.
    pub fail_on_hash_mismatch: bool,
}

impl Config {
    /// Configuration rooted at `data_dir` with the given parameters.
    pub fn new(data_dir: impl Into<PathBuf>, params: Params) -> Self {
        Self {
            data_dir: data_dir.into(),
            params,
            record_changes: false,
            fail_on_hash_mismatch: false,
        }
    }

    /// Enable or disable per-block change recording.
    pub fn with_record_changes(mut self, record: bool) -> Self {
        self.record_changes = record;
        self
    }

    /// Enable or disable strict root verification.
    pub fn with_fail_on_hash_mismatch(mut self, fail: bool) -> Self {
        self.fail_on_hash_mismatch = fail;
        self
    }

    /// Location of the per-name change database.
    pub fn nodes_dir(&self) -> PathBuf {
        self.data_dir.join("nodes")
    }

    /// Location of the state database (roots, temporal index, recordings).
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_flags() {
        let config = Config::new("/tmp/ct", Params::regtest())
            .with_record_changes(true)
            .with_fail_on_hash_mismatch(true);
        assert!(config.record_changes);
        assert!(config.fail_on_hash_mismatch);
        assert_eq!(config.nodes_dir(), PathBuf::from("/tmp/ct/nodes"));
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/ct/state"));
    }
}
