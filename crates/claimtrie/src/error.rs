//! Error types for registry operations.

use thiserror::Error;

use crate::hash::Hash256;

/// Errors that can occur while driving the claim registry.
#[derive(Error, Debug)]
pub enum ClaimTrieError {
    /// Repository (disk or codec) failure. Fatal to the current block.
    #[error("repository failure: {0}")]
    Repo(String),

    /// Encoding a change record failed.
    #[error("encode change: {0}")]
    Encode(String),

    /// Decoding a persisted change record failed.
    #[error("decode change: {0}")]
    Decode(String),

    /// Programmer error: an operation broke an ordering or height invariant.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Computed merkle root differs from the externally reported one.
    ///
    /// Only raised in strict mode; the default path logs and continues.
    #[error("merkle root mismatch at height {height}: computed {computed}, expected {expected}")]
    HashMismatch {
        /// Block height at which the roots diverged.
        height: i32,
        /// Root computed by this registry.
        computed: Hash256,
        /// Root reported by the surrounding node.
        expected: Hash256,
    },

    /// A snapshot root cannot be adopted without recomputing the whole trie.
    #[error("full trie rebuild required")]
    TrieRebuildRequired,

    /// Malformed input that is not covered by a legacy drop-and-warn rule.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, ClaimTrieError>;
