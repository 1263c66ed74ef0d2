//! # claimtrie
//!
//! A consensus-critical naming registry: a deterministic, height-indexed
//! state machine over name claims, committing to its entire state with a
//! single merkle root per block.
//!
//! Provides:
//! - Per-name claim/support state with best-claim selection, activation
//!   delays, and takeover accounting
//! - A persistent per-name change log with height-indexed replay and rewind
//! - The Unicode normalization fork, replaying merged histories under
//!   normalized names
//! - A byte-wise merkle trie over names reproducing the legacy root hash
//!   algorithm bit-exactly, including its documented historical bugs
//!
//! The transaction script decoder, UTXO view, and chain orchestration are
//! external; the core consumes classified commands (see [`ingest`]) and
//! produces one root per appended block.
//!
//! ## Example
//!
//! ```
//! use claimtrie::{ClaimTrie, Config, Params};
//! use claimtrie::{ClaimId, Hash256, OutPoint};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let mut ct = ClaimTrie::new(Config::new(dir.path(), Params::testnet())).unwrap();
//!
//! let out_point = OutPoint::new(Hash256::sha256d(b"some tx"), 0);
//! let claim_id = ClaimId::from_outpoint(&out_point);
//! ct.add_claim(b"hello", out_point, claim_id, 100, b"payload").unwrap();
//!
//! ct.append_block().unwrap();
//! assert_eq!(ct.height(), 1);
//! let root = ct.merkle_hash();
//! assert_eq!(root, ct.merkle_hash());
//! ```
//!
//! ## Determinism
//!
//! The root at height H is a pure function of every change applied up to
//! H under fixed [`Params`]. All mutation is single-threaded; command
//! order within a block and block order across heights are consensus
//! inputs supplied by the caller.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change;
pub mod claim;
pub mod claimtrie;
pub mod config;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod manager;
pub mod node;
pub mod normalization;
pub mod params;
pub mod repo;
pub mod trie;
pub mod types;

pub use change::{Change, ChangeType};
pub use claim::Claim;
pub use claimtrie::ClaimTrie;
pub use config::Config;
pub use error::{ClaimTrieError, Result};
pub use hash::{Hash256, EMPTY_TRIE_HASH};
pub use ingest::{ClaimScriptOp, ClassifiedScript, TxIngest};
pub use manager::{BaseManager, NormalizingManager};
pub use node::Node;
pub use params::Params;
pub use repo::{ChangeRepo, SledChangeRepo};
pub use types::{ClaimId, OutPoint, Status};
