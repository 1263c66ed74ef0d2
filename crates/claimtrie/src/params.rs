//! Consensus parameters.
//!
//! Everything in here is consensus-relevant: fork heights, activation
//! delay math, and the hardcoded delay workaround tables that reproduce
//! historical bugs. Changing any value changes the root hash sequence.

use serde::{Deserialize, Serialize};

/// Divisor turning blocks-since-takeover into an activation delay.
pub const ACTIVE_DELAY_FACTOR: i32 = 32;

/// Upper clamp for any activation delay.
pub const MAX_ACTIVE_DELAY: i32 = 4032;

/// Node cache size above which the manager clears wholesale.
pub const MAX_NODE_MANAGER_CACHE_SIZE: usize = 32_000;

/// Last height at which the part-2 workaround table applies; above it the
/// children-but-no-self heuristic takes over.
pub const DELAY_WORKAROUNDS_PART2_MAX_HEIGHT: i32 = 933_294;

/// Consensus parameters for one network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Divisor for the activation delay calculation.
    pub active_delay_factor: i32,
    /// Clamp for the activation delay.
    pub max_active_delay: i32,
    /// Node manager cache eviction threshold.
    pub max_node_manager_cache_size: usize,
    /// Height from which names are indexed by their normalized form.
    pub normalized_name_fork_height: i32,
    /// Height gating which delay workaround applies.
    pub max_removal_workaround_height: i32,
    /// Height from which the root commits to every active claim instead of
    /// only the winning one.
    pub all_claims_in_merkle_fork_height: i32,
}

impl Params {
    /// Main network parameters.
    pub fn mainnet() -> Self {
        Self {
            active_delay_factor: ACTIVE_DELAY_FACTOR,
            max_active_delay: MAX_ACTIVE_DELAY,
            max_node_manager_cache_size: MAX_NODE_MANAGER_CACHE_SIZE,
            normalized_name_fork_height: 539_940,
            max_removal_workaround_height: 658_300,
            all_claims_in_merkle_fork_height: 658_309,
        }
    }

    /// Test network parameters.
    pub fn testnet() -> Self {
        Self {
            active_delay_factor: ACTIVE_DELAY_FACTOR,
            max_active_delay: MAX_ACTIVE_DELAY,
            max_node_manager_cache_size: MAX_NODE_MANAGER_CACHE_SIZE,
            normalized_name_fork_height: 993_380,
            max_removal_workaround_height: 100,
            all_claims_in_merkle_fork_height: 1_198_665,
        }
    }

    /// Regression test network parameters.
    pub fn regtest() -> Self {
        Self {
            active_delay_factor: ACTIVE_DELAY_FACTOR,
            max_active_delay: MAX_ACTIVE_DELAY,
            max_node_manager_cache_size: MAX_NODE_MANAGER_CACHE_SIZE,
            normalized_name_fork_height: 250,
            max_removal_workaround_height: -1,
            all_claims_in_merkle_fork_height: 349,
        }
    }

    /// Override the normalization fork height (test harness use).
    pub fn with_normalization_fork_height(mut self, height: i32) -> Self {
        self.normalized_name_fork_height = height;
        self
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Names whose claims were mistakenly granted a zero activation delay by
/// old versions below the removal workaround height. Keyed by raw name,
/// listing the heights at which the bug fired.
static DELAY_WORKAROUNDS: &[(&[u8], &[i32])] = &[
    (b"en-vivo", &[538_482]),
    (b"fifa", &[535_955]),
    (b"five-nights-at-freddys", &[537_968, 538_280]),
    (b"fortnite", &[536_542]),
    (b"game-of-thrones", &[537_371]),
    (b"gods-of-olympus", &[537_405]),
    (b"happy", &[536_543, 538_020]),
    (b"mine-diamonds", &[538_559]),
    (b"one", &[536_206]),
    (b"ozzy-man-reviews", &[537_371]),
    (b"seinfeld", &[538_200]),
    (b"skrilla", &[537_916]),
    (b"travtest01", &[426_898]),
    (b"whatever", &[536_672]),
];

/// Same bug past the removal workaround height, up to
/// [`DELAY_WORKAROUNDS_PART2_MAX_HEIGHT`].
static DELAY_WORKAROUNDS_PART2: &[(&[u8], &[i32])] = &[
    (b"argentina-vs-mexico", &[927_723]),
    (b"crypto", &[925_433]),
    (b"dereck-chisora", &[927_810]),
    (b"elon-musk", &[924_305]),
    (b"free-guy", &[918_365]),
    (b"lofi", &[913_257]),
    (b"odysee", &[890_200, 926_128]),
    (b"spongebob", &[920_918]),
    (b"world-cup-2022", &[927_723, 928_011]),
];

fn table_hit(table: &[(&[u8], &[i32])], name: &[u8], height: i32) -> bool {
    table
        .iter()
        .find(|(entry, _)| *entry == name)
        .is_some_and(|(_, heights)| heights.contains(&height))
}

/// Whether `(name, height)` is in the pre-workaround-height bug table.
pub fn delay_workaround(name: &[u8], height: i32) -> bool {
    table_hit(DELAY_WORKAROUNDS, name, height)
}

/// Whether `(name, height)` is in the post-workaround-height bug table.
pub fn delay_workaround_part2(name: &[u8], height: i32) -> bool {
    table_hit(DELAY_WORKAROUNDS_PART2, name, height)
}
