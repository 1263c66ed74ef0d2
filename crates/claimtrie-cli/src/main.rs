//! Debugging and replay tool for the claimtrie registry.
//!
//! `chain` commands work on the recorded per-block change stream;
//! `node` commands inspect a single name's history and replayed state.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use claimtrie::repo::{self, BlockRepo, ChainRepo, ChangeRepo, SledChangeRepo};
use claimtrie::{
    BaseManager, Change, ChangeType, ClaimTrie, Config, NormalizingManager, Params,
};

mod ui;

/// Claimtrie registry debugging tool.
#[derive(Parser, Debug)]
#[command(name = "claimtrie")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory of the registry.
    #[arg(long, env = "CLAIMTRIE_DATA_DIR", default_value = "claimtrie-data")]
    data_dir: PathBuf,

    /// Which network's consensus parameters to use.
    #[arg(long, value_enum, default_value = "mainnet")]
    network: Network,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    fn params(self) -> Params {
        match self {
            Network::Mainnet => Params::mainnet(),
            Network::Testnet => Params::testnet(),
            Network::Regtest => Params::regtest(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recorded chain operations.
    #[command(subcommand)]
    Chain(ChainCommand),
    /// Per-name operations.
    #[command(subcommand)]
    Node(NodeCommand),
}

#[derive(Subcommand, Debug)]
enum ChainCommand {
    /// Dump recorded changes from one height up to another.
    Dump {
        /// First height to dump.
        from_height: i32,
        /// One past the last height to dump; defaults to from_height + 1.
        to_height: Option<i32>,
    },
    /// Replay the recorded chain from scratch, verifying reported roots.
    Replay {
        /// Replay up to this height; defaults to the last recorded block.
        to_height: Option<i32>,
    },
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Dump a name's raw change stream.
    Dump {
        /// The name to dump.
        name: String,
        /// Only show changes at or below this height.
        height: Option<i32>,
    },
    /// Replay a name's changes and show the resulting node.
    Replay {
        /// The name to replay.
        name: String,
        /// Replay up to this height; defaults to the whole stream.
        height: Option<i32>,
    },
    /// List the stored names extending a given name.
    Children {
        /// The name prefix.
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let params = cli.network.params();

    match cli.command {
        Command::Chain(cmd) => run_chain(cmd, &cli.data_dir, params),
        Command::Node(cmd) => run_node(cmd, &cli.data_dir, params),
    }
}

fn run_chain(cmd: ChainCommand, data_dir: &PathBuf, params: Params) -> Result<()> {
    match cmd {
        ChainCommand::Dump {
            from_height,
            to_height,
        } => {
            let state = repo::open_state_db(&data_dir.join("state"))?;
            let chain = ChainRepo::new(&state)?;

            let to_height = to_height.unwrap_or(from_height + 1);
            for height in from_height..to_height {
                for chg in chain.load(height)? {
                    if chg.height > height {
                        break;
                    }
                    ui::show_change(&chg);
                }
            }
            Ok(())
        }
        ChainCommand::Replay { to_height } => replay_chain(data_dir, params, to_height),
    }
}

fn replay_chain(data_dir: &PathBuf, params: Params, to_height: Option<i32>) -> Result<()> {
    // Read the recording and the reported roots up front; the registry
    // needs exclusive ownership of the state database afterwards.
    let blocks = {
        let state = repo::open_state_db(&data_dir.join("state"))?;
        let chain = ChainRepo::new(&state)?;
        let reported = BlockRepo::reported(&state)?;

        let Some(max) = chain.max_height()? else {
            bail!("no recorded chain in {}", data_dir.display());
        };
        let to_height = to_height.unwrap_or(max).min(max);

        let mut blocks = Vec::with_capacity(to_height as usize);
        for height in 1..=to_height {
            blocks.push((height, chain.load(height)?, reported.get(height)?));
        }

        // Wipe the derived state; the change recording stays.
        state
            .open_tree(repo::BLOCK_ROOTS_TREE)
            .and_then(|t| t.clear().map(|_| t))
            .map_err(|e| anyhow::anyhow!("clear block roots: {e}"))?;
        state
            .open_tree(repo::TEMPORAL_TREE)
            .and_then(|t| t.clear().map(|_| t))
            .map_err(|e| anyhow::anyhow!("clear temporal index: {e}"))?;
        state.flush().context("flush state")?;
        blocks
    };

    let nodes_dir = data_dir.join("nodes");
    if nodes_dir.exists() {
        std::fs::remove_dir_all(&nodes_dir).context("delete node repo")?;
        info!("deleted node repo");
    }

    let config = Config::new(data_dir, params).with_fail_on_hash_mismatch(true);
    let mut ct = ClaimTrie::new(config)?;

    for (height, changes, expected) in blocks {
        for chg in changes {
            apply_change(&mut ct, &chg)
                .with_context(|| format!("execute change at height {height}"))?;
        }
        if let Some(expected) = expected {
            ct.report_hash(height, expected)?;
        }
        ct.append_block()
            .with_context(|| format!("append block {height}"))?;
        if height % 1000 == 0 {
            info!(height, "replayed block");
        }
    }
    info!(height = ct.height(), root = %ct.merkle_hash(), "replay complete");
    Ok(())
}

fn apply_change(ct: &mut ClaimTrie, chg: &Change) -> Result<()> {
    match chg.change_type {
        ChangeType::AddClaim => {
            ct.add_claim(&chg.name, chg.out_point, chg.claim_id, chg.amount, &chg.value)?
        }
        ChangeType::UpdateClaim => {
            ct.update_claim(&chg.name, chg.out_point, chg.amount, chg.claim_id, &chg.value)?
        }
        ChangeType::SpendClaim => ct.spend_claim(&chg.name, chg.out_point, chg.claim_id)?,
        ChangeType::AddSupport => {
            ct.add_support(&chg.name, &chg.value, chg.out_point, chg.amount, chg.claim_id)?
        }
        ChangeType::SpendSupport => ct.spend_support(&chg.name, chg.out_point, chg.claim_id)?,
    }
    Ok(())
}

fn run_node(cmd: NodeCommand, data_dir: &PathBuf, params: Params) -> Result<()> {
    let repo = SledChangeRepo::open(&data_dir.join("nodes")).context("open node repo")?;

    match cmd {
        NodeCommand::Dump { name, height } => {
            let height = height.unwrap_or(i32::MAX);
            for chg in repo.load_changes(name.as_bytes())? {
                if chg.height > height {
                    break;
                }
                ui::show_change(&chg);
            }
            Ok(())
        }
        NodeCommand::Replay { name, height } => {
            let height = height.unwrap_or(i32::MAX);
            let mut manager =
                NormalizingManager::new(BaseManager::new(Box::new(repo), params, 0));
            manager.increment_height_to(height)?;

            let node = manager
                .node(name.as_bytes())?
                .with_context(|| format!("no node for {name}"))?;
            ui::show_node(&node);
            Ok(())
        }
        NodeCommand::Children { name } => {
            repo.iterate_children(name.as_bytes(), &mut |changes| {
                if let (Some(first), Some(last)) = (changes.first(), changes.last()) {
                    println!(
                        "Name: {}, Heights: {} .. {}",
                        String::from_utf8_lossy(&first.name),
                        first.height,
                        last.height
                    );
                }
                true
            })?;
            Ok(())
        }
    }
}
