//! CLI harness for the chain sync tracker
//!
//! This tool allows:
//! - Querying the height oracle
//! - Tracking sync, recovery and rescans against a live node
//! - Replaying a saved node log through the rescan parser

use anyhow::Context;
use chainsync_params::{Network, NetworkType};
use chainsync_tracker::{
    display_percent, init_tracker_logging, summary, sync_fraction, ChainSyncTracker,
    FileLogSource, HeightOracle, LndRestClient, LogLineBus, MempoolHeightOracle, OracleConfig,
    RescanTracker, SyncState, SyncStateHandle, TrackerConfig, TrackerEvent, DEFAULT_ORACLE_URL,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sync-harness")]
#[command(about = "Wallet chain sync tracking harness", long_about = None)]
struct Cli {
    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the best block height once
    BestHeight {
        /// Network (mainnet, testnet, testnet4, signet)
        #[arg(short, long, default_value = "mainnet")]
        network: NetworkType,

        /// Block explorer base URL
        #[arg(long, default_value = DEFAULT_ORACLE_URL)]
        oracle_url: String,
    },

    /// Track sync, recovery and optionally a rescan against a live node
    Track {
        /// Node REST endpoint
        #[arg(long)]
        node_url: Option<String>,

        /// Admin macaroon file
        #[arg(short, long)]
        macaroon: PathBuf,

        /// Tracker config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Network, overrides the config file
        #[arg(short, long)]
        network: Option<NetworkType>,

        /// Node data directory, overrides the config file
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Track a rescan starting at this height
        #[arg(long)]
        rescan_from: Option<u64>,

        /// Accept the node's self-signed certificate
        #[arg(long)]
        insecure: bool,
    },

    /// Feed a saved node log through a rescan session
    ReplayLog {
        /// Log file
        file: PathBuf,

        /// Height the rescan session starts at
        #[arg(short, long, default_value = "0")]
        start_height: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracker_logging(cli.json_logs);

    match cli.command {
        Commands::BestHeight {
            network,
            oracle_url,
        } => {
            run_best_height(network, oracle_url).await?;
        }
        Commands::Track {
            node_url,
            macaroon,
            config,
            network,
            data_dir,
            rescan_from,
            insecure,
        } => {
            let mut config = match config {
                Some(path) => TrackerConfig::from_json_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => TrackerConfig::default(),
            };
            if let Some(network) = network {
                config.network = network;
            }
            if let Some(data_dir) = data_dir {
                config.node_data_dir = data_dir;
            }
            config.validate()?;

            let node_url = node_url
                .unwrap_or_else(|| Network::from_type(config.network).default_node_url());
            run_track(config, node_url, macaroon, rescan_from, insecure).await?;
        }
        Commands::ReplayLog { file, start_height } => {
            run_replay_log(file, start_height).await?;
        }
    }

    Ok(())
}

async fn run_best_height(network: NetworkType, oracle_url: String) -> anyhow::Result<()> {
    let oracle = MempoolHeightOracle::new(&OracleConfig {
        base_url: oracle_url,
        ..Default::default()
    })?;
    info!("Querying {}", oracle.height_url(network)?);

    let height = oracle.fetch_height(network).await?;
    println!("{}", height);
    Ok(())
}

async fn run_track(
    config: TrackerConfig,
    node_url: String,
    macaroon: PathBuf,
    rescan_from: Option<u64>,
    insecure: bool,
) -> anyhow::Result<()> {
    let macaroon = std::fs::read(&macaroon)
        .with_context(|| format!("reading macaroon {}", macaroon.display()))?;
    let node = LndRestClient::new(node_url, insecure)?.with_macaroon(&macaroon);
    let oracle = MempoolHeightOracle::new(&config.oracle)?;
    let logs = FileLogSource::new(config.log_poll());

    info!("Node: {}", node.base_url());
    let tracker = ChainSyncTracker::new(config, Arc::new(node), Arc::new(oracle), Arc::new(logs));
    let mut rx = tracker.subscribe();

    let sync = tracker.spawn_syncing();
    let recovery = match tracker.check_recovery_status().await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Recovery status unavailable: {}", e);
            None
        }
    };
    if let Some(height) = rescan_from {
        tracker.start_rescan_tracking(height).await;
    }

    // Progress bar
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
            .progress_chars("=>-"),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let state = rx.borrow_and_update().clone();
        render(&pb, &state);

        let recovery_done = recovery.as_ref().map_or(true, |h| h.is_finished());
        if sync.is_finished() && recovery_done && !state.rescan.is_rescanning {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted");
                break;
            }
            // Task completion does not touch the state
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }

    pb.finish_with_message(summary(&tracker.state()));
    tracker.reset();

    sync.await??;
    if let Some(recovery) = recovery {
        recovery.await??;
    }
    info!("Tracking finished");
    Ok(())
}

fn render(pb: &ProgressBar, state: &SyncState) {
    let percent = display_percent(sync_fraction(state.current_block_height, state.best_block_height));
    pb.set_position((percent * 10.0) as u64);
    pb.set_message(summary(state));
}

async fn run_replay_log(file: PathBuf, start_height: u64) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;

    let bus = LogLineBus::new();
    let state = SyncStateHandle::new();
    let mut events = state.subscribe_events();
    let rescan = RescanTracker::new(state.clone(), Arc::new(bus.clone()), ".", NetworkType::Mainnet);

    rescan.start_rescan_tracking(start_height).await;
    let mut finished = None;
    for line in content.lines() {
        bus.emit(line);
        // Capture the terminal values before the session clears them
        while let Ok(event) = events.try_recv() {
            if let TrackerEvent::RescanFinished { .. } = &event {
                finished = Some(event.clone());
            }
            println!("{}", event.name());
        }
    }

    let snapshot = state.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot.rescan)?);
    match finished {
        Some(TrackerEvent::RescanFinished {
            address_count,
            final_height,
        }) => println!(
            "Rescan finished: {} addresses, synced to height {}",
            address_count, final_height
        ),
        _ => println!("Rescan did not finish ({} listener still registered)", bus.listener_count()),
    }

    rescan.stop_rescan_tracking();
    Ok(())
}
