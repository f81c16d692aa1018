use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use forgechain::api::{self, AppState};
use forgechain::client::PeerClient;
use forgechain::config::NodeConfig;
use forgechain::crypto::NodeKey;
use forgechain::genesis::Genesis;
use forgechain::node::Node;
use forgechain::storage::RocksStorage;
use forgechain::worker::Worker;

#[derive(Parser)]
#[command(author, version, about = "Proof-of-work account ledger node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the node from an on-disk configuration
    Run {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Write a starter configuration, genesis file, and node key
    Init {
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Commands::Run { config } => run(config).await,
        Commands::Init { dir } => init(dir),
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    if !config_path.exists() {
        bail!(
            "no configuration at {}; run `forgechain init` first",
            config_path.display()
        );
    }
    let config = NodeConfig::load(&config_path)?;
    config.ensure_directories()?;

    let genesis = Genesis::load(&config.genesis_path)?;
    let key = NodeKey::load_or_create(&config.key_path)?;
    let beneficiary = key.account_id();
    info!(account = %beneficiary, "node identity loaded");

    let storage = Arc::new(RocksStorage::open(&config.data_dir.join("db"))?);
    let node = Node::new(
        genesis,
        storage,
        beneficiary,
        config.host.clone(),
        config.origin_peers(),
    )?;
    let handle = node.handle();

    let worker = Worker::start(handle.clone(), PeerClient::new()?).await;
    let state = AppState {
        node: handle.clone(),
        worker: worker.clone(),
    };
    let api_task = tokio::spawn(api::serve(state, config.api_listen));

    tokio::select! {
        result = api_task => {
            result??;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    worker.shutdown().await;
    handle.close()?;
    Ok(())
}

/// Lays down everything `run` expects: node.toml, genesis.json, and a fresh
/// keystore, all relative to the chosen directory.
fn init(dir: PathBuf) -> Result<()> {
    let config = NodeConfig::default();
    let config_path = dir.join("config/node.toml");
    if config_path.exists() {
        bail!("{} already exists, refusing to overwrite", config_path.display());
    }
    config.save(&config_path)?;
    Genesis::default().save(&dir.join(&config.genesis_path))?;
    let key = NodeKey::load_or_create(&dir.join(&config.key_path))?;
    info!(
        account = %key.account_id(),
        dir = %dir.display(),
        "node workspace initialized"
    );
    Ok(())
}
