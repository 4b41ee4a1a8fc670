use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::prelude::*;

use quorumdb::codec::UnknownElements;
use quorumdb::common::{Config, Ed25519Scheme};
use quorumdb::{LocalStore, NodeServer, StaticSchema};

#[derive(Parser, Debug)]
#[command(name = "quorumdb-node")]
#[command(about = "QuorumDB node - replicated data store with quorum coordination")]
struct Args {
    /// Path to the node configuration file (TOML)
    #[arg(short, long, default_value = "./quorumdb.toml")]
    config: PathBuf,

    /// Override the node ID from the configuration
    #[arg(short, long)]
    id: Option<String>,

    /// Override the bind address from the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Treat unknown wire elements as errors instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(id) = args.id {
        config.node_id = id;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse()?;
    }

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Starting QuorumDB node {}", quorumdb::BUILD_INFO);
    tracing::info!("Node ID: {}", config.node_id);
    tracing::info!("Listening on: {}", config.bind_addr);
    tracing::info!("Network: {}", config.network_id);
    tracing::info!("Peers: {}", config.peers.len());
    tracing::info!("Tables: {}", config.tables.len());

    let schema = Arc::new(StaticSchema::from_config(&config)?);
    let store = Arc::new(LocalStore::new(config.node_id.clone(), schema));
    let scheme = Arc::new(Ed25519Scheme);
    let policy = if args.strict {
        UnknownElements::Error
    } else {
        UnknownElements::Skip
    };

    let server = NodeServer::new(config.bind_addr, store, scheme, policy);

    tokio::select! {
        res = server.serve() => {
            if let Err(e) = res {
                tracing::error!("Node server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
