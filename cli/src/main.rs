//! liraindex — index LIRA protocol contract events into a SQLite read model.
//!
//! Usage:
//!   liraindex run [--network <name>] [--database <url>]
//!   liraindex info [--json]
//!   liraindex topics

mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liraindex_core::config::IndexerSettings;
use liraindex_core::handler::HandlerFamily;
use liraindex_core::types::{ContractKind, EventKind};
use liraindex_evm::{abi, JsonRpcChainClient, OrchestratorBuilder, WsConfig};
use liraindex_storage::SqliteStorage;
use tracing::info;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "liraindex",
    version,
    about = "LIRA protocol contract event indexer",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill from the last checkpoint, then follow the chain until interrupted
    Run {
        /// Network slug, overrides INDEXER_NETWORK
        #[arg(short, long)]
        network: Option<String>,

        /// Database URL or path, overrides DATABASE_URL
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Print the resolved settings and tracked contracts
    Info {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the event signature and topic0 of every routed event
    Topics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { network, database } => cmd_run(network, database).await,
        Commands::Info { json } => cmd_info(json),
        Commands::Topics => {
            cmd_topics();
            Ok(())
        }
    }
}

fn load_settings(network: Option<String>) -> Result<IndexerSettings> {
    let settings = IndexerSettings::from_lookup(&|key| {
        if key == "INDEXER_NETWORK" {
            if let Some(name) = &network {
                return Some(name.clone());
            }
        }
        std::env::var(key).ok()
    })
    .context("loading indexer settings")?;
    Ok(settings)
}

async fn cmd_run(network: Option<String>, database: Option<String>) -> Result<()> {
    let mut settings = load_settings(network)?;
    if let Some(url) = database {
        settings.database_url = url;
    }
    logging::init_tracing(&settings.log_level, settings.log_json);

    info!(
        network = %settings.network.name,
        chain_id = settings.network.chain_id,
        rpc = %settings.network.rpc_url,
        database = %settings.database_url,
        "starting liraindex"
    );

    let store = Arc::new(
        SqliteStorage::open(&settings.database_url)
            .await
            .with_context(|| format!("opening database {}", settings.database_url))?,
    );

    let mut client = JsonRpcChainClient::new(settings.network.rpc_url.clone(), RPC_TIMEOUT)
        .context("building RPC client")?;
    if let Some(ws_url) = &settings.network.ws_url {
        client = client.with_ws(ws_url.clone(), WsConfig::default());
    }

    let orchestrator = OrchestratorBuilder::from_settings(&settings)
        .client(Arc::new(client))
        .store(store)
        .build()
        .context("building orchestrator")?;

    let runner = orchestrator.clone();
    let mut startup = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        joined = &mut startup => {
            joined.context("startup task panicked")?.context("starting indexer")?;
            info!("backfill complete, following chain head");
            shutdown_signal().await;
        }
        _ = shutdown_signal() => {}
    }

    info!("shutdown requested");
    orchestrator.stop().await.context("stopping indexer")?;
    let stats = orchestrator.stats();
    info!(
        applied = stats.applied,
        failed = stats.failed,
        unrouted = stats.unrouted,
        range_failures = stats.range_failures,
        stale_live = stats.stale_live,
        "liraindex stopped"
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn cmd_info(json: bool) -> Result<()> {
    let settings = load_settings(None)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    println!("liraindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Network:       {} (chain id {})", settings.network.name, settings.network.chain_id);
    println!("RPC:           {}", settings.network.rpc_url);
    println!(
        "WebSocket:     {}",
        settings.network.ws_url.as_deref().unwrap_or("(none, polling only)")
    );
    println!("Start block:   {}", settings.network.start_block);
    println!("Poll interval: {}ms", settings.poll_interval_ms);
    println!("Batch size:    {} blocks", settings.batch_size);
    println!("Retry:         {} attempts, {}ms base delay", settings.retry_attempts, settings.retry_delay_ms);
    println!("Database:      {}", settings.database_url);
    println!();
    println!("Contracts:");
    for contract in &settings.contracts {
        let address = contract.address.as_deref().unwrap_or("(not configured)");
        println!("  {:<22} {}", contract.kind.name(), address);
        for name in &contract.events {
            let routed = EventKind::from_name(name)
                .and_then(|event| HandlerFamily::route(contract.kind, event));
            match routed {
                Some(family) => println!("      {name:<24} -> {family:?}"),
                None => println!("      {name:<24} (not indexed)"),
            }
        }
    }
    Ok(())
}

fn cmd_topics() {
    for kind in ContractKind::ALL {
        println!("{}", kind.name());
        for event in EventKind::ALL {
            if HandlerFamily::route(kind, event).is_some() {
                println!("  {}  {}", abi::topic0_hex(event), abi::signature(event));
            }
        }
    }
}
