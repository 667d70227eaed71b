//! Ledger event ingester binary
//!
//! Periodically pulls the events of every configured source from the ledger
//! and stores them, advancing one cursor per source.

use anyhow::{Context, Result};
use clap::Parser;
use ledgertap::config::load_config;
use ledgertap::engine::Engine;
use ledgertap::ledger::RpcLedgerReader;
use ledgertap::rpc::RpcClient;
use ledgertap::scheduler::{run_scheduler, SchedulerConfig};
use ledgertap::store::RocksEventStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ledger event ingester
#[derive(Parser)]
#[command(name = "ingester")]
#[command(about = "Ingest contract events from the ledger into the local store")]
struct Args {
    /// RPC endpoint URL (e.g., https://eth.llamarpc.com)
    #[arg(short, long, env = "LEDGERTAP_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Path to the source configuration (JSON)
    #[arg(short, long, env = "LEDGERTAP_CONFIG", default_value = "sources.json")]
    config: PathBuf,

    /// Path to RocksDB database directory
    #[arg(short, long, env = "LEDGERTAP_DB_PATH", default_value = "./ingest_db")]
    db_path: PathBuf,

    /// Seconds between two cycles of one source
    #[arg(
        long,
        env = "LEDGERTAP_POLL_INTERVAL_SECS",
        default_value_t = 12,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_secs: u64,

    /// Seconds before a cycle is abandoned
    #[arg(
        long,
        env = "LEDGERTAP_CYCLE_TIMEOUT_SECS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    cycle_timeout_secs: u64,

    /// Seconds before a single RPC request is abandoned
    #[arg(
        long,
        env = "LEDGERTAP_RPC_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    rpc_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    info!("Starting ledger event ingester");
    info!("RPC URL: {}", args.rpc_url);
    info!("Config: {:?}", args.config);
    info!("Database: {:?}", args.db_path);

    let config = load_config(&args.config)?;
    info!("Loaded {} sources", config.sources.len());

    let rpc = RpcClient::new(args.rpc_url, Duration::from_secs(args.rpc_timeout_secs))
        .context("Failed to create RPC client")?;
    let store = Arc::new(
        RocksEventStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );
    let reader = RpcLedgerReader::from_config(rpc, &config);
    let engine = Arc::new(Engine::new(
        Arc::new(reader),
        store.clone(),
        store,
        config.event_sources(),
    ));

    let scheduler = SchedulerConfig {
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        cycle_timeout: Duration::from_secs(args.cycle_timeout_secs),
    };

    // Handle Ctrl+C gracefully; dropping the scheduler aborts in-flight cycles
    // before their cursor write
    tokio::select! {
        result = run_scheduler(engine, scheduler) => {
            result.context("Scheduler error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    info!("Ingester stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        for flag in ["--poll-interval-secs", "--cycle-timeout-secs", "--rpc-timeout-secs"] {
            assert!(Args::try_parse_from(["ingester", flag, "0"]).is_err(), "{}", flag);
        }
        let args = Args::try_parse_from(["ingester", "--poll-interval-secs", "1"]).unwrap();
        assert_eq!(args.poll_interval_secs, 1);
    }
}
