//! CLI implementation for eventctl
//!
//! Operator interface to the ingestion store: inspect and move cursors,
//! browse raw events, record consumer outcomes, and run a single ingestion
//! tick by hand. All commands output pretty JSON.

use crate::config::load_config;
use crate::engine::{normalize_tx_hash, Engine};
use crate::ledger::RpcLedgerReader;
use crate::records::EventKey;
use crate::rpc::RpcClient;
use crate::store::{CursorStore, RawEventStore, RocksEventStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Event ingestion store CLI tool
#[derive(Parser)]
#[command(name = "eventctl")]
#[command(about = "Inspect and operate the ledger event ingestion store")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, env = "LEDGERTAP_DB_PATH", default_value = "./ingest_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the configured sources and their cursors
    Sources {
        /// Path to the source configuration (JSON)
        #[arg(short, long, env = "LEDGERTAP_CONFIG", default_value = "sources.json")]
        config: PathBuf,
    },
    /// List all stored cursors
    ListCursors,
    /// Get the cursor of a source
    GetCursor {
        /// Source id (e.g. MPE)
        source_id: String,
    },
    /// Set the cursor of a source (moving it back re-ingests from there)
    SetCursor {
        /// Source id (e.g. MPE)
        source_id: String,
        /// Block number
        block: u64,
        /// Allow moving the cursor forwards, leaving the blocks in between unread
        #[arg(long)]
        skip_unread: bool,
    },
    /// List stored events of a source in a block range (inclusive)
    Events {
        /// Source id
        source_id: String,
        /// First block
        from: u64,
        /// Last block
        to: u64,
    },
    /// List the oldest unprocessed events of a source
    Unprocessed {
        /// Source id
        source_id: String,
        /// Maximum number of events
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
    /// Record the consumer outcome of an event
    MarkProcessed {
        /// Source id
        source_id: String,
        /// Transaction hash (hex, with or without 0x prefix)
        transaction_hash: String,
        /// Log index within the transaction's block
        log_index: u64,
        /// Consumer error code (0 = success)
        #[arg(long, default_value_t = 0)]
        error_code: i32,
        /// Consumer error message
        #[arg(long, default_value = "")]
        error_message: String,
    },
    /// Run one ingestion cycle now
    Tick {
        /// Path to the source configuration (JSON)
        #[arg(short, long, env = "LEDGERTAP_CONFIG", default_value = "sources.json")]
        config: PathBuf,
        /// RPC endpoint URL
        #[arg(short, long, env = "LEDGERTAP_RPC_URL", default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
        /// Only this source (default: every configured source)
        #[arg(short, long)]
        source: Option<String>,
    },
}

fn cursor_json(store: &RocksEventStore, source_id: &str) -> Result<Value> {
    Ok(match store.get_cursor(source_id)? {
        Some(cursor) => json!({
            "source_id": source_id,
            "last_block": cursor.last_block,
            "updated_at": cursor.updated_at,
        }),
        None => json!({
            "source_id": source_id,
            "last_block": null,
        }),
    })
}

/// Move the stored cursor of a source, returning the previous one.
///
/// Moving backwards only re-reads blocks and is always allowed. Moving
/// forwards would leave the blocks in between unread, so it is refused unless
/// `skip_unread` is set. A source without a stored cursor counts as being at 0.
pub fn set_cursor(
    store: &dyn CursorStore,
    source_id: &str,
    block: u64,
    skip_unread: bool,
) -> Result<Option<u64>> {
    let previous = store.get_cursor(source_id)?.map(|c| c.last_block);
    let current = previous.unwrap_or(0);
    if block > current && !skip_unread {
        anyhow::bail!(
            "Refusing to skip blocks {}..{} of {} without --skip-unread",
            current + 1,
            block,
            source_id
        );
    }
    store.write_cursor(source_id, block)?;
    Ok(previous)
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksEventStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = match cli.command {
        Commands::Sources { config } => {
            let config = load_config(&config)?;
            let mut sources = Vec::with_capacity(config.sources.len());
            for entry in &config.sources {
                let source = &entry.source;
                sources.push(json!({
                    "source": source,
                    "address": entry.contract.address.to_string(),
                    "events": entry.contract.abi.len(),
                    "valid": source.validate().is_ok(),
                    "cursor": store
                        .read_cursor(&source.source_id, source.genesis_block)?,
                }));
            }
            json!({ "sources": sources })
        }
        Commands::ListCursors => {
            let cursors: Vec<Value> = store
                .list_cursors()?
                .into_iter()
                .map(|(source_id, cursor)| {
                    json!({
                        "source_id": source_id,
                        "last_block": cursor.last_block,
                        "updated_at": cursor.updated_at,
                    })
                })
                .collect();
            json!({ "cursors": cursors })
        }
        Commands::GetCursor { source_id } => cursor_json(&store, &source_id)?,
        Commands::SetCursor {
            source_id,
            block,
            skip_unread,
        } => {
            let previous = set_cursor(&store, &source_id, block, skip_unread)?;
            json!({
                "status": "ok",
                "source_id": source_id,
                "previous_block": previous,
                "last_block": block,
            })
        }
        Commands::Events {
            source_id,
            from,
            to,
        } => {
            let events = store.get_events_in_range(&source_id, from, to)?;
            json!({
                "source_id": source_id,
                "from": from,
                "to": to,
                "count": events.len(),
                "events": events.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
            })
        }
        Commands::Unprocessed { source_id, limit } => {
            let events = store.list_unprocessed(&source_id, limit)?;
            json!({
                "source_id": source_id,
                "count": events.len(),
                "events": events.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
            })
        }
        Commands::MarkProcessed {
            source_id,
            transaction_hash,
            log_index,
            error_code,
            error_message,
        } => {
            let transaction_hash =
                normalize_tx_hash(&transaction_hash).map_err(|e| anyhow::anyhow!(e))?;
            let key = EventKey {
                source_id,
                transaction_hash,
                log_index,
            };
            if !store.mark_processed(&key, error_code, &error_message)? {
                anyhow::bail!("No event {:?}", key);
            }
            json!({
                "status": "ok",
                "source_id": key.source_id,
                "transaction_hash": key.transaction_hash,
                "log_index": key.log_index,
                "error_code": error_code,
            })
        }
        Commands::Tick {
            config,
            rpc_url,
            source,
        } => {
            let config = load_config(&config)?;
            let rpc = RpcClient::new(rpc_url, Duration::from_secs(30))?;
            let reader = RpcLedgerReader::from_config(rpc, &config);
            let store = Arc::new(store);
            let engine = Engine::new(
                Arc::new(reader),
                store.clone(),
                store,
                config.event_sources(),
            );

            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            let results = runtime.block_on(async {
                match source {
                    Some(source_id) => {
                        let result = engine.run_source(&source_id).await;
                        vec![(source_id, result)]
                    }
                    None => engine.run_all().await,
                }
            });

            let results: Vec<Value> = results
                .into_iter()
                .map(|(source_id, result)| match result {
                    Ok(result) => result.to_json(),
                    Err(e) => json!({
                        "source_id": source_id,
                        "error": e.to_string(),
                        "retryable": e.is_retryable(),
                    }),
                })
                .collect();
            json!({ "results": results })
        }
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
