//! ledgertap - ledger event ingestion
//!
//! This library pulls contract events from an Ethereum-compatible ledger in
//! bounded block ranges, persists them idempotently in RocksDB, and tracks a
//! per-source cursor so ingestion resumes where it stopped.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Ingestion modules
pub mod abi;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod rpc;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the main types for convenience
pub use config::{EventSource, IngestConfig};
pub use engine::{Engine, IngestResult};
pub use error::CycleError;
pub use ledger::{LedgerEvent, LedgerReader, RpcLedgerReader};
pub use records::{ArgValue, CursorRecord, EventArgs, EventKey, RawEvent, UpsertOutcome};
pub use store::{CursorStore, RawEventStore, RocksEventStore};
