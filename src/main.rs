//! eventctl - ledger event ingestion CLI tool
//!
//! Inspect cursors and stored events, record consumer outcomes, and run
//! ingestion ticks by hand against the RocksDB store.

use ledgertap::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
