//! Ledger reader trait and the JSON-RPC implementation
//!
//! The engine only sees [`LedgerReader`]: the current head and the events of
//! one source in a block range. [`RpcLedgerReader`] answers both from an
//! Ethereum node, decoding logs with each source's configured event ABI.

use crate::config::{ContractBinding, IngestConfig};
use crate::records::EventArgs;
use crate::rpc::RpcClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One event as reported by the ledger, before translation into a raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub block_number: u64,
    /// Transaction hash exactly as the ledger reported it
    pub transaction_hash: String,
    pub log_index: u64,
    /// None when the log could not be matched to a declared event
    pub event_name: Option<String>,
    pub args: EventArgs,
    /// Why the log could not be decoded, if it could not
    pub decode_error: Option<String>,
}

impl LedgerEvent {
    /// A cleanly decoded event.
    pub fn decoded(
        block_number: u64,
        transaction_hash: impl Into<String>,
        log_index: u64,
        event_name: impl Into<String>,
        args: EventArgs,
    ) -> Self {
        Self {
            block_number,
            transaction_hash: transaction_hash.into(),
            log_index,
            event_name: Some(event_name.into()),
            args,
            decode_error: None,
        }
    }

    /// An event the reader saw but could not decode.
    pub fn malformed(
        block_number: u64,
        transaction_hash: impl Into<String>,
        log_index: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            block_number,
            transaction_hash: transaction_hash.into(),
            log_index,
            event_name: None,
            args: EventArgs::new(),
            decode_error: Some(reason.into()),
        }
    }
}

/// Read access to an append-only event ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Latest block number known to the ledger.
    async fn current_head_block(&self) -> Result<u64>;

    /// All events of `source_id` with `from_block <= block <= to_block`.
    ///
    /// Identical inputs must yield identical order, so that a retried range
    /// is persisted the same way.
    async fn get_events(
        &self,
        source_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>>;
}

/// Ledger reader backed by an Ethereum JSON-RPC node.
pub struct RpcLedgerReader {
    rpc: RpcClient,
    contracts: HashMap<String, ContractBinding>,
}

impl RpcLedgerReader {
    pub fn new(rpc: RpcClient, contracts: HashMap<String, ContractBinding>) -> Self {
        Self { rpc, contracts }
    }

    /// Build a reader for every source of a configuration.
    pub fn from_config(rpc: RpcClient, config: &IngestConfig) -> Self {
        let contracts = config
            .sources
            .iter()
            .map(|s| (s.source.source_id.clone(), s.contract.clone()))
            .collect();
        Self::new(rpc, contracts)
    }
}

#[async_trait]
impl LedgerReader for RpcLedgerReader {
    async fn current_head_block(&self) -> Result<u64> {
        self.rpc
            .block_number()
            .await
            .context("Failed to get latest block number")
    }

    async fn get_events(
        &self,
        source_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>> {
        let contract = self
            .contracts
            .get(source_id)
            .with_context(|| format!("No contract configured for source '{}'", source_id))?;

        let logs = self
            .rpc
            .get_logs(contract.address, from_block, to_block)
            .await
            .with_context(|| {
                format!(
                    "Failed to get logs of {} for blocks {}..={}",
                    source_id, from_block, to_block
                )
            })?;
        debug!("{}: node returned {} logs", source_id, logs.len());

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                warn!("{}: skipping log removed by reorg", source_id);
                continue;
            }
            let block_number = log.block_number.unwrap_or(from_block);
            let transaction_hash = log.transaction_hash.clone().unwrap_or_default();
            let log_index = log.log_index.unwrap_or_default();

            if log.block_number.is_none() || log.log_index.is_none() {
                events.push(LedgerEvent::malformed(
                    block_number,
                    transaction_hash,
                    log_index,
                    "Log is missing block number or log index",
                ));
                continue;
            }

            let event = match contract.abi.decode_log(&log) {
                Ok((name, args)) => {
                    LedgerEvent::decoded(block_number, transaction_hash, log_index, name, args)
                }
                Err(e) => LedgerEvent::malformed(
                    block_number,
                    transaction_hash,
                    log_index,
                    format!("{:#}", e),
                ),
            };
            events.push(event);
        }

        // Nodes return logs in chain order; sorting pins it for retries
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }
}
