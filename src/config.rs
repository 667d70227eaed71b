//! Event source configuration
//!
//! Loads the table of tracked contracts from a JSON file:
//!
//! ```json
//! {
//!   "genesis_block": 0,
//!   "lag_tolerance": 5,
//!   "sources": [
//!     {
//!       "source_id": "MPE",
//!       "address": "0x5e592F9b1d303183d963635f895f0f0C48284f4e",
//!       "events": ["event ChannelOpen(uint256 channelId, uint256 nonce, address indexed sender, address signer, address indexed recipient, bytes32 indexed groupId, uint256 amount, uint256 expiration)"]
//!     }
//!   ]
//! }
//! ```
//!
//! `event_type`, `batch_limit`, `lag_tolerance` and `genesis_block` are
//! optional per source. Missing values come from the built-in table of known
//! sources, then from the top-level defaults.

use crate::abi::ContractAbi;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Blocks read per cycle when neither the source nor the built-in table says otherwise.
pub const DEFAULT_BATCH_LIMIT: u64 = 50_000;

/// Longest accepted source id.
pub const MAX_SOURCE_ID_LEN: usize = 64;

/// A logical ledger feed tracked independently (one contract's events).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSource {
    /// Stable unique id, also the cursor key
    pub source_id: String,
    /// Event-type tag written on every raw event of this source
    pub event_type: String,
    /// Maximum block-range width read per cycle
    pub batch_limit: u64,
    /// Blocks kept behind the ledger head
    pub lag_tolerance: u64,
    /// Cursor value used before the first ingestion
    pub genesis_block: u64,
}

impl EventSource {
    /// Create a source whose event type is its id and whose genesis is block 0.
    pub fn new(source_id: impl Into<String>, batch_limit: u64, lag_tolerance: u64) -> Self {
        let source_id = source_id.into();
        Self {
            event_type: source_id.clone(),
            source_id,
            batch_limit,
            lag_tolerance,
            genesis_block: 0,
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_genesis_block(mut self, genesis_block: u64) -> Self {
        self.genesis_block = genesis_block;
        self
    }

    /// Check the invariants a cycle relies on.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.source_id.is_empty() {
            return Err("source_id must not be empty".to_string());
        }
        if self.source_id.len() > MAX_SOURCE_ID_LEN {
            return Err(format!(
                "source_id '{}' is longer than {} bytes",
                self.source_id, MAX_SOURCE_ID_LEN
            ));
        }
        if self.batch_limit == 0 {
            return Err(format!(
                "batch_limit of source '{}' must be positive",
                self.source_id
            ));
        }
        Ok(())
    }
}

/// Defaults of a source known from the platform deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownSource {
    pub source_id: &'static str,
    pub event_type: &'static str,
    pub batch_limit: u64,
}

const fn known(
    source_id: &'static str,
    event_type: &'static str,
    batch_limit: u64,
) -> KnownSource {
    KnownSource {
        source_id,
        event_type,
        batch_limit,
    }
}

/// Contracts of the platform deployment and their ingestion defaults.
pub const KNOWN_SOURCES: &[KnownSource] = &[
    known("REGISTRY", "REGISTRY", 50_000),
    known("MPE", "MPE", 50_000),
    known("RFAI", "RFAI", 50_000),
    known("TokenStake", "TOKEN_STAKE", 50_000),
    known("SingularityAirdrop", "SINGULARITYNET_AIRDROP", 50_000),
    known("SingularityOccamAirdrop", "OCCAM_SNET_AIRDROP", 50_000),
    known("ConverterAGIX", "CONVERTER_AGIX", 50_000),
    known("ConverterNTX", "CONVERTER_NTX", 500_000),
    known("ConverterRJV", "CONVERTER_RJV", 500_000),
    known("ConverterCGV", "CONVERTER_CGV", 500_000),
];

/// Look up a source of the platform deployment by id.
pub fn known_source(source_id: &str) -> Option<&'static KnownSource> {
    KNOWN_SOURCES.iter().find(|k| k.source_id == source_id)
}

/// The contract behind a source: where its logs live and how to decode them.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub address: Address,
    pub abi: ContractAbi,
}

/// One configured source with its contract.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source: EventSource,
    pub contract: ContractBinding,
}

/// Loaded and validated ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub sources: Vec<SourceConfig>,
}

impl IngestConfig {
    pub fn event_sources(&self) -> Vec<EventSource> {
        self.sources.iter().map(|s| s.source.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    genesis_block: u64,
    #[serde(default)]
    lag_tolerance: u64,
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceEntry {
    source_id: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    batch_limit: Option<u64>,
    #[serde(default)]
    lag_tolerance: Option<u64>,
    #[serde(default)]
    genesis_block: Option<u64>,
    address: String,
    events: Vec<String>,
}

/// Load the source table from a JSON file.
pub fn load_config(path: &Path) -> Result<IngestConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    parse_config(&contents).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse the source table from JSON text.
///
/// Structural problems (bad JSON, duplicate ids, bad addresses, bad event
/// declarations) reject the whole file. A source that fails
/// [`EventSource::validate`] is kept and only logged: its cycles fail with a
/// configuration error while the other sources keep running.
pub fn parse_config(contents: &str) -> Result<IngestConfig> {
    let file: ConfigFile = serde_json::from_str(contents).context("Failed to parse config JSON")?;
    if file.sources.is_empty() {
        anyhow::bail!("Config has no sources");
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(file.sources.len());
    for (position, entry) in file.sources.into_iter().enumerate() {
        if !seen.insert(entry.source_id.clone()) {
            anyhow::bail!("Duplicate source_id '{}'", entry.source_id);
        }

        let known = known_source(&entry.source_id);
        let source = EventSource {
            event_type: entry
                .event_type
                .or_else(|| known.map(|k| k.event_type.to_string()))
                .unwrap_or_else(|| entry.source_id.clone()),
            batch_limit: entry
                .batch_limit
                .or_else(|| known.map(|k| k.batch_limit))
                .unwrap_or(DEFAULT_BATCH_LIMIT),
            lag_tolerance: entry.lag_tolerance.unwrap_or(file.lag_tolerance),
            genesis_block: entry.genesis_block.unwrap_or(file.genesis_block),
            source_id: entry.source_id,
        };
        if let Err(reason) = source.validate() {
            warn!("Source #{} is misconfigured and will not ingest: {}", position, reason);
        }

        let address = parse_address(&entry.address)
            .with_context(|| format!("Invalid address of source '{}'", source.source_id))?;
        let abi = ContractAbi::parse(&entry.events)
            .with_context(|| format!("Invalid events of source '{}'", source.source_id))?;
        if abi.is_empty() {
            anyhow::bail!("Source '{}' declares no events", source.source_id);
        }

        sources.push(SourceConfig {
            source,
            contract: ContractBinding { address, abi },
        });
    }

    Ok(IngestConfig { sources })
}

/// Pad an odd-length hex string with a leading zero.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix.
fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(pad_hex_string(s))
        .with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!("Address must be 20 bytes (40 hex chars), got {} bytes", bytes.len());
    }

    Ok(Address::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TRANSFER: &str =
        "event Transfer(address indexed from, address indexed to, uint256 value)";

    fn config_json(extra: &str) -> String {
        format!(
            r#"{{
                "genesis_block": 100,
                "lag_tolerance": 3,
                "sources": [
                    {{
                        "source_id": "SingularityOccamAirdrop",
                        "address": "0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb",
                        "events": ["{TRANSFER}"]
                    }},
                    {{
                        "source_id": "CustomFeed",
                        "address": "dAC17F958D2ee523a2206206994597C13D831ec7",
                        "batch_limit": 10,
                        "lag_tolerance": 0,
                        "genesis_block": 7,
                        "events": ["{TRANSFER}"]
                        {extra}
                    }}
                ]
            }}"#
        )
    }

    #[test]
    fn test_load_config_applies_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", config_json("")).unwrap();
        file.flush().unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sources.len(), 2);

        let occam = &config.sources[0].source;
        assert_eq!(occam.event_type, "OCCAM_SNET_AIRDROP");
        assert_eq!(occam.batch_limit, 50_000);
        assert_eq!(occam.lag_tolerance, 3);
        assert_eq!(occam.genesis_block, 100);

        let custom = &config.sources[1].source;
        assert_eq!(custom.event_type, "CustomFeed");
        assert_eq!(custom.batch_limit, 10);
        assert_eq!(custom.lag_tolerance, 0);
        assert_eq!(custom.genesis_block, 7);
        assert_eq!(config.sources[1].contract.abi.len(), 1);
    }

    #[test]
    fn test_converter_sources_read_wider_batches() {
        assert_eq!(known_source("ConverterNTX").unwrap().batch_limit, 500_000);
        assert_eq!(known_source("REGISTRY").unwrap().batch_limit, 50_000);
        assert!(known_source("registry").is_none());
    }

    #[test]
    fn test_zero_batch_limit_is_kept_but_invalid() {
        let json = config_json("").replace("\"batch_limit\": 10", "\"batch_limit\": 0");
        let config = parse_config(&json).unwrap();
        assert!(config.sources[1].source.validate().is_err());
        assert!(config.sources[0].source.validate().is_ok());
    }

    #[test]
    fn test_structural_errors_reject_the_file() {
        // duplicate id
        let dup = config_json("").replace("CustomFeed", "SingularityOccamAirdrop");
        assert!(parse_config(&dup).is_err());
        // unknown field
        assert!(parse_config(&config_json(r#", "contract": "x""#)).is_err());
        // bad address
        let bad_addr =
            config_json("").replace("dAC17F958D2ee523a2206206994597C13D831ec7", "0x1234");
        assert!(parse_config(&bad_addr).is_err());
        // no sources
        assert!(parse_config(r#"{"sources": []}"#).is_err());
        // missing file
        assert!(load_config(Path::new("/nonexistent/ledgertap.json")).is_err());
    }

    #[test]
    fn test_event_source_validation() {
        assert!(EventSource::new("MPE", 1, 0).validate().is_ok());
        assert!(EventSource::new("", 1, 0).validate().is_err());
        assert!(EventSource::new("MPE", 0, 0).validate().is_err());
        assert!(EventSource::new("x".repeat(65), 1, 0).validate().is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr1 = parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        let addr2 = parse_address("0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        assert_eq!(addr1, addr2);
    }
}
