//! Record types for ingested ledger events
//!
//! These structs represent the data stored in the event store.
//! They use postcard for binary serialization, which is compact and deterministic.

use alloy_primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Error code written on a stub record whose ledger event could not be translated.
pub const TRANSLATION_ERROR_CODE: i32 = 1;

/// Event name used on stub records when the ledger did not supply one.
pub const UNKNOWN_EVENT_NAME: &str = "UNKNOWN";

/// Longest error message stored on a record, in bytes.
pub const MAX_ERROR_MESSAGE_LEN: usize = 256;

/// A single decoded event argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgValue {
    Address(Address),
    Uint(U256),
    Int(#[serde(with = "i256_raw")] I256),
    Bool(bool),
    /// `bytes1`..`bytes32`, right-trimmed to the declared width
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    /// Indexed dynamic value; the ledger only exposes its keccak hash
    Hash(B256),
    Array(Vec<ArgValue>),
}

impl ArgValue {
    /// Render the value as JSON for CLI output and downstream consumers.
    ///
    /// Integers are rendered as decimal strings so that 256-bit values survive
    /// JSON number limits.
    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Address(addr) => json!(format!("0x{:x}", addr)),
            ArgValue::Uint(v) => json!(v.to_string()),
            ArgValue::Int(v) => json!(v.to_string()),
            ArgValue::Bool(b) => json!(b),
            ArgValue::FixedBytes(b) | ArgValue::Bytes(b) => {
                json!(format!("0x{}", hex::encode(b)))
            }
            ArgValue::String(s) => json!(s),
            ArgValue::Hash(h) => json!(format!("0x{:x}", h)),
            ArgValue::Array(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
        }
    }
}

/// Ordered argument mapping of one event (declaration order of the ABI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArgs(pub Vec<(String, ArgValue)>);

impl EventArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: ArgValue) {
        self.0.push((name.into(), value));
    }

    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

/// Unique identity of a raw event: its ledger coordinates within one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub source_id: String,
    /// Lower-case hex, no 0x prefix
    pub transaction_hash: String,
    pub log_index: u64,
}

/// One ingested ledger event.
///
/// Created exactly once per ledger event by the engine. Only `processed`,
/// `error_code`, `error_message` and `row_updated` change afterwards, and only
/// through downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source_id: String,
    /// Logical event-type tag of the source (e.g. "REGISTRY", "OCCAM_SNET_AIRDROP")
    pub event_type: String,
    pub block_number: u64,
    pub event_name: String,
    pub payload: EventArgs,
    /// Lower-case hex, no 0x prefix
    pub transaction_hash: String,
    pub log_index: u64,
    pub processed: bool,
    /// 0 when the event was translated cleanly
    pub error_code: i32,
    pub error_message: String,
    /// Unix epoch seconds
    pub row_created: u64,
    /// Unix epoch seconds
    pub row_updated: u64,
}

impl RawEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            source_id: self.source_id.clone(),
            transaction_hash: self.transaction_hash.clone(),
            log_index: self.log_index,
        }
    }

    /// JSON view used by the CLI.
    pub fn to_json(&self) -> Value {
        json!({
            "source_id": self.source_id,
            "event_type": self.event_type,
            "block_number": self.block_number,
            "event": self.event_name,
            "payload": self.payload.to_json(),
            "transaction_hash": self.transaction_hash,
            "log_index": self.log_index,
            "processed": self.processed,
            "error_code": self.error_code,
            "error_message": self.error_message,
            "row_created": self.row_created,
            "row_updated": self.row_updated,
        })
    }
}

/// Persisted cursor for one event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Last block whose events are durably stored
    pub last_block: u64,
    /// Unix epoch seconds of the last write
    pub updated_at: u64,
}

/// Result of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Records written for the first time
    pub inserted: usize,
    /// Records already present (left untouched)
    pub skipped: usize,
}

/// Cut an error message to [`MAX_ERROR_MESSAGE_LEN`] bytes on a char boundary.
pub fn truncate_error_message(message: &str) -> String {
    let mut cut = message.len().min(MAX_ERROR_MESSAGE_LEN);
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message[..cut].to_string()
}

/// Current time as unix epoch seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serialize I256 through its raw two's-complement U256 representation.
mod i256_raw {
    use alloy_primitives::{I256, U256};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        value.into_raw().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        Ok(I256::from_raw(U256::deserialize(deserializer)?))
    }
}
