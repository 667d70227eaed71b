//! Event cursor engine
//!
//! Drives one ingestion cycle per event source: plan the next block range
//! from the cursor, the ledger head, the batch limit and the lag tolerance,
//! fetch the events of that range, persist them idempotently, and only then
//! advance the cursor.
//!
//! A cycle that fails anywhere before the cursor write leaves the cursor
//! untouched, so the next tick re-reads the same range. Because persistence
//! is upsert-or-skip, re-reading is harmless: events are delivered to the
//! store at least once and stored exactly once.

use crate::config::EventSource;
use crate::error::CycleError;
use crate::ledger::{LedgerEvent, LedgerReader};
use crate::lock::SourceLocks;
use crate::records::{
    now_unix, truncate_error_message, RawEvent, TRANSLATION_ERROR_CODE, UNKNOWN_EVENT_NAME,
};
use crate::store::{CursorStore, RawEventStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inclusive block range read by one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub source_id: String,
    /// None when there was nothing to read (caught up, or held back by lag)
    pub range: Option<BlockRange>,
    /// Events stored for the first time
    pub events_ingested: usize,
    /// Events of the range that were already stored
    pub events_skipped: usize,
    /// Events that could not be translated (stored as error stubs or dropped)
    pub translation_errors: usize,
    /// Cursor after the cycle
    pub cursor: u64,
}

impl IngestResult {
    fn empty(source_id: &str, cursor: u64) -> Self {
        Self {
            source_id: source_id.to_string(),
            range: None,
            events_ingested: 0,
            events_skipped: 0,
            translation_errors: 0,
            cursor,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "source_id": self.source_id,
            "range": self.range.map(|r| json!({ "from": r.from, "to": r.to })),
            "events_ingested": self.events_ingested,
            "events_skipped": self.events_skipped,
            "translation_errors": self.translation_errors,
            "cursor": self.cursor,
        })
    }
}

/// Compute the range of the next cycle.
///
/// The lag tolerance is subtracted from the head before any range math, and
/// the range never extends more than `batch_limit` blocks past the cursor.
/// Returns None when the range would be empty.
pub fn plan_range(
    cursor: u64,
    head: u64,
    batch_limit: u64,
    lag_tolerance: u64,
) -> Option<BlockRange> {
    let safe_head = head.saturating_sub(lag_tolerance);
    if safe_head <= cursor {
        return None;
    }
    let end = cursor.saturating_add(batch_limit).min(safe_head);
    if end <= cursor {
        return None;
    }
    Some(BlockRange {
        from: cursor,
        to: end,
    })
}

/// Translation of one ledger event into a storable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translated {
    /// Cleanly translated
    Event(RawEvent),
    /// Keyable but undecodable: stored with an error code for inspection
    Stub(RawEvent),
    /// Not even keyable; reported and left out
    Dropped(String),
}

/// Normalize a transaction hash to lower-case hex without 0x prefix.
pub fn normalize_tx_hash(hash: &str) -> Result<String, String> {
    let trimmed = hash.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err("missing transaction hash".to_string());
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("transaction hash '{}' is not hex", hash));
    }
    Ok(digits.to_ascii_lowercase())
}

/// Turn a ledger event into a raw event of `source`.
pub fn translate_event(source: &EventSource, event: LedgerEvent, now: u64) -> Translated {
    let transaction_hash = match normalize_tx_hash(&event.transaction_hash) {
        Ok(hash) => hash,
        Err(reason) => {
            return Translated::Dropped(format!(
                "block {} log {}: {}",
                event.block_number, event.log_index, reason
            ))
        }
    };

    let problem = match (&event.decode_error, &event.event_name) {
        (Some(reason), _) => Some(reason.clone()),
        (None, None) => Some("event has no name".to_string()),
        (None, Some(name)) if name.trim().is_empty() => Some("event has no name".to_string()),
        _ => None,
    };

    let mut record = RawEvent {
        source_id: source.source_id.clone(),
        event_type: source.event_type.clone(),
        block_number: event.block_number,
        event_name: event
            .event_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_EVENT_NAME.to_string()),
        payload: event.args,
        transaction_hash,
        log_index: event.log_index,
        processed: false,
        error_code: 0,
        error_message: String::new(),
        row_created: now,
        row_updated: now,
    };

    match problem {
        None => Translated::Event(record),
        Some(reason) => {
            record.error_code = TRANSLATION_ERROR_CODE;
            record.error_message = truncate_error_message(&reason);
            Translated::Stub(record)
        }
    }
}

/// The ingestion engine, configured with a table of event sources and its
/// three collaborators.
pub struct Engine {
    ledger: Arc<dyn LedgerReader>,
    cursors: Arc<dyn CursorStore>,
    events: Arc<dyn RawEventStore>,
    sources: Vec<EventSource>,
    locks: SourceLocks,
}

impl Engine {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        cursors: Arc<dyn CursorStore>,
        events: Arc<dyn RawEventStore>,
        sources: Vec<EventSource>,
    ) -> Self {
        Self {
            ledger,
            cursors,
            events,
            sources,
            locks: SourceLocks::new(),
        }
    }

    /// Configured sources in configuration order.
    pub fn sources(&self) -> &[EventSource] {
        &self.sources
    }

    pub fn source(&self, source_id: &str) -> Option<&EventSource> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Run one cycle of a configured source.
    pub async fn run_source(&self, source_id: &str) -> Result<IngestResult, CycleError> {
        let source = self
            .source(source_id)
            .ok_or_else(|| CycleError::config(source_id, "unknown source"))?
            .clone();
        self.run_cycle(&source).await
    }

    /// Run one cycle of every configured source, one after another.
    ///
    /// A failing source does not stop the others.
    pub async fn run_all(&self) -> Vec<(String, Result<IngestResult, CycleError>)> {
        let mut results = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let result = self.run_cycle(source).await;
            results.push((source.source_id.clone(), result));
        }
        results
    }

    /// Run one ingestion cycle of `source`.
    pub async fn run_cycle(&self, source: &EventSource) -> Result<IngestResult, CycleError> {
        let _guard = self
            .locks
            .try_acquire(&source.source_id)
            .ok_or_else(|| CycleError::Busy(source.source_id.clone()))?;

        source
            .validate()
            .map_err(|reason| CycleError::config(&source.source_id, reason))?;

        let cursor = self
            .cursors
            .read_cursor(&source.source_id, source.genesis_block)
            .map_err(CycleError::Store)?;

        let head = self
            .ledger
            .current_head_block()
            .await
            .map_err(CycleError::Ledger)?;
        debug!("{}: cursor={} head={}", source.source_id, cursor, head);

        let range = match plan_range(cursor, head, source.batch_limit, source.lag_tolerance) {
            Some(range) => range,
            None => {
                debug!(
                    "{}: nothing to read (cursor={}, head={}, lag={})",
                    source.source_id, cursor, head, source.lag_tolerance
                );
                return Ok(IngestResult::empty(&source.source_id, cursor));
            }
        };

        info!(
            "{}: reading events from {} to {}",
            source.source_id, range.from, range.to
        );
        let ledger_events = self
            .ledger
            .get_events(&source.source_id, range.from, range.to)
            .await
            .map_err(CycleError::Ledger)?;
        info!("{}: read {} events", source.source_id, ledger_events.len());

        let now = now_unix();
        let mut records = Vec::with_capacity(ledger_events.len());
        let mut translation_errors = 0;
        for event in ledger_events {
            match translate_event(source, event, now) {
                Translated::Event(record) => records.push(record),
                Translated::Stub(record) => {
                    warn!(
                        "{}: storing undecodable event tx={} log={}: {}",
                        source.source_id,
                        record.transaction_hash,
                        record.log_index,
                        record.error_message
                    );
                    translation_errors += 1;
                    records.push(record);
                }
                Translated::Dropped(reason) => {
                    warn!("{}: dropping unkeyable event: {}", source.source_id, reason);
                    translation_errors += 1;
                }
            }
        }

        let outcome = self
            .events
            .upsert_batch(&records)
            .map_err(CycleError::Store)?;

        // Persisted; only now may the cursor move past the range
        self.cursors
            .write_cursor(&source.source_id, range.to)
            .map_err(CycleError::Store)?;

        info!(
            "{}: stored {} new events ({} already present), cursor {} -> {}",
            source.source_id, outcome.inserted, outcome.skipped, cursor, range.to
        );

        Ok(IngestResult {
            source_id: source.source_id.clone(),
            range: Some(range),
            events_ingested: outcome.inserted,
            events_skipped: outcome.skipped,
            translation_errors,
            cursor: range.to,
        })
    }
}
