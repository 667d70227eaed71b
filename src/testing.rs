//! In-memory collaborators for engine and scheduler tests

use crate::ledger::{LedgerEvent, LedgerReader};
use crate::records::{
    now_unix, truncate_error_message, CursorRecord, EventKey, RawEvent, UpsertOutcome,
};
use crate::store::{CursorStore, RawEventStore};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted ledger: a settable head, per-source event lists and failure switches.
pub struct FakeLedger {
    head: AtomicU64,
    head_fails: AtomicBool,
    head_delay: Mutex<Option<Duration>>,
    events: Mutex<HashMap<String, Vec<LedgerEvent>>>,
    failing_sources: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, u64, u64)>>,
}

impl FakeLedger {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            head_fails: AtomicBool::new(false),
            head_delay: Mutex::new(None),
            events: Mutex::new(HashMap::new()),
            failing_sources: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn fail_head(&self, fail: bool) {
        self.head_fails.store(fail, Ordering::SeqCst);
    }

    /// Make every head query sleep first.
    pub fn delay_head(&self, delay: Duration) {
        *self.head_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_source(&self, source_id: &str) {
        self.failing_sources
            .lock()
            .unwrap()
            .insert(source_id.to_string());
    }

    pub fn push_event(&self, source_id: &str, event: LedgerEvent) {
        self.events
            .lock()
            .unwrap()
            .entry(source_id.to_string())
            .or_default()
            .push(event);
    }

    /// Every `get_events` call as (source, from, to).
    pub fn calls(&self) -> Vec<(String, u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerReader for FakeLedger {
    async fn current_head_block(&self) -> Result<u64> {
        let delay = *self.head_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.head_fails.load(Ordering::SeqCst) {
            anyhow::bail!("node unreachable");
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_events(
        &self,
        source_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>> {
        if self.failing_sources.lock().unwrap().contains(source_id) {
            anyhow::bail!("eth_getLogs failed for {}", source_id);
        }
        self.calls
            .lock()
            .unwrap()
            .push((source_id.to_string(), from_block, to_block));
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(source_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Cursor and event store held in memory, with failure switches.
#[derive(Default)]
pub struct MemoryStore {
    cursors: Mutex<BTreeMap<String, CursorRecord>>,
    events: Mutex<Vec<RawEvent>>,
    fail_upserts: AtomicBool,
    fail_cursor_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cursor_writes(&self, fail: bool) {
        self.fail_cursor_writes.store(fail, Ordering::SeqCst);
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Stored events in the order they were first inserted.
    pub fn insertion_order(&self) -> Vec<RawEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl CursorStore for MemoryStore {
    fn get_cursor(&self, source_id: &str) -> Result<Option<CursorRecord>> {
        Ok(self.cursors.lock().unwrap().get(source_id).copied())
    }

    fn write_cursor(&self, source_id: &str, block: u64) -> Result<()> {
        if self.fail_cursor_writes.load(Ordering::SeqCst) {
            anyhow::bail!("cursor write failed");
        }
        self.cursors.lock().unwrap().insert(
            source_id.to_string(),
            CursorRecord {
                last_block: block,
                updated_at: now_unix(),
            },
        );
        Ok(())
    }

    fn list_cursors(&self) -> Result<Vec<(String, CursorRecord)>> {
        Ok(self
            .cursors
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| (id.clone(), *c))
            .collect())
    }
}

impl RawEventStore for MemoryStore {
    fn upsert_batch(&self, records: &[RawEvent]) -> Result<UpsertOutcome> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            anyhow::bail!("event store unavailable");
        }
        let mut events = self.events.lock().unwrap();
        let mut outcome = UpsertOutcome::default();
        for record in records {
            let key = record.key();
            if events.iter().any(|e| e.key() == key) {
                outcome.skipped += 1;
            } else {
                events.push(record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    fn get_event(&self, key: &EventKey) -> Result<Option<RawEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| &e.key() == key)
            .cloned())
    }

    fn get_events_in_range(
        &self,
        source_id: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let mut events: Vec<RawEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.source_id == source_id
                    && e.block_number >= start_block
                    && e.block_number <= end_block
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    fn list_unprocessed(&self, source_id: &str, limit: usize) -> Result<Vec<RawEvent>> {
        let mut events = self.get_events_in_range(source_id, 0, u64::MAX)?;
        events.retain(|e| !e.processed);
        events.truncate(limit);
        Ok(events)
    }

    fn mark_processed(&self, key: &EventKey, error_code: i32, error_message: &str) -> Result<bool> {
        let mut events = self.events.lock().unwrap();
        match events.iter_mut().find(|e| &e.key() == key) {
            Some(event) => {
                event.processed = true;
                event.error_code = error_code;
                event.error_message = truncate_error_message(error_message);
                event.row_updated = now_unix();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
