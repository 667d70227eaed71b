//! Cursor and raw event store traits and the RocksDB implementation
//!
//! Provides durable storage for per-source read cursors and ingested raw events.
//! Uses RocksDB with column families for efficient organization.

use crate::keys::{
    decode_block_index_key, decode_cursor_key, encode_block_index_key, encode_block_index_prefix,
    encode_block_index_start, encode_cursor_key, encode_event_key,
};
use crate::records::{
    now_unix, truncate_error_message, CursorRecord, EventKey, RawEvent, UpsertOutcome,
};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashSet;
use std::path::Path;

const CF_CURSORS: &str = "cursors";
const CF_RAW_EVENTS: &str = "raw_events";
const CF_EVENTS_BY_BLOCK: &str = "events_by_block";

/// Durable map from event source to the last ingested block.
///
/// The engine is the only writer during normal operation and writes each
/// source under its single-flight lock, so no read-modify-write protection
/// is needed here.
pub trait CursorStore: Send + Sync {
    /// Get the stored cursor for a source, if any.
    fn get_cursor(&self, source_id: &str) -> Result<Option<CursorRecord>>;

    /// Store the cursor for a source.
    fn write_cursor(&self, source_id: &str, block: u64) -> Result<()>;

    /// All stored cursors, ordered by source id.
    fn list_cursors(&self) -> Result<Vec<(String, CursorRecord)>>;

    /// Last ingested block for a source, or `genesis` if it was never ingested.
    fn read_cursor(&self, source_id: &str, genesis: u64) -> Result<u64> {
        Ok(self
            .get_cursor(source_id)?
            .map(|c| c.last_block)
            .unwrap_or(genesis))
    }
}

/// Durable append-only store of raw ledger events.
pub trait RawEventStore: Send + Sync {
    /// Insert every record whose key is not yet present.
    ///
    /// Records whose `(source_id, transaction_hash, log_index)` already exist,
    /// in the store or earlier in the same batch, are skipped without error.
    /// The batch is written atomically.
    fn upsert_batch(&self, records: &[RawEvent]) -> Result<UpsertOutcome>;

    /// Get one event by key.
    fn get_event(&self, key: &EventKey) -> Result<Option<RawEvent>>;

    /// Events of a source with `start_block <= block_number <= end_block`,
    /// ordered by block number then log index.
    fn get_events_in_range(
        &self,
        source_id: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawEvent>>;

    /// Oldest unprocessed events of a source, at most `limit`.
    fn list_unprocessed(&self, source_id: &str, limit: usize) -> Result<Vec<RawEvent>>;

    /// Mark an event processed with the consumer's outcome.
    ///
    /// The message is cut to [`MAX_ERROR_MESSAGE_LEN`](crate::records::MAX_ERROR_MESSAGE_LEN)
    /// bytes. Returns false if the event does not exist.
    fn mark_processed(&self, key: &EventKey, error_code: i32, error_message: &str)
        -> Result<bool>;
}

/// RocksDB-backed implementation of CursorStore and RawEventStore.
///
/// Uses column families to organize different types of data:
/// - cursors: per-source cursor records
/// - raw_events: raw event records keyed by ledger coordinates
/// - events_by_block: per-source block-ordered index into raw_events
pub struct RocksEventStore {
    db: DB,
}

impl RocksEventStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_CURSORS, Options::default()),
            ColumnFamilyDescriptor::new(CF_RAW_EVENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_EVENTS_BY_BLOCK, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn get_event_by_encoded_key(&self, key: &[u8]) -> Result<Option<RawEvent>> {
        let cf = self.get_cf(CF_RAW_EVENTS)?;
        match self.db.get_cf(cf, key).context("Failed to get raw event")? {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize raw event")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Walk the block index of a source starting at `start_block`.
    ///
    /// `visit` returns false to stop the walk.
    fn scan_source<F>(&self, source_id: &str, start_block: u64, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, RawEvent) -> bool,
    {
        let cf = self.get_cf(CF_EVENTS_BY_BLOCK)?;
        let prefix = encode_block_index_prefix(source_id);
        let start_key = encode_block_index_start(source_id, start_block);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (block, event_key) =
                decode_block_index_key(&key).context("Failed to decode block index key")?;
            let event = self.get_event_by_encoded_key(&value)?.with_context(|| {
                format!("Block index points at missing event {:?}", event_key)
            })?;
            if !visit(block, event) {
                break;
            }
        }
        Ok(())
    }
}

impl CursorStore for RocksEventStore {
    fn get_cursor(&self, source_id: &str) -> Result<Option<CursorRecord>> {
        let cf = self.get_cf(CF_CURSORS)?;
        let key = encode_cursor_key(source_id);
        match self.db.get_cf(cf, &key).context("Failed to get cursor")? {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize cursor")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write_cursor(&self, source_id: &str, block: u64) -> Result<()> {
        let cf = self.get_cf(CF_CURSORS)?;
        let key = encode_cursor_key(source_id);
        let record = CursorRecord {
            last_block: block,
            updated_at: now_unix(),
        };
        let value = postcard::to_allocvec(&record).context("Failed to serialize cursor")?;
        self.db
            .put_cf(cf, &key, &value)
            .with_context(|| format!("Failed to write cursor for {}", source_id))?;
        Ok(())
    }

    fn list_cursors(&self) -> Result<Vec<(String, CursorRecord)>> {
        let cf = self.get_cf(CF_CURSORS)?;
        let mut cursors = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.context("Failed to read iterator")?;
            let source_id = decode_cursor_key(&key).context("Failed to decode cursor key")?;
            let record: CursorRecord =
                postcard::from_bytes(&value).context("Failed to deserialize cursor")?;
            cursors.push((source_id, record));
        }
        Ok(cursors)
    }
}

impl RawEventStore for RocksEventStore {
    fn upsert_batch(&self, records: &[RawEvent]) -> Result<UpsertOutcome> {
        let events_cf = self.get_cf(CF_RAW_EVENTS)?;
        let index_cf = self.get_cf(CF_EVENTS_BY_BLOCK)?;

        let mut batch = WriteBatch::default();
        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(records.len());
        let mut outcome = UpsertOutcome::default();

        for record in records {
            let event_key = record.key();
            let key = encode_event_key(&event_key);

            let exists = seen.contains(&key)
                || self
                    .db
                    .get_pinned_cf(events_cf, &key)
                    .context("Failed to check raw event")?
                    .is_some();
            if exists {
                outcome.skipped += 1;
                continue;
            }

            let value = postcard::to_allocvec(record).context("Failed to serialize raw event")?;
            let index_key = encode_block_index_key(record.block_number, &event_key);
            batch.put_cf(events_cf, &key, &value);
            batch.put_cf(index_cf, &index_key, &key);
            seen.insert(key);
            outcome.inserted += 1;
        }

        if outcome.inserted > 0 {
            self.db
                .write(batch)
                .context("Failed to write raw event batch")?;
        }
        Ok(outcome)
    }

    fn get_event(&self, key: &EventKey) -> Result<Option<RawEvent>> {
        self.get_event_by_encoded_key(&encode_event_key(key))
    }

    fn get_events_in_range(
        &self,
        source_id: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        if start_block > end_block {
            return Ok(events);
        }
        self.scan_source(source_id, start_block, |block, event| {
            if block > end_block {
                return false;
            }
            events.push(event);
            true
        })?;
        Ok(events)
    }

    fn list_unprocessed(&self, source_id: &str, limit: usize) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        if limit == 0 {
            return Ok(events);
        }
        self.scan_source(source_id, 0, |_, event| {
            if !event.processed {
                events.push(event);
            }
            events.len() < limit
        })?;
        Ok(events)
    }

    fn mark_processed(
        &self,
        key: &EventKey,
        error_code: i32,
        error_message: &str,
    ) -> Result<bool> {
        let cf = self.get_cf(CF_RAW_EVENTS)?;
        let encoded = encode_event_key(key);
        let mut event = match self.get_event_by_encoded_key(&encoded)? {
            Some(event) => event,
            None => return Ok(false),
        };

        event.processed = true;
        event.error_code = error_code;
        event.error_message = truncate_error_message(error_message);
        event.row_updated = now_unix();

        let value = postcard::to_allocvec(&event).context("Failed to serialize raw event")?;
        self.db
            .put_cf(cf, &encoded, &value)
            .context("Failed to update raw event")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ArgValue, EventArgs};
    use alloy_primitives::U256;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksEventStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn event(source: &str, block: u64, tx: u8, log_index: u64) -> RawEvent {
        let mut payload = EventArgs::new();
        payload.push("value", ArgValue::Uint(U256::from(block)));
        RawEvent {
            source_id: source.to_string(),
            event_type: source.to_string(),
            block_number: block,
            event_name: "Transfer".to_string(),
            payload,
            transaction_hash: hex::encode([tx; 32]),
            log_index,
            processed: false,
            error_code: 0,
            error_message: String::new(),
            row_created: 10,
            row_updated: 10,
        }
    }

    #[test]
    fn test_missing_cursor_reads_genesis() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get_cursor("MPE").unwrap(), None);
        assert_eq!(store.read_cursor("MPE", 4_000_000).unwrap(), 4_000_000);
    }

    #[test]
    fn test_cursor_write_and_list() {
        let (store, _temp_dir) = create_test_store();
        store.write_cursor("REGISTRY", 150).unwrap();
        store.write_cursor("MPE", 90).unwrap();
        store.write_cursor("REGISTRY", 200).unwrap();

        assert_eq!(store.read_cursor("REGISTRY", 0).unwrap(), 200);
        let listed: Vec<(String, u64)> = store
            .list_cursors()
            .unwrap()
            .into_iter()
            .map(|(id, c)| (id, c.last_block))
            .collect();
        assert_eq!(
            listed,
            vec![("MPE".to_string(), 90), ("REGISTRY".to_string(), 200)]
        );
    }

    #[test]
    fn test_upsert_batch_twice_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        let batch = vec![event("MPE", 10, 1, 0), event("MPE", 10, 1, 1), event("MPE", 12, 2, 0)];

        let first = store.upsert_batch(&batch).unwrap();
        assert_eq!(first, UpsertOutcome { inserted: 3, skipped: 0 });
        let snapshot = store.get_events_in_range("MPE", 0, 100).unwrap();

        let second = store.upsert_batch(&batch).unwrap();
        assert_eq!(second, UpsertOutcome { inserted: 0, skipped: 3 });
        assert_eq!(store.get_events_in_range("MPE", 0, 100).unwrap(), snapshot);
    }

    #[test]
    fn test_duplicates_inside_one_batch_are_skipped() {
        let (store, _temp_dir) = create_test_store();
        let batch = vec![event("MPE", 10, 1, 0), event("MPE", 10, 1, 0)];
        let outcome = store.upsert_batch(&batch).unwrap();
        assert_eq!(outcome, UpsertOutcome { inserted: 1, skipped: 1 });
        assert_eq!(store.get_events_in_range("MPE", 0, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_does_not_overwrite_consumer_updates() {
        let (store, _temp_dir) = create_test_store();
        let e = event("MPE", 10, 1, 0);
        store.upsert_batch(&[e.clone()]).unwrap();
        assert!(store.mark_processed(&e.key(), 0, "").unwrap());

        store.upsert_batch(&[e.clone()]).unwrap();
        assert!(store.get_event(&e.key()).unwrap().unwrap().processed);
    }

    #[test]
    fn test_events_in_range_are_block_ordered_and_source_scoped() {
        let (store, _temp_dir) = create_test_store();
        store
            .upsert_batch(&[
                event("MPE", 30, 3, 0),
                event("MPE", 10, 1, 2),
                event("MPE", 10, 1, 1),
                event("MPEX", 20, 4, 0),
                event("MPE", 20, 2, 0),
            ])
            .unwrap();

        let events = store.get_events_in_range("MPE", 10, 20).unwrap();
        let coords: Vec<(u64, u64)> =
            events.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(coords, vec![(10, 1), (10, 2), (20, 0)]);

        assert!(store.get_events_in_range("MPE", 21, 20).unwrap().is_empty());
        assert_eq!(store.get_events_in_range("MPEX", 0, u64::MAX).unwrap().len(), 1);
    }

    #[test]
    fn test_list_unprocessed_and_mark_processed() {
        let (store, _temp_dir) = create_test_store();
        let events = vec![event("MPE", 1, 1, 0), event("MPE", 2, 2, 0), event("MPE", 3, 3, 0)];
        store.upsert_batch(&events).unwrap();

        assert!(store.mark_processed(&events[0].key(), 0, "").unwrap());
        assert!(store
            .mark_processed(&events[2].key(), 500, "channel not found")
            .unwrap());

        let pending = store.list_unprocessed("MPE", 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].block_number, 2);

        let failed = store.get_event(&events[2].key()).unwrap().unwrap();
        assert!(failed.processed);
        assert_eq!(failed.error_code, 500);
        assert_eq!(failed.error_message, "channel not found");
        assert!(failed.row_updated >= failed.row_created);
    }

    #[test]
    fn test_mark_processed_caps_error_message() {
        let (store, _temp_dir) = create_test_store();
        let e = event("MPE", 1, 1, 0);
        store.upsert_batch(&[e.clone()]).unwrap();

        let message = "é".repeat(300);
        assert!(store.mark_processed(&e.key(), 2, &message).unwrap());
        let stored = store.get_event(&e.key()).unwrap().unwrap().error_message;
        assert_eq!(stored.len(), crate::records::MAX_ERROR_MESSAGE_LEN);
        assert!(message.starts_with(&stored));
    }

    #[test]
    fn test_list_unprocessed_respects_limit() {
        let (store, _temp_dir) = create_test_store();
        let events: Vec<RawEvent> = (0..5).map(|i| event("MPE", i, i as u8, 0)).collect();
        store.upsert_batch(&events).unwrap();
        let pending = store.list_unprocessed("MPE", 2).unwrap();
        assert_eq!(pending.iter().map(|e| e.block_number).collect::<Vec<_>>(), vec![0, 1]);
        assert!(store.list_unprocessed("MPE", 0).unwrap().is_empty());
    }

    #[test]
    fn test_mark_processed_missing_event() {
        let (store, _temp_dir) = create_test_store();
        let missing = event("MPE", 1, 9, 0).key();
        assert!(!store.mark_processed(&missing, 0, "").unwrap());
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksEventStore::open(temp_dir.path()).unwrap();
            store.upsert_batch(&[event("TokenStake", 5, 1, 0)]).unwrap();
            store.write_cursor("TokenStake", 5).unwrap();
        }
        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.read_cursor("TokenStake", 0).unwrap(), 5);
        assert_eq!(store.get_events_in_range("TokenStake", 5, 5).unwrap().len(), 1);
    }
}
