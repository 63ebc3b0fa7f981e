//! Durable log store on redb.
//!
//! # Table design
//!
//! `ENTRIES` is keyed by a 24-byte composite:
//! ```text
//! [ end_time_ns: u64 big-endian (8 bytes) | entry uuid: 16 bytes ]
//! ```
//! so byte order equals end-time order and a time-range query is a single
//! range scan, reversed for most-recent-first. End times outside
//! 1970..2262 share the clamped first or last key prefix; entries there are
//! checked against their stored end time. `BY_ID` maps the entry uuid to
//! its composite key for lookups by id.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use uuid::Uuid;

use super::{LogEntry, LogStore};
use crate::error::{ActionError, ActionResult};

/// Key: composite (end_ms ++ uuid). Value: JSON-encoded `LogEntry`.
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("log_entries");

/// Key: entry uuid. Value: composite key into `ENTRIES`.
const BY_ID: TableDefinition<u128, &[u8]> = TableDefinition::new("log_entries_by_id");

const CLAMPED_LOW: u64 = 0;
const CLAMPED_HIGH: u64 = i64::MAX as u64;

fn time_prefix(ts: DateTime<Utc>) -> u64 {
    match ts.timestamp_nanos_opt() {
        Some(ns) => ns.max(0) as u64,
        None if ts.timestamp() < 0 => CLAMPED_LOW,
        None => CLAMPED_HIGH,
    }
}

fn key_prefix(key: &[u8]) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&key[..8]);
    u64::from_be_bytes(prefix)
}

fn entry_key(end: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&time_prefix(end).to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Smallest key with end time `ts`.
fn lower_bound(ts: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&time_prefix(ts).to_be_bytes());
    key
}

/// Largest key with end time `ts`; the `0xff` suffix sorts after any uuid.
fn upper_bound(ts: DateTime<Utc>) -> [u8; 24] {
    let mut key = lower_bound(ts);
    key[8..].fill(0xff);
    key
}

/// Log entries persisted in a redb file.
#[derive(Clone)]
pub struct RedbLogStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLogStore").finish_non_exhaustive()
    }
}

impl RedbLogStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> ActionResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(ActionError::store)?;
        let wt = db.begin_write().map_err(ActionError::store)?;
        wt.open_table(ENTRIES).map_err(ActionError::store)?;
        wt.open_table(BY_ID).map_err(ActionError::store)?;
        wt.commit().map_err(ActionError::store)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn insert_blocking(db: &Database, entry: &LogEntry) -> ActionResult<()> {
        let key = entry_key(entry.end_time, entry.id);
        let value = serde_json::to_vec(entry)?;
        let wt = db.begin_write().map_err(ActionError::store)?;
        {
            let mut entries = wt.open_table(ENTRIES).map_err(ActionError::store)?;
            entries
                .insert(key.as_slice(), value.as_slice())
                .map_err(ActionError::store)?;
            let mut by_id = wt.open_table(BY_ID).map_err(ActionError::store)?;
            by_id
                .insert(entry.id.as_u128(), key.as_slice())
                .map_err(ActionError::store)?;
        }
        wt.commit().map_err(ActionError::store)?;
        Ok(())
    }

    fn get_blocking(db: &Database, id: Uuid) -> ActionResult<Option<LogEntry>> {
        let rt = db.begin_read().map_err(ActionError::store)?;
        let by_id = rt.open_table(BY_ID).map_err(ActionError::store)?;
        let Some(key) = by_id.get(id.as_u128()).map_err(ActionError::store)? else {
            return Ok(None);
        };
        let entries = rt.open_table(ENTRIES).map_err(ActionError::store)?;
        let value = entries.get(key.value()).map_err(ActionError::store)?;
        match value {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn query_blocking(
        db: &Database,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>> {
        let (lower, upper) = (lower_bound(from), upper_bound(to));
        if lower > upper {
            return Ok(Vec::new());
        }
        let rt = db.begin_read().map_err(ActionError::store)?;
        let table = rt.open_table(ENTRIES).map_err(ActionError::store)?;
        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(ActionError::store)?
            .rev()
        {
            if limit.is_some_and(|n| result.len() >= n) {
                break;
            }
            let (_, v) = entry.map_err(ActionError::store)?;
            let entry: LogEntry = serde_json::from_slice(v.value())?;
            if entry.end_time >= from && entry.end_time <= to {
                result.push(entry);
            }
        }
        Ok(result)
    }

    fn count_blocking(db: &Database, from: DateTime<Utc>, to: DateTime<Utc>) -> ActionResult<usize> {
        let (lower, upper) = (lower_bound(from), upper_bound(to));
        if lower > upper {
            return Ok(0);
        }
        let rt = db.begin_read().map_err(ActionError::store)?;
        let table = rt.open_table(ENTRIES).map_err(ActionError::store)?;
        let mut count = 0;
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(ActionError::store)?
        {
            let (k, v) = entry.map_err(ActionError::store)?;
            let prefix = key_prefix(k.value());
            if prefix == CLAMPED_LOW || prefix == CLAMPED_HIGH {
                let entry: LogEntry = serde_json::from_slice(v.value())?;
                if entry.end_time < from || entry.end_time > to {
                    continue;
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Total number of stored entries.
    pub fn len(&self) -> ActionResult<u64> {
        let rt = self.db.begin_read().map_err(ActionError::store)?;
        let table = rt.open_table(ENTRIES).map_err(ActionError::store)?;
        table.len().map_err(ActionError::store)
    }

    async fn blocking<T, F>(&self, f: F) -> ActionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> ActionResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(ActionError::store)?
    }
}

#[async_trait]
impl LogStore for RedbLogStore {
    async fn store(&self, entry: &LogEntry) -> ActionResult<()> {
        let entry = entry.clone();
        self.blocking(move |db| Self::insert_blocking(db, &entry))
            .await
    }

    async fn get(&self, id: Uuid) -> ActionResult<Option<LogEntry>> {
        self.blocking(move |db| Self::get_blocking(db, id)).await
    }

    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>> {
        self.blocking(move |db| Self::query_blocking(db, from, to, limit))
            .await
    }

    async fn count_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> ActionResult<usize> {
        self.blocking(move |db| Self::count_blocking(db, from, to))
            .await
    }
}
