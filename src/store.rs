//! Document storage for heist records.
//!
//! A record is the latest snapshot of one heist: who put in what, which
//! target it is going for, and when it started and ended. Every write
//! replaces the whole document; there is no history.
//!
//! Two backends are provided: [`MemoryStore`] for tests and dry runs, and
//! [`JsonFileStore`], which keeps every record in a single JSON file that is
//! rewritten on each change.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_lock::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::heist::ledger::ContributionLedger;
use crate::types::Snowflake;

pub type RecordId = String;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeistRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub guild_id: Snowflake,
    #[serde(default)]
    pub participants: ContributionLedger,
    /// Id of the chosen target.
    pub heist: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl HeistRecord {
    pub fn new(guild_id: impl Into<Snowflake>) -> Self {
        Self {
            id: None,
            guild_id: guild_id.into(),
            participants: ContributionLedger::new(),
            heist: None,
            created_at: None,
            updated_at: None,
            ended_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on heist store: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in heist store: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot update a heist record that was never created")]
    MissingId,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable-on-write storage for heist records.
///
/// No batching and no multi-record transactions: a returned `Ok` means the
/// single write has landed.
pub trait HeistStore: Send + Sync + 'static {
    /// Insert a new record, assigning it an id. Returns the stored record.
    fn create(
        &self,
        record: HeistRecord,
    ) -> impl Future<Output = Result<HeistRecord, StoreError>> + Send;

    /// Replace the record with the same id, inserting it if it has vanished.
    fn update(
        &self,
        record: HeistRecord,
    ) -> impl Future<Output = Result<HeistRecord, StoreError>> + Send;

    fn find(&self, id: &str)
        -> impl Future<Output = Result<Option<HeistRecord>, StoreError>> + Send;

    /// The record in `guild_id` with the latest `ended_at`.
    fn latest_ended(
        &self,
        guild_id: &str,
    ) -> impl Future<Output = Result<Option<HeistRecord>, StoreError>> + Send;
}

fn new_record_id() -> RecordId {
    format!("{:016x}{:08x}", rand::random::<u64>(), rand::random::<u32>())
}

fn latest_ended_in<'a>(
    records: impl Iterator<Item = &'a HeistRecord>,
    guild_id: &str,
) -> Option<HeistRecord> {
    records
        .filter(|r| r.guild_id == guild_id && r.ended_at.is_some())
        .max_by_key(|r| r.ended_at)
        .cloned()
}

fn upsert(records: &mut Vec<HeistRecord>, record: HeistRecord) {
    match records.iter_mut().find(|r| r.id == record.id) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Records held in a `Vec`. Can be told to fail or to stall every call,
/// for exercising slow and broken storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<HeistRecord>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record currently held, in insertion order.
    pub async fn records(&self) -> Vec<HeistRecord> {
        self.records.lock().await.clone()
    }

    /// Make every subsequent call return an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Sleep for `delay` at the start of every subsequent call.
    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::Relaxed);
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Io(std::io::Error::other("store set to fail")));
        }
        Ok(())
    }
}

impl HeistStore for MemoryStore {
    async fn create(&self, mut record: HeistRecord) -> Result<HeistRecord, StoreError> {
        self.enter().await?;
        record.id = Some(new_record_id());
        self.records.lock().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, record: HeistRecord) -> Result<HeistRecord, StoreError> {
        self.enter().await?;
        if record.id.is_none() {
            return Err(StoreError::MissingId);
        }
        upsert(&mut *self.records.lock().await, record.clone());
        Ok(record)
    }

    async fn find(&self, id: &str) -> Result<Option<HeistRecord>, StoreError> {
        self.enter().await?;
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .cloned())
    }

    async fn latest_ended(&self, guild_id: &str) -> Result<Option<HeistRecord>, StoreError> {
        self.enter().await?;
        let records = self.records.lock().await;
        Ok(latest_ended_in(records.iter(), guild_id))
    }
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

/// All records in one pretty-printed JSON array.
///
/// The file is read once on [`JsonFileStore::open`] and rewritten through a
/// temporary sibling file plus rename on every write, so a crash mid-write
/// leaves the previous version intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<HeistRecord>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), records = records.len(), "opened heist store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, records: &[HeistRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "flushed heist store");
        Ok(())
    }
}

impl HeistStore for JsonFileStore {
    async fn create(&self, mut record: HeistRecord) -> Result<HeistRecord, StoreError> {
        record.id = Some(new_record_id());
        let mut records = self.records.lock().await;
        records.push(record.clone());
        if let Err(e) = self.flush(&records).await {
            records.pop();
            return Err(e);
        }
        Ok(record)
    }

    async fn update(&self, record: HeistRecord) -> Result<HeistRecord, StoreError> {
        if record.id.is_none() {
            return Err(StoreError::MissingId);
        }
        let mut records = self.records.lock().await;
        let previous = records.clone();
        upsert(&mut records, record.clone());
        if let Err(e) = self.flush(&records).await {
            *records = previous;
            return Err(e);
        }
        Ok(record)
    }

    async fn find(&self, id: &str) -> Result<Option<HeistRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .cloned())
    }

    async fn latest_ended(&self, guild_id: &str) -> Result<Option<HeistRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(latest_ended_in(records.iter(), guild_id))
    }
}
