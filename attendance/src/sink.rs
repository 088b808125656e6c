//! Outbound collaborators: the durable attendance store and the manual
//! review queue.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SinkError;
use crate::types::{AttendanceRecord, RecordKey};

/// Answer from [`AttendanceSink::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Accepted,
    /// Already stored under the same key; treated as success.
    Duplicate,
    /// Permanently refused. Reported, never retried.
    Rejected(String),
}

/// Durable store for confirmed attendance.
///
/// Implementations must be idempotent on [`AttendanceRecord::key`]: a
/// second commit of the same key answers [`CommitStatus::Duplicate`].
/// Returning `Err` signals a transient failure and the record is retried.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    async fn commit(&self, record: &AttendanceRecord) -> Result<CommitStatus, SinkError>;
}

/// Receives ambiguous and rejected records for a human to look at.
///
/// Submissions are keyed like sink commits, so a retried submission must
/// not create a second review item.
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn submit(&self, record: &AttendanceRecord) -> Result<(), SinkError>;
}

/// In-memory [`AttendanceSink`]. Suitable for testing and offline replay.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<RecordKey, AttendanceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records ordered by key.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AttendanceSink for MemorySink {
    async fn commit(&self, record: &AttendanceRecord) -> Result<CommitStatus, SinkError> {
        let mut records = self.records.lock();
        let key = record.key();
        if records.contains_key(&key) {
            return Ok(CommitStatus::Duplicate);
        }
        records.insert(key, record.clone());
        Ok(CommitStatus::Accepted)
    }
}

/// In-memory [`ReviewQueue`].
#[derive(Default)]
pub struct MemoryReviewQueue {
    items: Mutex<BTreeMap<RecordKey, AttendanceRecord>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<AttendanceRecord> {
        self.items.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn submit(&self, record: &AttendanceRecord) -> Result<(), SinkError> {
        self.items
            .lock()
            .entry(record.key())
            .or_insert_with(|| record.clone());
        Ok(())
    }
}
