//! Per-course migration records
//!
//! Records make reruns resumable: a `done` record can short-circuit a course,
//! and a partial failure tells the inspector that the source was hidden by
//! us, not by an instructor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Done,
    Skipped,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Done => "done",
            MigrationStatus::Skipped => "skipped",
            MigrationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "done" => Ok(MigrationStatus::Done),
            "skipped" => Ok(MigrationStatus::Skipped),
            "failed" => Ok(MigrationStatus::Failed),
            other => Err(format!("unknown migration status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub course_id: u64,
    pub status: MigrationStatus,
    /// Source hidden (or possibly hidden), target not confirmed enabled
    pub partial: bool,
    /// Navigation position of the source before it was hidden
    pub source_position: Option<u32>,
    pub detail: Option<String>,
    pub run_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn new(course_id: u64, run_id: Uuid, status: MigrationStatus) -> Self {
        Self {
            course_id,
            status,
            partial: false,
            source_position: None,
            detail: None,
            run_id,
            updated_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == MigrationStatus::Done
    }

    /// A run set out to swap the tools and never confirmed the enable.
    ///
    /// A `pending` record carrying the flag means the run died, or could not
    /// record its failure, after the hide may already have been applied.
    pub fn is_partial_failure(&self) -> bool {
        self.partial && matches!(self.status, MigrationStatus::Pending | MigrationStatus::Failed)
    }
}

/// Storage for migration records of a single source/target tool pair
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, course_id: u64) -> Result<Option<MigrationRecord>, MigrationError>;

    /// Insert or replace the record for `record.course_id`
    async fn put(&self, record: MigrationRecord) -> Result<(), MigrationError>;

    /// All records, ordered by course id
    async fn all(&self) -> Result<Vec<MigrationRecord>, MigrationError>;
}

/// Records kept for the lifetime of the process
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<u64, MigrationRecord>>,
}

#[cfg(test)]
impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, course_id: u64) -> Result<Option<MigrationRecord>, MigrationError> {
        Ok(self.records.read().await.get(&course_id).cloned())
    }

    async fn put(&self, record: MigrationRecord) -> Result<(), MigrationError> {
        self.records.write().await.insert(record.course_id, record);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.course_id);
        Ok(records)
    }
}
