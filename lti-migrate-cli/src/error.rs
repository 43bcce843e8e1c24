//! Error taxonomy for a migration run
//!
//! Only configuration, preflight and enumeration errors are fatal to a run.
//! Everything else is scoped to a single course and ends up in that course's
//! migration record.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Required settings missing or malformed
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Source or target tool is not installed in the account
    #[error("tool ids not installed in account {account_id}: {missing:?}")]
    InvalidToolIds { account_id: u64, missing: Vec<u64> },

    /// Warehouse connection could not be established
    #[error("warehouse unavailable: {0}")]
    WarehouseUnavailable(String),

    /// Warehouse connection succeeded but the course query failed
    #[error("warehouse query failed: {0}")]
    WarehouseQuery(String),

    /// Single Canvas call failed with a non-retryable error, or after retries
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Course enumeration ran out of retries
    #[error("course enumeration gave up after exhausting retries: {0}")]
    ApiExhausted(#[source] ApiError),

    /// Source was hidden but the target could not be enabled
    #[error("course {course_id}: source tool hidden but target tool not enabled: {source}")]
    PartialMigration {
        course_id: u64,
        source_position: Option<u32>,
        #[source]
        source: ApiError,
    },

    /// Target tool has no navigation placement in the course
    #[error("course {course_id}: tool {tool_id} has no placement in this course")]
    TargetUnavailable { course_id: u64, tool_id: u64 },

    /// Placements did not match the expected state after the update calls
    #[error("course {course_id}: verification failed: {detail}")]
    VerificationFailed { course_id: u64, detail: String },

    #[error("record store: {0}")]
    RecordStore(String),
}

impl MigrationError {
    /// True when the course was left with the source hidden and the target not enabled
    pub fn is_partial(&self) -> bool {
        matches!(self, MigrationError::PartialMigration { .. })
    }

    /// Wrap an API error raised while enumerating courses.
    ///
    /// Retryable errors only surface once the retry budget is spent.
    pub fn from_enumeration(error: ApiError) -> Self {
        use crate::api::resilience::RetryableError;

        if error.is_retryable() {
            MigrationError::ApiExhausted(error)
        } else {
            MigrationError::Api(error)
        }
    }
}
