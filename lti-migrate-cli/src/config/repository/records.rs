//! Repository for migration records persisted in SQLite

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::MEMORY_RECORDS_DB;
use crate::error::MigrationError;
use crate::migration::store::{MigrationRecord, MigrationStatus, RecordStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS migration_records (
    source_tool_id  INTEGER NOT NULL,
    target_tool_id  INTEGER NOT NULL,
    course_id       INTEGER NOT NULL,
    status          TEXT    NOT NULL,
    partial         INTEGER NOT NULL DEFAULT 0,
    source_position INTEGER,
    detail          TEXT,
    run_id          TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL,
    PRIMARY KEY (source_tool_id, target_tool_id, course_id)
)
"#;

/// Records for one source/target tool pair, so several migrations can share a file
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    source_tool_id: i64,
    target_tool_id: i64,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `path`; `:memory:` keeps it in memory
    pub async fn connect(path: &str, source_tool_id: u64, target_tool_id: u64) -> Result<Self> {
        let options = if path == MEMORY_RECORDS_DB {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // A single connection keeps an in-memory database alive and serializes writers
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open record store at {}", path))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create migration_records table")?;

        debug!("Record store ready at {}", path);
        Ok(Self {
            pool,
            source_tool_id: source_tool_id as i64,
            target_tool_id: target_tool_id as i64,
        })
    }

    pub async fn get_record(&self, course_id: u64) -> Result<Option<MigrationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT course_id, status, partial, source_position, detail, run_id, updated_at
            FROM migration_records
            WHERE source_tool_id = ? AND target_tool_id = ? AND course_id = ?
            "#,
        )
        .bind(self.source_tool_id)
        .bind(self.target_tool_id)
        .bind(course_id as i64)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get migration record")?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn upsert_record(&self, record: &MigrationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_records
                (source_tool_id, target_tool_id, course_id, status, partial,
                 source_position, detail, run_id, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_tool_id, target_tool_id, course_id) DO UPDATE SET
                status = excluded.status,
                partial = excluded.partial,
                source_position = excluded.source_position,
                detail = excluded.detail,
                run_id = excluded.run_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(self.source_tool_id)
        .bind(self.target_tool_id)
        .bind(record.course_id as i64)
        .bind(record.status.as_str())
        .bind(record.partial as i64)
        .bind(record.source_position.map(i64::from))
        .bind(record.detail.as_deref())
        .bind(record.run_id.to_string())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save record for course {}", record.course_id))?;

        Ok(())
    }

    pub async fn list_records(&self) -> Result<Vec<MigrationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT course_id, status, partial, source_position, detail, run_id, updated_at
            FROM migration_records
            WHERE source_tool_id = ? AND target_tool_id = ?
            ORDER BY course_id
            "#,
        )
        .bind(self.source_tool_id)
        .bind(self.target_tool_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list migration records")?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<MigrationRecord> {
    let status: String = row.try_get("status")?;
    let run_id: String = row.try_get("run_id")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(MigrationRecord {
        course_id: row.try_get::<i64, _>("course_id")? as u64,
        status: MigrationStatus::from_str(&status).map_err(anyhow::Error::msg)?,
        partial: row.try_get::<i64, _>("partial")? != 0,
        source_position: row
            .try_get::<Option<i64>, _>("source_position")?
            .map(|p| p as u32),
        detail: row.try_get("detail")?,
        run_id: Uuid::parse_str(&run_id).context("Invalid run id in record")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .context("Invalid timestamp in record")?
            .with_timezone(&Utc),
    })
}

fn store_error(err: anyhow::Error) -> MigrationError {
    MigrationError::RecordStore(format!("{:#}", err))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, course_id: u64) -> Result<Option<MigrationRecord>, MigrationError> {
        self.get_record(course_id).await.map_err(store_error)
    }

    async fn put(&self, record: MigrationRecord) -> Result<(), MigrationError> {
        self.upsert_record(&record).await.map_err(store_error)
    }

    async fn all(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.list_records().await.map_err(store_error)
    }
}
