//! Read-only access to the Unizin Data Warehouse (UDW)
//!
//! The warehouse mirrors Canvas data in Postgres. A single query returns every
//! course in scope, which is much faster than paging through the API.

use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, info};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::api::Course;
use crate::config::{MigrationConfig, WarehouseSettings};
use crate::error::MigrationError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Courses of an account (direct or via root account) in the given terms, not deleted.
///
/// `$3` is the limit; `LIMIT NULL` means no limit in Postgres.
const COURSES_IN_TERMS: &str = r#"
SELECT c.canvas_id AS course_id,
       c.name AS course_name,
       a.canvas_id AS account_id,
       t.canvas_id AS term_id
FROM course_dim c
LEFT JOIN enrollment_term_dim t ON c.enrollment_term_id = t.id
LEFT JOIN account_dim ra ON c.root_account_id = ra.id
LEFT JOIN account_dim a ON c.account_id = a.id
WHERE t.canvas_id = ANY($2)
  AND (a.canvas_id = $1 OR ra.canvas_id = $1)
  AND c.workflow_state != 'deleted'
ORDER BY c.canvas_id
LIMIT $3
"#;

#[derive(Debug, Clone)]
pub struct Warehouse {
    pool: PgPool,
}

impl Warehouse {
    /// Connect eagerly so an unreachable warehouse is detected before enumeration
    pub async fn connect(settings: &WarehouseSettings) -> Result<Self, MigrationError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.name)
            .username(&settings.user)
            .password(&settings.password);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                MigrationError::WarehouseUnavailable(format!(
                    "{}:{}/{}: {}",
                    settings.host, settings.port, settings.name, e
                ))
            })?;

        info!(
            "Connected to warehouse {}:{}/{}",
            settings.host, settings.port, settings.name
        );
        Ok(Self { pool })
    }

    /// Stream courses in scope, ordered by course id
    pub fn courses_in_terms(&self, config: &MigrationConfig) -> BoxStream<'_, Result<Course, MigrationError>> {
        let term_ids: Vec<i64> = config.term_ids.iter().map(|&id| id as i64).collect();
        let limit = config.course_limit.map(|l| l as i64);
        debug!(
            "Warehouse course query: account={} terms={:?} limit={:?}",
            config.account_id, term_ids, limit
        );

        sqlx::query(COURSES_IN_TERMS)
            .bind(config.account_id as i64)
            .bind(term_ids)
            .bind(limit)
            .fetch(&self.pool)
            .map(|row| {
                row.map_err(|e| MigrationError::WarehouseQuery(e.to_string()))
                    .and_then(|row| course_from_row(&row))
            })
            .boxed()
    }
}

fn course_from_row(row: &PgRow) -> Result<Course, MigrationError> {
    let get_id = |column: &str| -> Result<u64, MigrationError> {
        row.try_get::<i64, _>(column)
            .map(|id| id as u64)
            .map_err(|e| MigrationError::WarehouseQuery(format!("column {}: {}", column, e)))
    };

    Ok(Course {
        id: get_id("course_id")?,
        name: row
            .try_get::<Option<String>, _>("course_name")
            .map_err(|e| MigrationError::WarehouseQuery(e.to_string()))?
            .unwrap_or_default(),
        account_id: get_id("account_id")?,
        enrollment_term_id: get_id("term_id")?,
    })
}
