//! Log Storage
//!
//! Handles all database operations related to build logs.

use kiln_core::domain::log::Log;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert a log
pub async fn create(pool: &SqlitePool, log: &Log) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO logs (id, data, created_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(log.id)
    .bind(&log.data)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a log by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Log>, sqlx::Error> {
    let row = sqlx::query_as::<_, LogRow>("SELECT id, data FROM logs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// Delete logs that no build references
///
/// A log is written before its build, so a crash or a failed build insert in
/// between leaves the log behind.
pub async fn delete_orphaned(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM logs
        WHERE NOT EXISTS (SELECT 1 FROM builds WHERE builds.log_id = logs.id)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    data: String,
}

impl From<LogRow> for Log {
    fn from(row: LogRow) -> Self {
        Log {
            id: row.id,
            data: row.data,
        }
    }
}
