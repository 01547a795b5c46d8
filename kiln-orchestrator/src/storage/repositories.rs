//! Repository Storage
//!
//! Handles all database operations related to tracked repositories.

use kiln_core::domain::repository::Repository;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

/// Insert a repository
pub async fn create(pool: &SqlitePool, repo: &Repository) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO repositories (id, url, branch, polling_interval_ms, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(repo.id)
    .bind(&repo.url)
    .bind(&repo.branch)
    .bind(interval_to_millis(repo.polling_interval))
    .bind(repo.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a repository by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Repository>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT id, url, branch, polling_interval_ms, created_at
        FROM repositories
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a repository by its source URL
pub async fn find_by_url(pool: &SqlitePool, url: &str) -> Result<Option<Repository>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT id, url, branch, polling_interval_ms, created_at
        FROM repositories
        WHERE url = $1
        "#,
    )
    .bind(url)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all repositories
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Repository>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT id, url, branch, polling_interval_ms, created_at
        FROM repositories
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a repository by ID; its builds go with it
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM repositories WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn interval_to_millis(interval: Duration) -> i64 {
    i64::try_from(interval.as_millis()).unwrap_or(i64::MAX)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: Uuid,
    url: String,
    branch: String,
    polling_interval_ms: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            id: row.id,
            url: row.url,
            branch: row.branch,
            polling_interval: Duration::from_millis(row.polling_interval_ms.max(0) as u64),
            created_at: row.created_at,
        }
    }
}
