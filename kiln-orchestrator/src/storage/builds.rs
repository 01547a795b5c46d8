//! Build Storage
//!
//! Handles all database operations related to builds.

use kiln_core::domain::build::{Build, BuildStatus};
use kiln_core::domain::repository::Commit;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert a build
pub async fn create(pool: &SqlitePool, build: &Build) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO builds (id, repo_id, commit_hash, status, log_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(build.id)
    .bind(build.repo_id)
    .bind(&build.commit.hash)
    .bind(build.status.as_str())
    .bind(build.log_id)
    .bind(build.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a build by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, repo_id, commit_hash, status, log_id, created_at
        FROM builds
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find builds of a repository, oldest first
pub async fn find_by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, repo_id, commit_hash, status, log_id, created_at
        FROM builds
        WHERE repo_id = $1
        ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a build and the log it references
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let log_id: Option<Option<Uuid>> = sqlx::query_scalar("SELECT log_id FROM builds WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(log_id) = log_id else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM builds WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if let Some(log_id) = log_id {
        sqlx::query("DELETE FROM logs WHERE id = $1")
            .bind(log_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_status(s: &str) -> BuildStatus {
    match s {
        "in_progress" => BuildStatus::InProgress,
        "success" => BuildStatus::Success,
        "failure" => BuildStatus::Failure,
        other => {
            tracing::warn!("Unknown build status '{}' in database, reading as failure", other);
            BuildStatus::Failure
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    repo_id: Uuid,
    commit_hash: String,
    status: String,
    log_id: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<BuildRow> for Build {
    fn from(row: BuildRow) -> Self {
        Build {
            id: row.id,
            repo_id: row.repo_id,
            commit: Commit::new(row.commit_hash),
            status: string_to_status(&row.status),
            log_id: row.log_id,
            created_at: row.created_at,
        }
    }
}
