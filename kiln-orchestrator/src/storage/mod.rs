//! Storage Module
//!
//! Durable persistence of repositories, builds and logs.
//!
//! Each submodule holds the SQL for one entity as plain functions over a
//! `SqlitePool`. The store traits are the seam the engine and the use cases
//! depend on, so they can run against in-memory doubles in tests.

pub mod builds;
pub mod logs;
pub mod repositories;

use async_trait::async_trait;
use kiln_core::domain::build::Build;
use kiln_core::domain::log::Log;
use kiln_core::domain::repository::Repository;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

/// Storage error type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

#[cfg(test)]
impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(db.message().to_string())
            }
            _ => StorageError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn create_repository(&self, repo: &Repository) -> Result<()>;

    /// Fails with `NotFound` when no repository has this id
    async fn delete_repository(&self, id: Uuid) -> Result<()>;

    /// All repositories, oldest first
    async fn get_all_repositories(&self) -> Result<Vec<Repository>>;

    async fn get_repository(&self, id: Uuid) -> Result<Repository>;

    async fn get_repository_by_url(&self, url: &str) -> Result<Repository>;
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn create_build(&self, build: &Build) -> Result<()>;

    /// Builds of one repository in creation order; empty when there are none
    async fn get_all_builds_by_repo(&self, repo_id: Uuid) -> Result<Vec<Build>>;

    async fn get_build(&self, id: Uuid) -> Result<Build>;

    /// Deletes the build together with its log
    async fn delete_build(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn create_log(&self, log: &Log) -> Result<()>;

    async fn get_log(&self, id: Uuid) -> Result<Log>;

    /// Removes logs no build refers to, returning how many were deleted
    async fn delete_orphaned_logs(&self) -> Result<u64>;
}

/// SQLite-backed implementation of every store trait
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for SqliteStore {
    async fn create_repository(&self, repo: &Repository) -> Result<()> {
        repositories::create(&self.pool, repo).await?;
        Ok(())
    }

    async fn delete_repository(&self, id: Uuid) -> Result<()> {
        if !repositories::delete(&self.pool, id).await? {
            return Err(StorageError::NotFound(format!("repository {}", id)));
        }
        Ok(())
    }

    async fn get_all_repositories(&self) -> Result<Vec<Repository>> {
        Ok(repositories::list_all(&self.pool).await?)
    }

    async fn get_repository(&self, id: Uuid) -> Result<Repository> {
        repositories::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("repository {}", id)))
    }

    async fn get_repository_by_url(&self, url: &str) -> Result<Repository> {
        repositories::find_by_url(&self.pool, url)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("repository with url {}", url)))
    }
}

#[async_trait]
impl BuildStore for SqliteStore {
    async fn create_build(&self, build: &Build) -> Result<()> {
        builds::create(&self.pool, build).await?;
        Ok(())
    }

    async fn get_all_builds_by_repo(&self, repo_id: Uuid) -> Result<Vec<Build>> {
        Ok(builds::find_by_repo(&self.pool, repo_id).await?)
    }

    async fn get_build(&self, id: Uuid) -> Result<Build> {
        builds::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("build {}", id)))
    }

    async fn delete_build(&self, id: Uuid) -> Result<()> {
        if !builds::delete(&self.pool, id).await? {
            return Err(StorageError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn create_log(&self, log: &Log) -> Result<()> {
        logs::create(&self.pool, log).await?;
        Ok(())
    }

    async fn get_log(&self, id: Uuid) -> Result<Log> {
        logs::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("log {}", id)))
    }

    async fn delete_orphaned_logs(&self) -> Result<u64> {
        Ok(logs::delete_orphaned(&self.pool).await?)
    }
}
