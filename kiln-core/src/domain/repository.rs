//! Repository domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A tracked source-code location
///
/// Immutable once created; the only lifecycle change is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub url: String,
    pub branch: String,
    #[serde(with = "crate::duration")]
    pub polling_interval: Duration,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Repository {
    /// Creates a repository with a fresh id and the current timestamp
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        polling_interval: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            branch: branch.into(),
            polling_interval,
            created_at: chrono::Utc::now(),
        }
    }
}

/// A single revision of a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
}

impl Commit {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}
