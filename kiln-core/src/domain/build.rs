//! Build domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::repository::Commit;

/// One execution attempt of a pipeline against one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub commit: Commit,
    pub status: BuildStatus,
    /// Set when the build reaches a terminal status
    pub log_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Build lifecycle status
///
/// Moves from `InProgress` to exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    InProgress,
    Success,
    Failure,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::InProgress => "in_progress",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("build {id} already finished with status {status}")]
    AlreadyFinished { id: Uuid, status: BuildStatus },

    #[error("cannot complete build {0} with a non-terminal status")]
    NotTerminal(Uuid),
}

impl Build {
    /// Creates an in-progress build for a commit
    pub fn start(repo_id: Uuid, commit: Commit) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_id,
            commit,
            status: BuildStatus::InProgress,
            log_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Moves the build to its terminal status and attaches its log
    pub fn complete(&mut self, status: BuildStatus, log_id: Uuid) -> Result<(), BuildError> {
        if self.status.is_terminal() {
            return Err(BuildError::AlreadyFinished {
                id: self.id,
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(BuildError::NotTerminal(self.id));
        }

        self.status = status;
        self.log_id = Some(log_id);
        Ok(())
    }
}
