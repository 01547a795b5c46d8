//! Repository DTOs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request to start tracking a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRepository {
    pub url: String,
    pub branch: String,
    #[serde(with = "crate::duration")]
    pub polling_interval: Duration,
}
