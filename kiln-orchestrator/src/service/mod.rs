//! Service Module
//!
//! Use cases behind the HTTP API. Services validate input, talk to the
//! stores and keep the scheduler in step with the persisted repositories.

pub mod build;
pub mod log;
pub mod repository;

// Re-export for convenience
pub use build as build_service;
pub use log as log_service;
pub use repository as repository_service;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::engine::{SchedulerHandle, SchedulerUnavailable};
use crate::storage::{BuildStore, LogStore, RepositoryStore, StorageError};

/// Everything the use cases need, shared by all request handlers
#[derive(Clone)]
pub struct ServiceContext {
    pub repositories: Arc<dyn RepositoryStore>,
    pub builds: Arc<dyn BuildStore>,
    pub logs: Arc<dyn LogStore>,
    pub scheduler: SchedulerHandle,
    pub min_polling_interval: Duration,
}

/// Service error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error(transparent)]
    SchedulerUnavailable(#[from] SchedulerUnavailable),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            StorageError::Conflict(msg) => ServiceError::Conflict(msg),
            err => ServiceError::Storage(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
