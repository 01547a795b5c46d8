//! Build engine
//!
//! Three long-lived loops connected by channels:
//! - `scheduler` owns the set of polled repositories and their cancellation tokens
//! - `poller` detects new commits and prepares build requests
//! - `runner` executes pipelines and records the outcome
//!
//! All loops stop when the root cancellation token handed to `run` is cancelled.

pub mod poller;
pub mod runner;
pub mod scheduler;

pub use poller::{Poller, PollerHandle, RepositoryPoller};
pub use runner::Runner;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerUnavailable};

use kiln_core::domain::pipeline::Pipeline;
use kiln_core::domain::repository::Commit;
use uuid::Uuid;

use crate::git::SourceCheckout;

/// Everything the runner needs to build one commit
///
/// Dropping the request removes the checked-out source.
#[derive(Debug)]
pub struct BuildRequest {
    pub repo_id: Uuid,
    pub commit: Commit,
    pub pipeline: Pipeline,
    pub source: SourceCheckout,
}
