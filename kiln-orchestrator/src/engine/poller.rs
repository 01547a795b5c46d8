//! Repository poller
//!
//! Every polled repository has a timer task. On each fire it hands a
//! `PollTick` to the shared poller loop and waits for the attempt to finish
//! before arming the timer again, so a repository never has two attempts in
//! flight. An attempt resolves the branch head, compares it with what was
//! already built or dispatched, and sends a `BuildRequest` to the runner.

use kiln_core::domain::repository::{Commit, Repository};
use kiln_core::duration;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::BuildRequest;
use crate::git::{Cloner, GitError};
use crate::pipeline::{self, PipelineError, PipelineParser};
use crate::storage::{BuildStore, StorageError};

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("runner is not accepting builds")]
    RunnerClosed,
}

/// Starts polling a repository until `token` is cancelled
pub trait RepositoryPoller: Send + Sync {
    fn start(&self, repo: Repository, token: CancellationToken);
}

/// One poll attempt for one repository
#[derive(Debug)]
pub struct PollTick {
    pub repository: Repository,
    pub token: CancellationToken,
    /// Hash most recently handed to the runner by this repository's timer
    pub last_dispatched: Option<String>,
    /// Receives the hash to remember as last dispatched
    pub done: oneshot::Sender<Option<String>>,
}

/// Handle used to start per-repository timers
#[derive(Debug, Clone)]
pub struct PollerHandle {
    ticks: mpsc::Sender<PollTick>,
}

impl RepositoryPoller for PollerHandle {
    fn start(&self, repo: Repository, token: CancellationToken) {
        tokio::spawn(poll_repository(repo, token, self.ticks.clone()));
    }
}

/// Timer task of one repository
async fn poll_repository(
    repo: Repository,
    token: CancellationToken,
    ticks: mpsc::Sender<PollTick>,
) {
    info!(
        "Polling {} ({}) every {}",
        repo.url,
        repo.branch,
        duration::format(repo.polling_interval)
    );

    let mut last_dispatched = None;

    loop {
        let (done_tx, done_rx) = oneshot::channel();
        let tick = PollTick {
            repository: repo.clone(),
            token: token.clone(),
            last_dispatched: last_dispatched.clone(),
            done: done_tx,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = ticks.send(tick) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            outcome = done_rx => {
                if let Ok(hash) = outcome {
                    last_dispatched = hash;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(repo.polling_interval) => {}
        }
    }

    info!("Stopped polling {} ({})", repo.url, repo.id);
}

struct PollContext {
    cloner: Arc<dyn Cloner>,
    parser: Arc<dyn PipelineParser>,
    builds: Arc<dyn BuildStore>,
    runner: mpsc::Sender<BuildRequest>,
    pipeline_filename: String,
}

pub struct Poller {
    context: Arc<PollContext>,
    ticks: mpsc::Receiver<PollTick>,
}

impl Poller {
    pub fn new(
        cloner: Arc<dyn Cloner>,
        parser: Arc<dyn PipelineParser>,
        builds: Arc<dyn BuildStore>,
        runner: mpsc::Sender<BuildRequest>,
        pipeline_filename: impl Into<String>,
    ) -> (Self, PollerHandle) {
        let (tx, rx) = mpsc::channel(1);

        let poller = Self {
            context: Arc::new(PollContext {
                cloner,
                parser,
                builds,
                runner,
                pipeline_filename: pipeline_filename.into(),
            }),
            ticks: rx,
        };
        (poller, PollerHandle { ticks: tx })
    }

    /// Services poll ticks until `shutdown` is cancelled
    ///
    /// Each tick is handled in its own task so repositories are checked
    /// concurrently.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting poller");

        let mut attempts = JoinSet::new();

        loop {
            let tick = tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = self.ticks.recv() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };

            let context = Arc::clone(&self.context);
            attempts.spawn(async move { context.attempt(tick).await });

            while let Some(result) = attempts.try_join_next() {
                if let Err(e) = result {
                    warn!("Poll attempt panicked: {}", e);
                }
            }
        }

        attempts.shutdown().await;
        info!("Poller stopped");
    }
}

impl PollContext {
    async fn attempt(&self, tick: PollTick) {
        let PollTick {
            repository,
            token,
            last_dispatched,
            done,
        } = tick;

        let result = self
            .check(&repository, &token, last_dispatched.as_deref())
            .await;

        let remembered = match result {
            Ok(Some(hash)) => Some(hash),
            Ok(None) => last_dispatched,
            Err(e) => {
                warn!("Polling {} failed: {}", repository.url, e);
                last_dispatched
            }
        };

        // The timer task may already be gone after cancellation
        let _ = done.send(remembered);
    }

    /// Returns the dispatched hash, or `None` when there was nothing to build
    async fn check(
        &self,
        repo: &Repository,
        token: &CancellationToken,
        last_dispatched: Option<&str>,
    ) -> Result<Option<String>, PollError> {
        if token.is_cancelled() {
            return Ok(None);
        }

        let hash = self.cloner.latest_commit_hash(repo).await?;

        if last_dispatched == Some(hash.as_str()) {
            debug!("{} already dispatched for {}", hash, repo.url);
            return Ok(None);
        }

        let builds = self.builds.get_all_builds_by_repo(repo.id).await?;
        if builds.last().is_some_and(|b| b.commit.hash == hash) {
            debug!("{} already built for {}", hash, repo.url);
            return Ok(None);
        }

        info!("New commit {} on {} ({})", hash, repo.url, repo.branch);

        let source = self.cloner.clone_repository(repo, &hash).await?;
        let bytes = pipeline::read_pipeline_file(source.path(), &self.pipeline_filename).await?;
        let pipeline = self.parser.parse_pipeline(&bytes)?;

        let request = BuildRequest {
            repo_id: repo.id,
            commit: Commit::new(hash.clone()),
            pipeline,
            source,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Polling of {} cancelled before dispatch", repo.url);
                return Ok(None);
            }
            sent = self.runner.send(request) => {
                sent.map_err(|_| PollError::RunnerClosed)?;
            }
        }

        info!("Dispatched build of {} at {}", repo.url, hash);
        Ok(Some(hash))
    }
}
