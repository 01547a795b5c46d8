//! Repository scheduler
//!
//! Keeps one cancellation token per polled repository. Adding a repository
//! starts its poller under a child of the service token; removing it cancels
//! that token. On start the persisted repositories are announced again so
//! polling resumes after a restart. A repository removed while recovery is
//! still announcing is never started by it.

use kiln_core::domain::repository::Repository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::RepositoryPoller;
use crate::storage::RepositoryStore;

#[derive(Debug, Error)]
#[error("scheduler is not running")]
pub struct SchedulerUnavailable;

#[derive(Debug)]
struct RemoveRequest {
    id: Uuid,
    ack: oneshot::Sender<()>,
}

/// Handle used by the use cases to add and remove polled repositories
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    add: mpsc::Sender<Repository>,
    remove: mpsc::Sender<RemoveRequest>,
}

impl SchedulerHandle {
    pub async fn add(&self, repo: Repository) -> Result<(), SchedulerUnavailable> {
        self.add.send(repo).await.map_err(|_| SchedulerUnavailable)
    }

    /// Returns once polling of the repository has been cancelled
    pub async fn remove(&self, id: Uuid) -> Result<(), SchedulerUnavailable> {
        let (ack, done) = oneshot::channel();
        self.remove
            .send(RemoveRequest { id, ack })
            .await
            .map_err(|_| SchedulerUnavailable)?;
        done.await.map_err(|_| SchedulerUnavailable)
    }
}

pub struct Scheduler {
    poller: Arc<dyn RepositoryPoller>,
    repositories: Arc<dyn RepositoryStore>,
    add_rx: mpsc::Receiver<Repository>,
    remove_rx: mpsc::Receiver<RemoveRequest>,
    active_polling: HashMap<Uuid, CancellationToken>,
    /// Ids removed while recovery runs; recovered copies of them are stale
    removed_during_recovery: HashSet<Uuid>,
}

impl Scheduler {
    pub fn new(
        poller: Arc<dyn RepositoryPoller>,
        repositories: Arc<dyn RepositoryStore>,
    ) -> (Self, SchedulerHandle) {
        let (add_tx, add_rx) = mpsc::channel(1);
        let (remove_tx, remove_rx) = mpsc::channel(1);

        let scheduler = Self {
            poller,
            repositories,
            add_rx,
            remove_rx,
            active_polling: HashMap::new(),
            removed_during_recovery: HashSet::new(),
        };
        let handle = SchedulerHandle {
            add: add_tx,
            remove: remove_tx,
        };
        (scheduler, handle)
    }

    /// Recovers persisted repositories, then serves add and remove requests
    /// until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting scheduler");

        let (recovered_tx, mut recovered_rx) = mpsc::channel(1);
        let recovery = tokio::spawn(recover(
            Arc::clone(&self.repositories),
            recovered_tx,
            shutdown.clone(),
        ));
        let mut recovering = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                recovered = recovered_rx.recv(), if recovering => match recovered {
                    Some(repo) => self.resume_polling(repo, &shutdown),
                    None => {
                        recovering = false;
                        self.removed_during_recovery.clear();
                        debug!("Recovery finished");
                    }
                },
                Some(repo) = self.add_rx.recv() => self.start_polling(repo, &shutdown),
                Some(request) = self.remove_rx.recv() => {
                    if recovering {
                        self.removed_during_recovery.insert(request.id);
                    }
                    self.stop_polling(request);
                }
            }
        }

        recovery.abort();
        for token in self.active_polling.values() {
            token.cancel();
        }

        info!(
            "Scheduler stopped ({} repositories were polled)",
            self.active_polling.len()
        );
    }

    fn start_polling(&mut self, repo: Repository, shutdown: &CancellationToken) {
        if self.active_polling.contains_key(&repo.id) {
            debug!("Repository {} is already polled", repo.id);
            return;
        }

        info!("Start polling repository {} ({})", repo.id, repo.url);

        let token = shutdown.child_token();
        self.active_polling.insert(repo.id, token.clone());
        self.poller.start(repo, token);
    }

    fn resume_polling(&mut self, repo: Repository, shutdown: &CancellationToken) {
        if self.removed_during_recovery.contains(&repo.id) {
            debug!("Repository {} was removed during recovery", repo.id);
            return;
        }
        self.start_polling(repo, shutdown);
    }

    fn stop_polling(&mut self, request: RemoveRequest) {
        match self.active_polling.remove(&request.id) {
            Some(token) => {
                token.cancel();
                info!("Stopped polling repository {}", request.id);
            }
            None => debug!("Repository {} was not polled", request.id),
        }

        let _ = request.ack.send(());
    }
}

/// Announces every persisted repository through the recovery channel
async fn recover(
    repositories: Arc<dyn RepositoryStore>,
    recovered: mpsc::Sender<Repository>,
    shutdown: CancellationToken,
) {
    let repos = match repositories.get_all_repositories().await {
        Ok(repos) => repos,
        Err(e) => {
            error!("Failed to load repositories for recovery: {}", e);
            return;
        }
    };

    info!("Recovering {} repositories", repos.len());

    for repo in repos {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            sent = recovered.send(repo) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
