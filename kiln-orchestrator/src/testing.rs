//! Test doubles shared by the unit tests

use async_trait::async_trait;
use kiln_core::domain::build::Build;
use kiln_core::domain::log::Log;
use kiln_core::domain::pipeline::Step;
use kiln_core::domain::repository::Repository;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::RepositoryPoller;
use crate::git::{Cloner, GitError, SourceCheckout};
use crate::podman::{Executor, ExecutorError, StepOutput};
use crate::storage::{self, BuildStore, LogStore, RepositoryStore, StorageError};

/// Polls `condition` until it holds, panicking after five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn injected() -> StorageError {
    StorageError::Database(sqlx::Error::Protocol("injected failure".to_string()))
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Default)]
struct MemoryState {
    repositories: Vec<Repository>,
    builds: Vec<Build>,
    logs: Vec<Log>,
}

/// In-memory store with switches to make writes or reads fail
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pub fail_log_creates: AtomicBool,
    pub fail_build_creates: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn with_repositories(repositories: Vec<Repository>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().repositories = repositories;
        store
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.state.lock().unwrap().repositories.clone()
    }

    pub fn builds(&self) -> Vec<Build> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn logs(&self) -> Vec<Log> {
        self.state.lock().unwrap().logs.clone()
    }

    pub fn insert_build(&self, build: Build) {
        self.state.lock().unwrap().builds.push(build);
    }

    pub fn insert_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    fn check_reads(&self) -> storage::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn create_repository(&self, repo: &Repository) -> storage::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.repositories.iter().any(|r| r.url == repo.url) {
            return Err(StorageError::Conflict(format!("url {}", repo.url)));
        }
        state.repositories.push(repo.clone());
        Ok(())
    }

    async fn delete_repository(&self, id: Uuid) -> storage::Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.repositories.len();
        state.repositories.retain(|r| r.id != id);
        if state.repositories.len() == before {
            return Err(StorageError::NotFound(format!("repository {}", id)));
        }
        state.builds.retain(|b| b.repo_id != id);
        Ok(())
    }

    async fn get_all_repositories(&self) -> storage::Result<Vec<Repository>> {
        self.check_reads()?;
        Ok(self.repositories())
    }

    async fn get_repository(&self, id: Uuid) -> storage::Result<Repository> {
        self.check_reads()?;
        self.repositories()
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("repository {}", id)))
    }

    async fn get_repository_by_url(&self, url: &str) -> storage::Result<Repository> {
        self.check_reads()?;
        self.repositories()
            .into_iter()
            .find(|r| r.url == url)
            .ok_or_else(|| StorageError::NotFound(format!("repository with url {}", url)))
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn create_build(&self, build: &Build) -> storage::Result<()> {
        if self.fail_build_creates.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.insert_build(build.clone());
        Ok(())
    }

    async fn get_all_builds_by_repo(&self, repo_id: Uuid) -> storage::Result<Vec<Build>> {
        self.check_reads()?;
        Ok(self
            .builds()
            .into_iter()
            .filter(|b| b.repo_id == repo_id)
            .collect())
    }

    async fn get_build(&self, id: Uuid) -> storage::Result<Build> {
        self.check_reads()?;
        self.builds()
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("build {}", id)))
    }

    async fn delete_build(&self, id: Uuid) -> storage::Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(position) = state.builds.iter().position(|b| b.id == id) else {
            return Err(StorageError::NotFound(format!("build {}", id)));
        };
        let build = state.builds.remove(position);
        if let Some(log_id) = build.log_id {
            state.logs.retain(|l| l.id != log_id);
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn create_log(&self, log: &Log) -> storage::Result<()> {
        if self.fail_log_creates.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.insert_log(log.clone());
        Ok(())
    }

    async fn get_log(&self, id: Uuid) -> storage::Result<Log> {
        self.check_reads()?;
        self.logs()
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("log {}", id)))
    }

    async fn delete_orphaned_logs(&self) -> storage::Result<u64> {
        let mut state = self.state.lock().unwrap();
        let referenced: Vec<Uuid> = state.builds.iter().filter_map(|b| b.log_id).collect();
        let before = state.logs.len();
        state.logs.retain(|l| referenced.contains(&l.id));
        Ok((before - state.logs.len()) as u64)
    }
}

// =============================================================================
// Git
// =============================================================================

/// Reports a settable head hash and "clones" by lending a fixed directory
pub struct ScriptedCloner {
    hash: Mutex<Option<String>>,
    source: PathBuf,
    resolutions: AtomicUsize,
    clones: AtomicUsize,
}

impl ScriptedCloner {
    pub fn new(source: &Path) -> Self {
        Self {
            hash: Mutex::new(None),
            source: source.to_path_buf(),
            resolutions: AtomicUsize::new(0),
            clones: AtomicUsize::new(0),
        }
    }

    /// `None` makes resolution fail as if the branch were missing
    pub fn set_hash(&self, hash: Option<&str>) {
        *self.hash.lock().unwrap() = hash.map(str::to_string);
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cloner for ScriptedCloner {
    async fn latest_commit_hash(&self, repo: &Repository) -> Result<String, GitError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.hash
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GitError::BranchNotFound(repo.branch.clone()))
    }

    async fn clone_repository(
        &self,
        _repo: &Repository,
        _hash: &str,
    ) -> Result<SourceCheckout, GitError> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(SourceCheckout::borrowed(&self.source))
    }
}

// =============================================================================
// Executor
// =============================================================================

#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Exit { logs: String, code: i32 },
    SpawnFailure,
    /// Blocks until the build is cancelled
    WaitForCancel,
}

impl ScriptedStep {
    pub fn exit(logs: &str, code: i32) -> Self {
        ScriptedStep::Exit {
            logs: logs.to_string(),
            code,
        }
    }
}

/// Executor answering per image; unknown images succeed silently
#[derive(Default)]
pub struct ScriptedExecutor {
    steps: HashMap<String, ScriptedStep>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, image: &str, step: ScriptedStep) -> Self {
        self.steps.insert(image.to_string(), step);
        self
    }

    /// Images executed so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute_step(
        &self,
        step: &Step,
        _source: &Path,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ExecutorError> {
        self.calls.lock().unwrap().push(step.image.clone());

        match self.steps.get(&step.image).cloned() {
            Some(ScriptedStep::Exit { logs, code }) => Ok(StepOutput {
                logs,
                exit_code: code,
            }),
            Some(ScriptedStep::SpawnFailure) => Err(ExecutorError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no runtime",
            ))),
            Some(ScriptedStep::WaitForCancel) => {
                cancel.cancelled().await;
                Err(ExecutorError::Cancelled)
            }
            None => Ok(StepOutput {
                logs: String::new(),
                exit_code: 0,
            }),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Records every repository the scheduler starts
#[derive(Default)]
pub struct RecordingPoller {
    started: Mutex<Vec<(Repository, CancellationToken)>>,
}

impl RecordingPoller {
    pub fn started(&self) -> Vec<(Repository, CancellationToken)> {
        self.started.lock().unwrap().clone()
    }
}

impl RepositoryPoller for RecordingPoller {
    fn start(&self, repo: Repository, token: CancellationToken) {
        self.started.lock().unwrap().push((repo, token));
    }
}
