//! Build runner
//!
//! Receives build requests, runs their steps in order and persists the log
//! followed by the build.

use kiln_core::domain::build::{Build, BuildStatus};
use kiln_core::domain::log::Log;
use kiln_core::domain::pipeline::Pipeline;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::BuildRequest;
use crate::podman::{Executor, ExecutorError};
use crate::storage::{BuildStore, LogStore};

/// Result of running every step of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Finished { status: BuildStatus, logs: String },
    /// Interrupted by shutdown; nothing is recorded
    Cancelled,
}

pub struct Runner {
    executor: Arc<dyn Executor>,
    builds: Arc<dyn BuildStore>,
    logs: Arc<dyn LogStore>,
    semaphore: Arc<Semaphore>,
    max_parallel_builds: usize,
    requests: mpsc::Receiver<BuildRequest>,
}

impl Runner {
    /// Creates the runner and the sender the poller dispatches to
    pub fn new(
        executor: Arc<dyn Executor>,
        builds: Arc<dyn BuildStore>,
        logs: Arc<dyn LogStore>,
        max_parallel_builds: usize,
    ) -> (Self, mpsc::Sender<BuildRequest>) {
        let (tx, rx) = mpsc::channel(1);
        let max_parallel_builds = max_parallel_builds.max(1);

        let runner = Self {
            executor,
            builds,
            logs,
            semaphore: Arc::new(Semaphore::new(max_parallel_builds)),
            max_parallel_builds,
            requests: rx,
        };
        (runner, tx)
    }

    /// Runs until `shutdown` is cancelled or every sender is gone, then waits
    /// for in-flight builds.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Starting runner ({} build slot(s))",
            self.max_parallel_builds
        );

        let mut tasks = JoinSet::new();

        loop {
            // A slot is taken before receiving so a busy runner holds back the poller
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            tasks.spawn(run_build(
                request,
                Arc::clone(&self.executor),
                Arc::clone(&self.builds),
                Arc::clone(&self.logs),
                shutdown.child_token(),
                permit,
            ));

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    warn!("Build task panicked: {}", e);
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight build(s)", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Build task panicked: {}", e);
            }
        }

        info!("Runner stopped");
    }
}

/// Executes one build request and records it
async fn run_build(
    request: BuildRequest,
    executor: Arc<dyn Executor>,
    builds: Arc<dyn BuildStore>,
    logs: Arc<dyn LogStore>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let BuildRequest {
        repo_id,
        commit,
        pipeline,
        source,
    } = request;

    let mut build = Build::start(repo_id, commit);
    info!(
        "Starting build {} of repository {} at {} ({} step(s))",
        build.id,
        repo_id,
        build.commit.hash,
        pipeline.steps.len()
    );

    let outcome = execute_pipeline(executor.as_ref(), &pipeline, source.path(), &cancel).await;
    drop(source);

    let (status, data) = match outcome {
        PipelineOutcome::Finished { status, logs } => (status, logs),
        PipelineOutcome::Cancelled => {
            warn!("Build {} interrupted by shutdown, not recorded", build.id);
            return;
        }
    };

    let log = Log::new(data);
    if let Err(e) = logs.create_log(&log).await {
        error!("Failed to save log of build {}, build dropped: {}", build.id, e);
        return;
    }

    if let Err(e) = build.complete(status, log.id) {
        error!("Failed to complete build {}: {}", build.id, e);
        return;
    }

    if let Err(e) = builds.create_build(&build).await {
        error!(
            "Failed to save build {} (log {} left orphaned): {}",
            build.id, log.id, e
        );
        return;
    }

    info!("Build {} finished with status: {}", build.id, build.status);
}

/// Runs the steps of `pipeline` in order, stopping at the first failure
///
/// The log holds the output of every step that ran, in step order. An
/// executor error ends the build as failed with the error appended.
pub async fn execute_pipeline(
    executor: &dyn Executor,
    pipeline: &Pipeline,
    source: &Path,
    cancel: &CancellationToken,
) -> PipelineOutcome {
    let mut logs = String::new();

    for (index, step) in pipeline.steps.iter().enumerate() {
        debug!(
            "Executing step {}/{}: {}",
            index + 1,
            pipeline.steps.len(),
            step.name
        );

        match executor.execute_step(step, source, cancel).await {
            Ok(output) => {
                logs.push_str(&output.logs);
                if !output.success() {
                    info!(
                        "Step '{}' failed with exit code {}",
                        step.name, output.exit_code
                    );
                    return PipelineOutcome::Finished {
                        status: BuildStatus::Failure,
                        logs,
                    };
                }
            }
            Err(ExecutorError::Cancelled) => return PipelineOutcome::Cancelled,
            Err(e) => {
                warn!("Step '{}' could not be executed: {}", step.name, e);
                logs.push_str(&format!("step '{}' failed: {}\n", step.name, e));
                return PipelineOutcome::Finished {
                    status: BuildStatus::Failure,
                    logs,
                };
            }
        }
    }

    PipelineOutcome::Finished {
        status: BuildStatus::Success,
        logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::SourceCheckout;
    use crate::testing::{MemoryStore, ScriptedExecutor, ScriptedStep};
    use kiln_core::domain::pipeline::Step;
    use kiln_core::domain::repository::Commit;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn pipeline(images: &[&str]) -> Pipeline {
        Pipeline {
            name: "test".to_string(),
            steps: images
                .iter()
                .map(|image| Step {
                    name: image.to_string(),
                    image: image.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn request(images: &[&str], source: &Path) -> BuildRequest {
        BuildRequest {
            repo_id: Uuid::new_v4(),
            commit: Commit::new("abc123"),
            pipeline: pipeline(images),
            source: SourceCheckout::borrowed(source),
        }
    }

    /// Runs the runner over the given requests until it drains
    async fn run_requests(
        executor: Arc<ScriptedExecutor>,
        store: Arc<MemoryStore>,
        requests: Vec<BuildRequest>,
    ) {
        let (runner, tx) = Runner::new(executor, store.clone(), store, 1);
        let handle = tokio::spawn(runner.run(CancellationToken::new()));

        for request in requests {
            tx.send(request).await.unwrap();
        }
        drop(tx);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_pipeline_all_steps_succeed() {
        let executor = ScriptedExecutor::new()
            .step("A", ScriptedStep::exit("A", 0))
            .step("B", ScriptedStep::exit("B", 0));

        let outcome = execute_pipeline(
            &executor,
            &pipeline(&["A", "B"]),
            Path::new("."),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Finished {
                status: BuildStatus::Success,
                logs: "AB".to_string()
            }
        );
        assert_eq!(executor.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_execute_pipeline_stops_at_failing_step() {
        let executor = ScriptedExecutor::new()
            .step("one", ScriptedStep::exit("1;", 0))
            .step("two", ScriptedStep::exit("2;", 0))
            .step("three", ScriptedStep::exit("3;", 1))
            .step("four", ScriptedStep::exit("4;", 0));

        let outcome = execute_pipeline(
            &executor,
            &pipeline(&["one", "two", "three", "four"]),
            Path::new("."),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Finished {
                status: BuildStatus::Failure,
                logs: "1;2;3;".to_string()
            }
        );
        assert_eq!(executor.calls(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_execute_pipeline_executor_error_fails_build() {
        let executor = ScriptedExecutor::new()
            .step("A", ScriptedStep::exit("A", 0))
            .step("B", ScriptedStep::SpawnFailure);

        let outcome = execute_pipeline(
            &executor,
            &pipeline(&["A", "B", "C"]),
            Path::new("."),
            &CancellationToken::new(),
        )
        .await;

        let PipelineOutcome::Finished { status, logs } = outcome else {
            panic!("expected a finished pipeline");
        };
        assert_eq!(status, BuildStatus::Failure);
        assert!(logs.starts_with("A"));
        assert!(logs.contains("step 'B' failed"));
        assert_eq!(executor.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let executor = ScriptedExecutor::new();
        let outcome = execute_pipeline(
            &executor,
            &pipeline(&[]),
            Path::new("."),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Finished {
                status: BuildStatus::Success,
                logs: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_successful_build_is_recorded() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(
            ScriptedExecutor::new()
                .step("A", ScriptedStep::exit("A", 0))
                .step("B", ScriptedStep::exit("B", 0)),
        );
        let store = Arc::new(MemoryStore::default());

        let request = request(&["A", "B"], source.path());
        let repo_id = request.repo_id;
        run_requests(executor, store.clone(), vec![request]).await;

        let builds = store.builds();
        assert_eq!(builds.len(), 1);
        let build = &builds[0];
        assert_eq!(build.repo_id, repo_id);
        assert_eq!(build.commit.hash, "abc123");
        assert_eq!(build.status, BuildStatus::Success);

        let log = store.logs().into_iter().find(|l| Some(l.id) == build.log_id);
        assert_eq!(log.map(|l| l.data), Some("AB".to_string()));
    }

    #[tokio::test]
    async fn test_failed_build_is_recorded() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(
            ScriptedExecutor::new()
                .step("A", ScriptedStep::exit("A", 0))
                .step("B", ScriptedStep::exit("", 1)),
        );
        let store = Arc::new(MemoryStore::default());

        run_requests(executor, store.clone(), vec![request(&["A", "B"], source.path())]).await;

        let builds = store.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].status, BuildStatus::Failure);
        assert_eq!(store.logs()[0].data, "A");
    }

    #[tokio::test]
    async fn test_log_save_failure_records_no_build() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().step("A", ScriptedStep::exit("A", 0)));
        let store = Arc::new(MemoryStore::default());
        store.fail_log_creates.store(true, Ordering::SeqCst);

        run_requests(executor.clone(), store.clone(), vec![request(&["A"], source.path())]).await;

        assert_eq!(executor.calls(), vec!["A"]);
        assert!(store.logs().is_empty());
        assert!(store.builds().is_empty());
    }

    #[tokio::test]
    async fn test_build_save_failure_leaves_log() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().step("A", ScriptedStep::exit("A", 0)));
        let store = Arc::new(MemoryStore::default());
        store.fail_build_creates.store(true, Ordering::SeqCst);

        run_requests(executor, store.clone(), vec![request(&["A"], source.path())]).await;

        assert_eq!(store.logs().len(), 1);
        assert!(store.builds().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_running_build() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().step("slow", ScriptedStep::WaitForCancel));
        let store = Arc::new(MemoryStore::default());

        let (runner, tx) = Runner::new(executor.clone(), store.clone(), store.clone(), 1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runner.run(shutdown.clone()));

        tx.send(request(&["slow"], source.path())).await.unwrap();
        crate::testing::eventually(|| executor.calls().len() == 1).await;

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("runner should stop")
            .unwrap();

        assert!(store.builds().is_empty());
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_builds_run_in_parallel_up_to_slots() {
        let source = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().step("slow", ScriptedStep::WaitForCancel));
        let store = Arc::new(MemoryStore::default());

        let (runner, tx) = Runner::new(executor.clone(), store.clone(), store.clone(), 2);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runner.run(shutdown.clone()));

        tx.send(request(&["slow"], source.path())).await.unwrap();
        tx.send(request(&["slow"], source.path())).await.unwrap();
        crate::testing::eventually(|| executor.calls().len() == 2).await;

        shutdown.cancel();
        handle.await.unwrap();
    }
}
