//! Podman step execution
//!
//! Runs each pipeline step in a fresh container:
//! - Pulling the step image
//! - Mounting the checked-out source at the container working directory
//! - Capturing combined output and the exit code
//! - Force-removing the container when the build is cancelled

use anyhow::Context;
use async_trait::async_trait;
use kiln_core::domain::pipeline::Step;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Output of one executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub logs: String,
    pub exit_code: i32,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("failed to start container: {0}")]
    Spawn(std::io::Error),

    #[error("invalid entrypoint: {0}")]
    Entrypoint(#[from] serde_json::Error),

    #[error("step cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs one step against the source tree at `source`
    ///
    /// A non-zero exit code is a normal outcome reported through
    /// `StepOutput`; errors mean the step could not be run at all.
    async fn execute_step(
        &self,
        step: &Step,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ExecutorError>;
}

/// Checks if the container runtime is installed and available
pub async fn check_available(binary: &str) -> anyhow::Result<()> {
    let output = Command::new(binary)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to execute '{} --version'. Is it installed?", binary))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", binary);
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Container runtime is available: {}", version.trim());

    Ok(())
}

pub struct PodmanExecutor {
    binary: String,
    working_dir: String,
}

impl PodmanExecutor {
    /// # Arguments
    /// * `binary` - Container CLI to invoke (`podman` or a compatible one)
    /// * `working_dir` - Mount point of the source inside the container
    pub fn new(binary: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
        }
    }

    async fn pull(&self, image: &str, cancel: &CancellationToken) -> Result<(), ExecutorError> {
        debug!("Pulling image {}", image);

        let pull = Command::new(&self.binary)
            .args(["pull", "--quiet", image])
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = pull => output.map_err(ExecutorError::Spawn)?,
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };

        if !output.status.success() {
            return Err(ExecutorError::ImagePull {
                image: image.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn remove_container(&self, name: &str) {
        let result = Command::new(&self.binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => debug!("Removed container {}", name),
            Ok(status) => warn!("Failed to remove container {}: {}", name, status),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

#[async_trait]
impl Executor for PodmanExecutor {
    async fn execute_step(
        &self,
        step: &Step,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ExecutorError> {
        self.pull(&step.image, cancel).await?;

        let source = tokio::fs::canonicalize(source).await?;
        let name = format!("kiln-{}", Uuid::new_v4());
        let args = run_args(&name, &source, &self.working_dir, step)?;

        info!("Running step '{}' in container {}", step.name, name);

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutorError::Spawn)?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                self.remove_container(&name).await;
                return Err(ExecutorError::Cancelled);
            }
        };

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            "Step '{}' finished with exit code {} ({} bytes of output)",
            step.name,
            exit_code,
            logs.len()
        );

        Ok(StepOutput { logs, exit_code })
    }
}

/// Arguments of the `run` invocation for one step
fn run_args(
    name: &str,
    source: &Path,
    working_dir: &str,
    step: &Step,
) -> Result<Vec<String>, ExecutorError> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-t".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-v".to_string(),
        format!("{}:{}", source.display(), working_dir),
        "-w".to_string(),
        working_dir.to_string(),
    ];

    for env in &step.environment {
        args.push("-e".to_string());
        args.push(env.clone());
    }

    if !step.command.is_empty() {
        args.push("--entrypoint".to_string());
        args.push(serde_json::to_string(&step.command)?);
    }

    args.push(step.image.clone());
    args.extend(step.args.iter().cloned());

    Ok(args)
}
