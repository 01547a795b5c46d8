//! Git access
//!
//! Resolves the head of a tracked branch and checks out a commit into a
//! private directory for a build. Everything goes through the `git` binary.

use async_trait::async_trait;
use kiln_core::domain::repository::Repository;
use std::path::{Path, PathBuf};
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("revision '{0}' not found")]
    RevisionNotFound(String),

    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Cloner: Send + Sync {
    /// Hash of the newest commit on the repository's tracked branch
    async fn latest_commit_hash(&self, repo: &Repository) -> Result<String, GitError>;

    /// Checks out exactly `hash` into a fresh directory
    async fn clone_repository(
        &self,
        repo: &Repository,
        hash: &str,
    ) -> Result<SourceCheckout, GitError>;
}

/// A checked-out source tree
///
/// An owned checkout deletes its directory when dropped.
#[derive(Debug)]
pub struct SourceCheckout {
    path: PathBuf,
    cleanup: bool,
}

impl SourceCheckout {
    pub fn owned(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleanup: true,
        }
    }

    /// A tree someone else manages; left in place on drop
    #[cfg(test)]
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleanup: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SourceCheckout {
    fn drop(&mut self) {
        if !self.cleanup {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || remove_checkout(&path));
            }
            Err(_) => remove_checkout(&path),
        }
    }
}

fn remove_checkout(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!("Removed checkout {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove checkout {}: {}", path.display(), e),
    }
}

/// `Cloner` backed by the git command line
pub struct GitCloner {
    repositories_dir: PathBuf,
}

impl GitCloner {
    pub fn new(repositories_dir: impl Into<PathBuf>) -> Self {
        Self {
            repositories_dir: repositories_dir.into(),
        }
    }

    fn checkout_dir(&self, repo: &Repository, hash: &str) -> PathBuf {
        self.repositories_dir.join(repo.id.to_string()).join(hash)
    }
}

#[async_trait]
impl Cloner for GitCloner {
    async fn latest_commit_hash(&self, repo: &Repository) -> Result<String, GitError> {
        let head = format!("refs/heads/{}", repo.branch);
        let args = ["ls-remote", "--heads", repo.url.as_str(), head.as_str()];

        let output = run_git(None, &args).await?;
        if !output.status.success() {
            return Err(classify_failure(&args, &output, repo, None));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ls_remote(&stdout, &repo.branch)
            .ok_or_else(|| GitError::BranchNotFound(repo.branch.clone()))
    }

    async fn clone_repository(
        &self,
        repo: &Repository,
        hash: &str,
    ) -> Result<SourceCheckout, GitError> {
        let dest = self.checkout_dir(repo, hash);

        // Leftover from an interrupted run
        if tokio::fs::try_exists(&dest).await? {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let dest_str = dest.to_string_lossy().to_string();
        let clone_args = [
            "clone",
            "--quiet",
            "--single-branch",
            "--branch",
            repo.branch.as_str(),
            repo.url.as_str(),
            dest_str.as_str(),
        ];

        let output = run_git(None, &clone_args).await?;
        if !output.status.success() {
            return Err(classify_failure(&clone_args, &output, repo, None));
        }

        let checkout = SourceCheckout::owned(dest);

        let checkout_args = ["checkout", "--quiet", "--detach", hash];
        let output = run_git(Some(checkout.path()), &checkout_args).await?;
        if !output.status.success() {
            return Err(classify_failure(&checkout_args, &output, repo, Some(hash)));
        }

        debug!(
            "Checked out {} of {} into {}",
            hash,
            repo.url,
            checkout.path().display()
        );
        Ok(checkout)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn run_git(workdir: Option<&Path>, args: &[&str]) -> Result<Output, GitError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .kill_on_drop(true);

    Ok(cmd.output().await?)
}

/// Picks the hash advertised for `refs/heads/<branch>` out of `ls-remote` output
fn parse_ls_remote(stdout: &str, branch: &str) -> Option<String> {
    let wanted = format!("refs/heads/{}", branch);
    stdout.lines().find_map(|line| {
        let (hash, reference) = line.split_once('\t')?;
        (reference.trim() == wanted).then(|| hash.trim().to_string())
    })
}

fn classify_failure(
    args: &[&str],
    output: &Output,
    repo: &Repository,
    revision: Option<&str>,
) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    classify_stderr(format!("git {}", args.join(" ")), stderr, repo, revision)
}

fn classify_stderr(
    command: String,
    stderr: String,
    repo: &Repository,
    revision: Option<&str>,
) -> GitError {
    let lower = stderr.to_lowercase();

    if (lower.contains("remote branch") && lower.contains("not found"))
        || lower.contains("couldn't find remote ref")
    {
        return GitError::BranchNotFound(repo.branch.clone());
    }

    if lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("does not exist")
    {
        return GitError::RepositoryNotFound(repo.url.clone());
    }

    if let Some(revision) = revision {
        if lower.contains("did not match any")
            || lower.contains("reference is not a tree")
            || lower.contains("unknown revision")
        {
            return GitError::RevisionNotFound(revision.to_string());
        }
    }

    GitError::CommandFailed { command, stderr }
}
