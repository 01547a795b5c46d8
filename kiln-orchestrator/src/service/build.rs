//! Build Service
//!
//! Read and delete access to recorded builds.

use kiln_core::domain::build::Build;
use uuid::Uuid;

use crate::service::{Result, ServiceContext};

/// List builds of a repository, oldest first
pub async fn list_builds_by_repository(ctx: &ServiceContext, repo_id: Uuid) -> Result<Vec<Build>> {
    ctx.repositories.get_repository(repo_id).await?;
    Ok(ctx.builds.get_all_builds_by_repo(repo_id).await?)
}

/// Get a build by ID
pub async fn get_build(ctx: &ServiceContext, id: Uuid) -> Result<Build> {
    Ok(ctx.builds.get_build(id).await?)
}

/// Delete a build and its log
pub async fn delete_build(ctx: &ServiceContext, id: Uuid) -> Result<()> {
    ctx.builds.delete_build(id).await?;
    tracing::info!("Build deleted: {}", id);
    Ok(())
}
