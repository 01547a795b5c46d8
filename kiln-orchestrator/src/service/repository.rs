//! Repository Service
//!
//! Business logic for tracked repositories.

use kiln_core::domain::repository::Repository;
use kiln_core::dto::repository::CreateRepository;
use kiln_core::duration;
use uuid::Uuid;

use crate::service::{Result, ServiceContext, ServiceError};
use crate::storage::StorageError;

/// Track a new repository and start polling it
pub async fn add_repository(ctx: &ServiceContext, req: CreateRepository) -> Result<Repository> {
    validate_repository_request(ctx, &req)?;

    match ctx.repositories.get_repository_by_url(req.url.trim()).await {
        Ok(existing) => {
            return Err(ServiceError::Conflict(format!(
                "repository {} is already tracked as {}",
                existing.url, existing.id
            )));
        }
        Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let repo = Repository::new(req.url.trim(), req.branch.trim(), req.polling_interval);
    ctx.repositories.create_repository(&repo).await?;

    ctx.scheduler.add(repo.clone()).await?;

    tracing::info!("Repository added: {} ({})", repo.url, repo.id);

    Ok(repo)
}

/// Stop polling a repository, then delete it with its builds
pub async fn delete_repository(ctx: &ServiceContext, id: Uuid) -> Result<()> {
    ctx.repositories.get_repository(id).await?;

    ctx.scheduler.remove(id).await?;
    ctx.repositories.delete_repository(id).await?;

    match ctx.logs.delete_orphaned_logs().await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!("Removed {} orphaned log(s)", removed),
        Err(e) => tracing::warn!("Failed to remove orphaned logs: {}", e),
    }

    tracing::info!("Repository deleted: {}", id);

    Ok(())
}

/// List all repositories
pub async fn list_repositories(ctx: &ServiceContext) -> Result<Vec<Repository>> {
    Ok(ctx.repositories.get_all_repositories().await?)
}

/// Get a repository by ID
pub async fn get_repository(ctx: &ServiceContext, id: Uuid) -> Result<Repository> {
    Ok(ctx.repositories.get_repository(id).await?)
}

fn validate_repository_request(ctx: &ServiceContext, req: &CreateRepository) -> Result<()> {
    if req.url.trim().is_empty() {
        return Err(ServiceError::Validation(
            "Repository url cannot be empty".to_string(),
        ));
    }

    if req.branch.trim().is_empty() {
        return Err(ServiceError::Validation(
            "Repository branch cannot be empty".to_string(),
        ));
    }

    if req.polling_interval < ctx.min_polling_interval {
        return Err(ServiceError::Validation(format!(
            "Polling interval must be at least {}",
            duration::format(ctx.min_polling_interval)
        )));
    }

    Ok(())
}
