//! Repository API Handlers
//!
//! HTTP endpoints for tracked repositories.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use kiln_core::domain::build::Build;
use kiln_core::domain::repository::Repository;
use kiln_core::dto::repository::CreateRepository;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{ServiceContext, build_service, repository_service};

/// POST /repository/create
/// Start tracking a repository
pub async fn create_repository(
    State(ctx): State<ServiceContext>,
    Json(req): Json<CreateRepository>,
) -> ApiResult<(StatusCode, Json<Repository>)> {
    tracing::info!("Adding repository: {} ({})", req.url, req.branch);

    let repo = repository_service::add_repository(&ctx, req).await?;

    Ok((StatusCode::CREATED, Json(repo)))
}

/// GET /repository/list
pub async fn list_repositories(
    State(ctx): State<ServiceContext>,
) -> ApiResult<Json<Vec<Repository>>> {
    tracing::debug!("Listing all repositories");

    let repos = repository_service::list_repositories(&ctx).await?;

    Ok(Json(repos))
}

/// GET /repository/{id}
pub async fn get_repository(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Repository>> {
    tracing::debug!("Getting repository: {}", id);

    let repo = repository_service::get_repository(&ctx, id).await?;

    Ok(Json(repo))
}

/// DELETE /repository/{id}
/// Stop polling a repository and delete it with its builds
pub async fn delete_repository(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting repository: {}", id);

    repository_service::delete_repository(&ctx, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /repository/{id}/builds
/// List builds of a repository, oldest first
pub async fn list_repository_builds(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Build>>> {
    tracing::debug!("Listing builds of repository: {}", id);

    let builds = build_service::list_builds_by_repository(&ctx, id).await?;

    Ok(Json(builds))
}
