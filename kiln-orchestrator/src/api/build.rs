//! Build API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use kiln_core::domain::build::Build;
use kiln_core::domain::log::Log;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{ServiceContext, build_service, log_service};

/// GET /build/{id}
pub async fn get_build(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Build>> {
    tracing::debug!("Getting build: {}", id);

    let build = build_service::get_build(&ctx, id).await?;

    Ok(Json(build))
}

/// DELETE /build/{id}
pub async fn delete_build(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting build: {}", id);

    build_service::delete_build(&ctx, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /build/{id}/log
pub async fn get_build_log(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Log>> {
    tracing::debug!("Getting log of build: {}", id);

    let log = log_service::get_build_log(&ctx, id).await?;

    Ok(Json(log))
}
