//! Log API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use kiln_core::domain::log::Log;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{ServiceContext, log_service};

/// GET /log/{id}
pub async fn get_log(
    State(ctx): State<ServiceContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Log>> {
    tracing::debug!("Getting log: {}", id);

    let log = log_service::get_log(&ctx, id).await?;

    Ok(Json(log))
}
