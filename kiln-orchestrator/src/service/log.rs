//! Log Service

use kiln_core::domain::log::Log;
use uuid::Uuid;

use crate::service::{Result, ServiceContext, ServiceError};

/// Get a log by ID
pub async fn get_log(ctx: &ServiceContext, id: Uuid) -> Result<Log> {
    Ok(ctx.logs.get_log(id).await?)
}

/// Get the log of a build
pub async fn get_build_log(ctx: &ServiceContext, build_id: Uuid) -> Result<Log> {
    let build = ctx.builds.get_build(build_id).await?;
    let log_id = build
        .log_id
        .ok_or_else(|| ServiceError::NotFound(format!("log of build {}", build_id)))?;

    Ok(ctx.logs.get_log(log_id).await?)
}
