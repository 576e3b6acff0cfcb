//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::Json;
use dbforge_core::error::CoreError;
use dbforge_core::job::SchemaJob;
use dbforge_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/v1/jobs/{id}
///
/// Returns the stored job record. Clients poll this until `status` is
/// `success` or `failed`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<SchemaJob>> {
    let job = state
        .services
        .store
        .get(id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound { entity: "Job", id }))?;

    Ok(Json(job))
}
