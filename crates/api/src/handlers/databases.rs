//! Handlers for provisioned databases.

use axum::extract::{Path, State};
use axum::Json;
use dbforge_core::job::Engine;
use dbforge_core::naming::is_valid_db_name;
use dbforge_provision::DatabaseStructure;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/v1/databases/{engine}/{name}/structure
///
/// Tables and columns of a provisioned database, read from the engine's
/// catalog.
pub async fn get_structure(
    State(state): State<AppState>,
    Path((engine, name)): Path<(String, String)>,
) -> AppResult<Json<DatabaseStructure>> {
    let engine: Engine = engine
        .parse()
        .map_err(|_| AppError::bad_request("INVALID_ENGINE", "Invalid engine type"))?;
    if !is_valid_db_name(&name) {
        return Err(AppError::bad_request(
            "INVALID_DB_NAME",
            format!("Invalid database name '{name}'"),
        ));
    }

    let provisioner = state.services.provisioners.get(engine).ok_or_else(|| {
        AppError::InternalError(format!("No provisioner registered for {engine}"))
    })?;

    if !provisioner.exists(&name).await? {
        return Err(AppError::DatabaseNotFound(name));
    }

    let structure = provisioner.load_structure(&name).await?;
    tracing::debug!(
        engine = %engine,
        db_name = %name,
        tables = structure.tables.len(),
        "Loaded database structure",
    );
    Ok(Json(structure))
}
