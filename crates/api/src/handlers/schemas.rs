//! Handlers for schema uploads.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dbforge_core::job::Engine;
use dbforge_pipeline::{SubmitOutcome, SubmitSchema};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};
use crate::idempotency::{IdempotencyStore, StoredResponse};
use crate::state::AppState;

/// Multipart fields collected from an upload.
#[derive(Default)]
struct UploadForm {
    engine: Option<String>,
    name: Option<String>,
    file: Option<PathBuf>,
}

/// POST /api/v1/schemas
///
/// Multipart fields: `engine` (`mysql` | `postgres`), `name` (database
/// name) and `file` (the SQL schema). The file is streamed to the upload
/// directory, then submitted as a job.
///
/// With idempotency enabled, a repeated `Idempotency-Key` gets the first
/// successful response back before the body is read.
pub async fn upload_schema(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitOutcome>)> {
    let key = state
        .config
        .idempotency_enabled
        .then(|| IdempotencyStore::key_from(&headers))
        .flatten();

    if let Some(key) = &key {
        if let Some(stored) = state.idempotency.get(key).await {
            tracing::debug!(idempotency_key = %key, job_id = %stored.outcome.job_id(), "Replaying upload response");
            return Ok((stored.status, Json(stored.outcome)));
        }
    }

    let form = read_form(&state, multipart).await?;

    let request = match validate_form(&form) {
        Ok((engine, db_name, schema_path)) => SubmitSchema {
            engine,
            db_name,
            schema_path,
        },
        Err(e) => {
            if let Some(path) = &form.file {
                discard(path).await;
            }
            return Err(e);
        }
    };

    let schema_path = request.schema_path.clone();
    let outcome = match state.submissions.submit(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            discard(&schema_path).await;
            return Err(e.into());
        }
    };

    let status = match outcome {
        SubmitOutcome::Deduplicated { .. } => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    };
    if let Some(key) = key {
        state.idempotency.insert(key, StoredResponse { status, outcome }).await;
    }
    Ok((status, Json(outcome)))
}

async fn read_form(state: &AppState, mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request("INVALID_UPLOAD", e.body_text()))?
    {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("engine") => form.engine = Some(text(field).await?),
            Some("name") => form.name = Some(text(field).await?),
            Some("file") if form.file.is_none() => {
                match save_upload(&state.config.upload_dir, state.config.max_upload_bytes, field).await {
                    Ok(path) => form.file = Some(path),
                    Err(e) => {
                        if let Some(path) = &form.file {
                            discard(path).await;
                        }
                        return Err(e);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

fn validate_form(form: &UploadForm) -> AppResult<(Engine, String, PathBuf)> {
    let engine = form
        .engine
        .as_deref()
        .and_then(|e| e.parse::<Engine>().ok())
        .ok_or_else(|| AppError::bad_request("INVALID_ENGINE", "Invalid engine type"))?;

    let name = form
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::bad_request("DB_NAME_REQUIRED", "Database name is required"))?;

    let file = form
        .file
        .clone()
        .ok_or_else(|| AppError::bad_request("SCHEMA_REQUIRED", "Schema file is required"))?;

    Ok((engine, name.to_string(), file))
}

async fn text(field: Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request("INVALID_UPLOAD", e.body_text()))
}

/// Stream a file field to a uniquely named file under `dir`.
async fn save_upload(dir: &Path, limit: usize, mut field: Field<'_>) -> AppResult<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to create upload dir: {e}")))?;

    let path = dir.join(format!("{}.sql", uuid::Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to create upload file: {e}")))?;

    let written = match copy_field(&mut field, &mut file, limit).await {
        Ok(written) => written,
        Err(e) => {
            drop(file);
            discard(&path).await;
            return Err(e);
        }
    };

    tracing::debug!(path = %path.display(), bytes = written, "Schema upload stored");
    Ok(path)
}

/// Copy a field into `file`, enforcing `limit`. Returns the bytes written.
async fn copy_field(field: &mut Field<'_>, file: &mut tokio::fs::File, limit: usize) -> AppResult<usize> {
    let mut written = 0usize;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::bad_request("INVALID_UPLOAD", e.body_text()))?
    {
        written += chunk.len();
        if written > limit {
            return Err(AppError::PayloadTooLarge { limit });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to write upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to write upload: {e}")))?;
    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove upload");
        }
    }
}
