use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dbforge_core::error::CoreError;
use dbforge_db::StoreError;
use dbforge_pipeline::SubmitError;
use dbforge_provision::ProvisionError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the lower crates and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `dbforge_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// A bad request with a machine-readable code.
    #[error("Bad request: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("Database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("Upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            message: message.into(),
        }
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::Store(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Job with id {id} not found"),
            ),
            AppError::Store(err) => internal(err),

            AppError::Submit(SubmitError::Validation(CoreError::Validation(msg))) => {
                (StatusCode::BAD_REQUEST, "INVALID_DB_NAME", msg.clone())
            }
            AppError::Submit(SubmitError::Validation(core)) => classify_core_error(core),
            AppError::Submit(SubmitError::Queue(err)) => {
                tracing::error!(error = %err, "Job queue unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_UNAVAILABLE",
                    "The job queue is unavailable".to_string(),
                )
            }
            AppError::Submit(err) => internal(err),

            AppError::Provision(ProvisionError::InvalidName(name)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_DB_NAME",
                format!("Invalid database name '{name}'"),
            ),
            AppError::Provision(err @ ProvisionError::Connect { .. }) => {
                tracing::warn!(error = %err, "Target database unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "DATABASE_UNAVAILABLE",
                    err.to_string(),
                )
            }
            AppError::Provision(err) => internal(err),

            AppError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, *code, message.clone())
            }
            AppError::DatabaseNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string())
            }
            AppError::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                self.to_string(),
            ),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Log the detail, return a sanitized 500.
fn internal(err: &dyn std::error::Error) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
