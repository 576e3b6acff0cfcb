pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{databases, jobs, schemas};
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /schemas                                  upload a schema (POST, multipart)
/// /jobs/{id}                                job record (GET)
/// /databases/{engine}/{name}/structure      tables and columns (GET)
/// ```
///
/// `max_upload_bytes` bounds the multipart body of `/schemas`; the handler
/// enforces the same limit on the file field itself.
pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/schemas",
            post(schemas::upload_schema)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/jobs/{id}", get(jobs::get_job))
        .route(
            "/databases/{engine}/{name}/structure",
            get(databases::get_structure),
        )
}

/// Room for boundaries and the small text fields around the file part.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
