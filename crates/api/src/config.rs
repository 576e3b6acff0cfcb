use std::path::PathBuf;

/// HTTP server configuration loaded from environment variables.
///
/// Job pipeline and backend settings live in
/// [`dbforge_core::config`]; this struct only covers the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs of embedded workers.
    pub shutdown_timeout_secs: u64,
    /// Directory receiving uploaded schema files.
    pub upload_dir: PathBuf,
    /// Largest accepted upload body, in bytes.
    pub max_upload_bytes: usize,
    /// Mount the `/ws` progress endpoint.
    pub ws_progress_enabled: bool,
    /// Replay upload responses for a repeated `Idempotency-Key` header.
    pub idempotency_enabled: bool,
    /// Workers run inside the API process (local backend only).
    pub embedded_workers: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `HOST`                      | `0.0.0.0`                |
    /// | `PORT`                      | `3000`                   |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                     |
    /// | `SCHEMA_UPLOAD_DIR`         | `/tmp/schema-uploads`    |
    /// | `SCHEMA_MAX_UPLOAD_BYTES`   | `52428800`               |
    /// | `SCHEMA_ENABLE_WS_PROGRESS` | `true`                   |
    /// | `SCHEMA_ENABLE_IDEMPOTENCY` | `false`                  |
    /// | `SCHEMA_EMBEDDED_WORKERS`   | `1`                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let upload_dir = std::env::var("SCHEMA_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/schema-uploads"));

        let max_upload_bytes: usize = std::env::var("SCHEMA_MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "52428800".into())
            .parse()
            .expect("SCHEMA_MAX_UPLOAD_BYTES must be a valid usize");

        let ws_progress_enabled = std::env::var("SCHEMA_ENABLE_WS_PROGRESS")
            .map(|v| v == "true")
            .unwrap_or(true);

        let idempotency_enabled = std::env::var("SCHEMA_ENABLE_IDEMPOTENCY")
            .map(|v| v == "true")
            .unwrap_or(false);

        let embedded_workers: usize = std::env::var("SCHEMA_EMBEDDED_WORKERS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("SCHEMA_EMBEDDED_WORKERS must be a valid usize");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            upload_dir,
            max_upload_bytes,
            ws_progress_enabled,
            idempotency_enabled,
            embedded_workers,
        }
    }
}
