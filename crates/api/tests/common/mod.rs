//! Shared fixtures for API integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use dbforge_core::config::PipelineConfig;
use dbforge_core::job::Engine;
use dbforge_db::FileJobStore;
use dbforge_pipeline::Services;
use dbforge_provision::{
    ApplyError, ApplySummary, ColumnStructure, DatabaseStructure, ProvisionError, Provisioner,
    ProvisionerRegistry, TableStructure,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

use dbforge_api::config::ServerConfig;
use dbforge_api::router::build_app_router;
use dbforge_api::state::AppState;
use dbforge_api::ws::WsManager;

// ---------------------------------------------------------------------------
// Fake MySQL server
// ---------------------------------------------------------------------------

/// Provisioner that keeps its databases in memory and applies instantly.
#[derive(Default)]
pub struct FakeProvisioner {
    databases: Mutex<HashSet<String>>,
}

impl FakeProvisioner {
    pub fn with_database(self, name: &str) -> Self {
        self.databases.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        Ok(self.has_database(db_name))
    }

    async fn create(&self, db_name: &str) -> Result<(), ProvisionError> {
        self.databases.lock().unwrap().insert(db_name.to_string());
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        self.databases.lock().unwrap().remove(db_name);
        Ok(())
    }

    async fn apply(
        &self,
        _db_name: &str,
        schema: &Path,
        progress: &watch::Sender<u64>,
    ) -> Result<ApplySummary, ApplyError> {
        let bytes = tokio::fs::metadata(schema).await?.len();
        progress.send_replace(bytes);
        Ok(ApplySummary {
            statements: 1,
            bytes,
            transactional: false,
        })
    }

    async fn load_structure(&self, _db_name: &str) -> Result<DatabaseStructure, ProvisionError> {
        Ok(DatabaseStructure {
            tables: vec![TableStructure {
                name: "customers".into(),
                columns: vec![
                    ColumnStructure {
                        name: "id".into(),
                        data_type: "int".into(),
                        nullable: false,
                        default: None,
                    },
                    ColumnStructure {
                        name: "email".into(),
                        data_type: "varchar".into(),
                        nullable: true,
                        default: Some("''".into()),
                    },
                ],
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub const SCHEMA: &str = "CREATE TABLE customers (id INT PRIMARY KEY);\n";

/// Largest upload accepted by the test server.
pub const TEST_MAX_UPLOAD: usize = 4096;

/// Build a test `ServerConfig` rooted in `dir`.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        upload_dir: dir.join("uploads"),
        max_upload_bytes: TEST_MAX_UPLOAD,
        ws_progress_enabled: true,
        idempotency_enabled: false,
        embedded_workers: 0,
    }
}

/// A router over local services plus handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub services: Services,
    pub fake: Arc<FakeProvisioner>,
    pub dir: TempDir,
}

impl TestApp {
    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    /// Files currently sitting in the upload directory.
    pub fn uploads(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.upload_dir()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Build the full application router with the production middleware stack,
/// backed by a file job store in a temp dir and a fake MySQL provisioner.
pub fn build_test_app() -> TestApp {
    build_test_app_with(PipelineConfig::default(), FakeProvisioner::default(), |_| {})
}

pub fn build_test_app_with(
    pipeline: PipelineConfig,
    fake: FakeProvisioner,
    tweak: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);

    let fake = Arc::new(fake);
    let mut registry = ProvisionerRegistry::default();
    registry.register(fake.clone());

    let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
    let services = Services::local(store, registry, pipeline);

    let state = AppState::new(services.clone(), config.clone(), Arc::new(WsManager::new()));
    let router = build_app_router(state, &config);

    TestApp {
        router,
        services,
        fake,
        dir,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "dbforge-test-boundary";

/// One multipart part: name, optional filename, contents.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub contents: &'a [u8],
}

pub fn text_part<'a>(name: &'a str, value: &'a str) -> Part<'a> {
    Part {
        name,
        filename: None,
        contents: value.as_bytes(),
    }
}

pub fn file_part(contents: &[u8]) -> Part<'_> {
    Part {
        name: "file",
        filename: Some("schema.sql"),
        contents,
    }
}

/// Encode `parts` as a `multipart/form-data` body.
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/sql\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                    .as_bytes(),
            ),
        }
        body.extend_from_slice(part.contents);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart upload to `/api/v1/schemas`.
pub async fn upload(app: &TestApp, parts: &[Part<'_>]) -> Response<Body> {
    send_upload(app, parts, None).await
}

/// POST a multipart upload carrying an `Idempotency-Key` header.
pub async fn upload_with_key(app: &TestApp, key: &str, parts: &[Part<'_>]) -> Response<Body> {
    send_upload(app, parts, Some(key)).await
}

async fn send_upload(app: &TestApp, parts: &[Part<'_>], key: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/schemas")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    let request = builder.body(Body::from(multipart_body(parts))).unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// Upload a well-formed MySQL schema for `db_name`.
pub async fn upload_schema(app: &TestApp, db_name: &str, schema: &str) -> Response<Body> {
    upload(
        app,
        &[
            text_part("engine", "mysql"),
            text_part("name", db_name),
            file_part(schema.as_bytes()),
        ],
    )
    .await
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
