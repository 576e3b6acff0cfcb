//! Environment-driven configuration shared by the API and worker binaries.
//!
//! Boolean variables follow one rule: the literal `true` enables, any other
//! value disables, and an unset variable takes the documented default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;
use crate::guard::ContentGuard;
use crate::job_events::DEFAULT_CHANNEL_PREFIX;

/// Longest progress channel prefix the postgres bus can carry: PostgreSQL
/// identifiers stop at 63 bytes and the job id takes 36 of them.
pub const PG_MAX_CHANNEL_PREFIX_LEN: usize = 63 - 36;

/// Pipeline policy applied to every job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run the forbidden-keyword guard during the validate stage.
    pub guard_enabled: bool,
    /// Keywords rejected by the guard (compared upper-cased).
    pub forbidden_keywords: Vec<String>,
    /// Validate only; never touch a database.
    pub dry_run: bool,
    /// Fail the job when the target database already exists.
    pub fail_if_exists: bool,
    /// Drop a database this job created when a later step fails.
    pub drop_on_failure: bool,
    /// Delete the schema payload after a successful apply.
    pub delete_after_apply: bool,
    /// Wrap the apply in a transaction where the engine supports it.
    pub transactional_apply: bool,
    /// Prefix of per-job progress channels.
    pub channel_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            guard_enabled: true,
            forbidden_keywords: Vec::new(),
            dry_run: false,
            fail_if_exists: true,
            drop_on_failure: true,
            delete_after_apply: true,
            transactional_apply: true,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                          | Default            |
    /// |----------------------------------|--------------------|
    /// | `SCHEMA_ENABLE_SQL_GUARD`        | `true`             |
    /// | `SCHEMA_FORBIDDEN_KEYWORDS`      | (empty)            |
    /// | `SCHEMA_DRY_RUN`                 | `false`            |
    /// | `SCHEMA_FAIL_IF_DB_EXISTS`       | `true`             |
    /// | `SCHEMA_DROP_DB_ON_FAILURE`      | `true`             |
    /// | `DELETE_SCHEMA_AFTER_APPLY`      | `true`             |
    /// | `SCHEMA_APPLY_TRANSACTIONAL`     | `true`             |
    /// | `SCHEMA_PROGRESS_CHANNEL_PREFIX` | `schema:progress:` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| lookup(key).map_or(default, |v| v == "true");

        let forbidden_keywords = lookup("SCHEMA_FORBIDDEN_KEYWORDS")
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_ascii_uppercase())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            guard_enabled: flag("SCHEMA_ENABLE_SQL_GUARD", defaults.guard_enabled),
            forbidden_keywords,
            dry_run: flag("SCHEMA_DRY_RUN", defaults.dry_run),
            fail_if_exists: flag("SCHEMA_FAIL_IF_DB_EXISTS", defaults.fail_if_exists),
            drop_on_failure: flag("SCHEMA_DROP_DB_ON_FAILURE", defaults.drop_on_failure),
            delete_after_apply: flag("DELETE_SCHEMA_AFTER_APPLY", defaults.delete_after_apply),
            transactional_apply: flag("SCHEMA_APPLY_TRANSACTIONAL", defaults.transactional_apply),
            channel_prefix: lookup("SCHEMA_PROGRESS_CHANNEL_PREFIX")
                .unwrap_or(defaults.channel_prefix),
        }
    }

    /// Check the policy against the backend that will carry it.
    ///
    /// `pg_notify` rejects an over-long channel name while `LISTEN`
    /// silently truncates it, so a long prefix on the postgres backend
    /// would leave every subscriber deaf.
    pub fn validate_for(&self, backend: Backend) -> Result<(), CoreError> {
        if backend == Backend::Postgres && self.channel_prefix.len() > PG_MAX_CHANNEL_PREFIX_LEN {
            return Err(CoreError::Validation(format!(
                "SCHEMA_PROGRESS_CHANNEL_PREFIX must be at most {PG_MAX_CHANNEL_PREFIX_LEN} bytes \
                 on the postgres backend, got {}",
                self.channel_prefix.len()
            )));
        }
        Ok(())
    }

    /// The content guard described by this policy.
    pub fn content_guard(&self) -> ContentGuard {
        ContentGuard::new(self.guard_enabled, &self.forbidden_keywords)
    }
}

/// Which implementations back the store, queue and bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// File job store, in-process queue and bus. Single process only.
    Local,
    /// PostgreSQL job store, `SKIP LOCKED` queue and `LISTEN/NOTIFY` bus.
    Postgres,
}

impl FromStr for Backend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Backend::Local),
            "postgres" => Ok(Backend::Postgres),
            other => Err(CoreError::Validation(format!(
                "Invalid SCHEMA_BACKEND '{other}': expected local or postgres"
            ))),
        }
    }
}

/// Infrastructure endpoints.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub backend: Backend,
    /// Job store / queue / bus database (postgres backend only).
    pub database_url: Option<String>,
    /// Directory of the file job store.
    pub job_store_path: PathBuf,
    /// Sleep between empty polls of the PostgreSQL queue.
    pub queue_poll_interval: Duration,
    /// Server-level connection for MySQL provisioning.
    pub mysql_admin_url: String,
    /// Server-level connection for PostgreSQL provisioning.
    pub postgres_admin_url: String,
}

impl BackendConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                  | Default                                        |
    /// |--------------------------|------------------------------------------------|
    /// | `SCHEMA_BACKEND`         | `local`                                        |
    /// | `DATABASE_URL`           | (unset)                                        |
    /// | `SCHEMA_JOB_STORE_PATH`  | `/tmp/schema-jobs`                             |
    /// | `QUEUE_POLL_INTERVAL_MS` | `500`                                          |
    /// | `MYSQL_ADMIN_URL`        | `mysql://root@localhost:3306`                  |
    /// | `POSTGRES_ADMIN_URL`     | `postgres://postgres@localhost:5432/postgres`  |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let backend = lookup("SCHEMA_BACKEND")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(Backend::Local);

        let database_url = lookup("DATABASE_URL");
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(CoreError::Validation(
                "DATABASE_URL must be set for the postgres backend".into(),
            ));
        }

        let poll_ms: u64 = match lookup("QUEUE_POLL_INTERVAL_MS") {
            Some(v) => v.parse().map_err(|_| {
                CoreError::Validation(format!("QUEUE_POLL_INTERVAL_MS must be a valid u64, got '{v}'"))
            })?,
            None => 500,
        };

        Ok(Self {
            backend,
            database_url,
            job_store_path: lookup("SCHEMA_JOB_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/schema-jobs")),
            queue_poll_interval: Duration::from_millis(poll_ms),
            mysql_admin_url: lookup("MYSQL_ADMIN_URL")
                .unwrap_or_else(|| "mysql://root@localhost:3306".into()),
            postgres_admin_url: lookup("POSTGRES_ADMIN_URL")
                .unwrap_or_else(|| "postgres://postgres@localhost:5432/postgres".into()),
        })
    }
}
