//! Database provisioners: create, drop and apply schemas on target servers.
//!
//! Each engine implements [`Provisioner`]; the job pipeline looks them up
//! through a [`ProvisionerRegistry`] keyed by [`Engine`].

pub mod error;
pub mod mysql;
pub mod postgres;
pub mod statements;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dbforge_core::job::Engine;
use dbforge_core::naming::is_valid_db_name;
use serde::Serialize;
use tokio::sync::watch;

pub use error::{ApplyError, ProvisionError};
pub use mysql::MysqlProvisioner;
pub use postgres::PostgresProvisioner;

/// What an apply run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub statements: usize,
    pub bytes: u64,
    /// Whether the run was committed as a single transaction.
    pub transactional: bool,
}

/// Capability interface of one database engine.
///
/// Server-level operations use an administrative connection; `apply` and
/// `load_structure` connect to the named database. Every call opens its own
/// connection and closes it before returning.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn engine(&self) -> Engine;

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError>;

    async fn create(&self, db_name: &str) -> Result<(), ProvisionError>;

    /// `DROP DATABASE IF EXISTS`.
    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError>;

    /// Stream `schema` into the database, statement by statement.
    ///
    /// The number of schema bytes consumed so far is written to `progress`
    /// after every executed statement.
    async fn apply(
        &self,
        db_name: &str,
        schema: &Path,
        progress: &watch::Sender<u64>,
    ) -> Result<ApplySummary, ApplyError>;

    async fn load_structure(&self, db_name: &str) -> Result<DatabaseStructure, ProvisionError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ProvisionerRegistry {
    by_engine: HashMap<Engine, Arc<dyn Provisioner>>,
}

impl ProvisionerRegistry {
    /// Registry with both engines reachable through their admin URLs.
    pub fn from_urls(
        mysql_admin_url: &str,
        postgres_admin_url: &str,
        transactional: bool,
    ) -> Result<Self, ProvisionError> {
        let mut registry = Self::default();
        registry.register(Arc::new(MysqlProvisioner::from_url(mysql_admin_url)?));
        registry.register(Arc::new(PostgresProvisioner::from_url(
            postgres_admin_url,
            transactional,
        )?));
        Ok(registry)
    }

    /// Register `provisioner` for its engine, replacing any previous one.
    pub fn register(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.by_engine.insert(provisioner.engine(), provisioner);
    }

    pub fn get(&self, engine: Engine) -> Option<Arc<dyn Provisioner>> {
        self.by_engine.get(&engine).cloned()
    }
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStructure {
    pub tables: Vec<TableStructure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStructure {
    pub name: String,
    pub columns: Vec<ColumnStructure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStructure {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One row of a columns query, ordered by table then ordinal position.
pub(crate) struct ColumnRow {
    pub table: String,
    pub column: ColumnStructure,
}

/// Group consecutive column rows into tables.
pub(crate) fn group_columns(rows: impl IntoIterator<Item = ColumnRow>) -> DatabaseStructure {
    let mut tables: Vec<TableStructure> = Vec::new();
    for row in rows {
        match tables.last_mut() {
            Some(last) if last.name == row.table => last.columns.push(row.column),
            _ => tables.push(TableStructure {
                name: row.table,
                columns: vec![row.column],
            }),
        }
    }
    DatabaseStructure { tables }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn check_name(db_name: &str) -> Result<(), ProvisionError> {
    if is_valid_db_name(db_name) {
        Ok(())
    } else {
        Err(ProvisionError::InvalidName(db_name.to_string()))
    }
}

/// Close a connection, logging instead of failing.
pub(crate) async fn release<C: sqlx::Connection>(conn: C) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Closing provisioner connection failed");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn row(table: &str, column: &str) -> ColumnRow {
        ColumnRow {
            table: table.into(),
            column: ColumnStructure {
                name: column.into(),
                data_type: "integer".into(),
                nullable: false,
                default: None,
            },
        }
    }

    #[test]
    fn groups_columns_by_table_in_order() {
        let structure = group_columns([row("a", "id"), row("a", "x"), row("b", "id")]);
        assert_eq!(structure.tables.len(), 2);
        assert_eq!(structure.tables[0].name, "a");
        assert_eq!(structure.tables[0].columns.len(), 2);
        assert_eq!(structure.tables[1].columns[0].name, "id");
    }

    #[test]
    fn structure_serializes_camel_case() {
        let structure = group_columns([row("t", "id")]);
        let json = serde_json::to_value(&structure).unwrap();
        assert_eq!(json["tables"][0]["columns"][0]["dataType"], "integer");
        assert!(json["tables"][0]["columns"][0].get("default").is_none());
    }

    #[test]
    fn names_are_rechecked() {
        assert!(check_name("shop_1").is_ok());
        assert_matches!(check_name("shop; DROP"), Err(ProvisionError::InvalidName(_)));
    }

    #[test]
    fn registry_builds_both_engines() {
        let registry = ProvisionerRegistry::from_urls(
            "mysql://root@localhost:3306",
            "postgres://postgres@localhost:5432/postgres",
            true,
        )
        .unwrap();
        for engine in Engine::ALL {
            assert_eq!(registry.get(engine).unwrap().engine(), engine);
        }
    }

    #[test]
    fn registry_rejects_bad_url() {
        let err = ProvisionerRegistry::from_urls("not a url", "postgres://localhost/postgres", true)
            .err()
            .unwrap();
        assert_matches!(err, ProvisionError::InvalidUrl { engine: Engine::Mysql, .. });
    }
}
