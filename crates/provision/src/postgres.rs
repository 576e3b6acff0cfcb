//! PostgreSQL provisioner.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use dbforge_core::job::Engine;
use dbforge_core::naming::quote_pg_ident;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tokio::sync::watch;

use crate::error::{ApplyError, ProvisionError};
use crate::statements::{Dialect, StatementReader};
use crate::{
    check_name, group_columns, release, ApplySummary, ColumnRow, ColumnStructure,
    DatabaseStructure, Provisioner,
};

const STRUCTURE_QUERY: &str = "\
    SELECT c.table_name::text, c.column_name::text, c.data_type::text, \
           c.is_nullable = 'YES', c.column_default::text \
    FROM information_schema.columns c \
    JOIN information_schema.tables t \
      ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
    WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
    ORDER BY c.table_name, c.ordinal_position";

#[derive(Debug)]
pub struct PostgresProvisioner {
    admin: PgConnectOptions,
    transactional: bool,
}

impl PostgresProvisioner {
    /// `admin_url` points at a maintenance database (usually `postgres`).
    ///
    /// With `transactional`, a schema is applied inside one transaction and
    /// rolled back on the first failing statement.
    pub fn from_url(admin_url: &str, transactional: bool) -> Result<Self, ProvisionError> {
        let admin = PgConnectOptions::from_str(admin_url).map_err(|source| {
            ProvisionError::InvalidUrl {
                engine: Engine::Postgres,
                source,
            }
        })?;
        Ok(Self {
            admin,
            transactional,
        })
    }

    async fn admin_connection(&self) -> Result<PgConnection, ProvisionError> {
        PgConnection::connect_with(&self.admin)
            .await
            .map_err(|source| ProvisionError::Connect {
                engine: Engine::Postgres,
                source,
            })
    }

    async fn database_connection(&self, db_name: &str) -> Result<PgConnection, sqlx::Error> {
        PgConnection::connect_with(&self.admin.clone().database(db_name)).await
    }

    async fn run_ddl(&self, action: &'static str, sql: String, db_name: &str) -> Result<(), ProvisionError> {
        let mut conn = self.admin_connection().await?;
        let result = conn.execute(sqlx::raw_sql(&sql)).await;
        release(conn).await;
        result.map(|_| ()).map_err(|source| ProvisionError::Query {
            action,
            db_name: db_name.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Provisioner for PostgresProvisioner {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let mut conn = self.admin_connection().await?;
        let result: Result<bool, _> =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(db_name)
                .fetch_one(&mut conn)
                .await;
        release(conn).await;
        result.map_err(|source| ProvisionError::Query {
            action: "look up",
            db_name: db_name.to_string(),
            source,
        })
    }

    async fn create(&self, db_name: &str) -> Result<(), ProvisionError> {
        check_name(db_name)?;
        let sql = format!("CREATE DATABASE {}", quote_pg_ident(db_name));
        self.run_ddl("create", sql, db_name).await?;
        tracing::info!(engine = "postgres", db_name, "Database created");
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        check_name(db_name)?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_pg_ident(db_name));
        self.run_ddl("drop", sql, db_name).await?;
        tracing::info!(engine = "postgres", db_name, "Database dropped");
        Ok(())
    }

    async fn apply(
        &self,
        db_name: &str,
        schema: &Path,
        progress: &watch::Sender<u64>,
    ) -> Result<ApplySummary, ApplyError> {
        check_name(db_name).map_err(|_| ApplyError::InvalidName(db_name.to_string()))?;
        let mut reader = StatementReader::open(schema, Dialect::Postgres).await?;
        let mut conn = self
            .database_connection(db_name)
            .await
            .map_err(|source| ApplyError::Connect {
                db_name: db_name.to_string(),
                source,
            })?;

        let result = if self.transactional {
            apply_in_transaction(&mut conn, &mut reader, progress).await
        } else {
            run_statements(&mut conn, &mut reader, progress)
                .await
                .map_err(StatementFailure::into_partial)
        };
        release(conn).await;
        result
    }

    async fn load_structure(&self, db_name: &str) -> Result<DatabaseStructure, ProvisionError> {
        check_name(db_name)?;
        let mut conn = self
            .database_connection(db_name)
            .await
            .map_err(|source| ProvisionError::Connect {
                engine: Engine::Postgres,
                source,
            })?;
        let rows: Result<Vec<(String, String, String, bool, Option<String>)>, _> =
            sqlx::query_as(STRUCTURE_QUERY).fetch_all(&mut conn).await;
        release(conn).await;

        let rows = rows.map_err(|source| ProvisionError::Query {
            action: "inspect",
            db_name: db_name.to_string(),
            source,
        })?;
        Ok(group_columns(rows.into_iter().map(
            |(table, name, data_type, nullable, default)| ColumnRow {
                table,
                column: ColumnStructure {
                    name,
                    data_type,
                    nullable,
                    default,
                },
            },
        )))
    }
}

async fn apply_in_transaction(
    conn: &mut PgConnection,
    reader: &mut StatementReader<tokio::fs::File>,
    progress: &watch::Sender<u64>,
) -> Result<ApplySummary, ApplyError> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|source| ApplyError::Transaction {
            action: "begin",
            source,
        })?;

    match run_statements(&mut tx, reader, progress).await {
        Ok(summary) => {
            tx.commit().await.map_err(|source| ApplyError::Transaction {
                action: "commit",
                source,
            })?;
            Ok(ApplySummary {
                transactional: true,
                ..summary
            })
        }
        Err(failure) => {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "Rollback after failed apply did not complete");
            }
            Err(failure.into_rolled_back())
        }
    }
}

/// Why a statement loop stopped.
enum StatementFailure {
    Read(ApplyError),
    Execute {
        index: usize,
        applied: usize,
        source: sqlx::Error,
    },
}

impl StatementFailure {
    fn into_rolled_back(self) -> ApplyError {
        match self {
            Self::Read(e) => e,
            Self::Execute { index, source, .. } => ApplyError::RolledBack { index, source },
        }
    }

    fn into_partial(self) -> ApplyError {
        match self {
            Self::Read(e) => e,
            Self::Execute {
                index,
                applied,
                source,
            } => ApplyError::Partial {
                index,
                applied,
                source,
            },
        }
    }
}

async fn run_statements(
    conn: &mut PgConnection,
    reader: &mut StatementReader<tokio::fs::File>,
    progress: &watch::Sender<u64>,
) -> Result<ApplySummary, StatementFailure> {
    let mut applied = 0usize;
    let mut bytes = 0u64;
    while let Some(stmt) = reader.next_statement().await.map_err(StatementFailure::Read)? {
        conn.execute(sqlx::raw_sql(&stmt.sql))
            .await
            .map_err(|source| StatementFailure::Execute {
                index: applied + 1,
                applied,
                source,
            })?;
        applied += 1;
        bytes = stmt.end_offset;
        progress.send_replace(bytes);
    }
    Ok(ApplySummary {
        statements: applied,
        bytes,
        transactional: false,
    })
}
