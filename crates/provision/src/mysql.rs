//! MySQL provisioner.
//!
//! MySQL commits DDL implicitly, so a schema is always applied best-effort:
//! a failing statement reports how many statements had already run.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use dbforge_core::job::Engine;
use dbforge_core::naming::quote_mysql_ident;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use tokio::sync::watch;

use crate::error::{ApplyError, ProvisionError};
use crate::statements::{Dialect, StatementReader};
use crate::{
    check_name, group_columns, release, ApplySummary, ColumnRow, ColumnStructure,
    DatabaseStructure, Provisioner,
};

const STRUCTURE_QUERY: &str = "\
    SELECT CAST(c.TABLE_NAME AS CHAR), CAST(c.COLUMN_NAME AS CHAR), \
           CAST(c.COLUMN_TYPE AS CHAR), CAST(c.IS_NULLABLE = 'YES' AS SIGNED), \
           CAST(c.COLUMN_DEFAULT AS CHAR) \
    FROM information_schema.COLUMNS c \
    JOIN information_schema.TABLES t \
      ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME \
    WHERE c.TABLE_SCHEMA = ? AND t.TABLE_TYPE = 'BASE TABLE' \
    ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION";

pub struct MysqlProvisioner {
    admin: MySqlConnectOptions,
}

impl MysqlProvisioner {
    pub fn from_url(admin_url: &str) -> Result<Self, ProvisionError> {
        let admin = MySqlConnectOptions::from_str(admin_url).map_err(|source| {
            ProvisionError::InvalidUrl {
                engine: Engine::Mysql,
                source,
            }
        })?;
        Ok(Self { admin })
    }

    async fn admin_connection(&self) -> Result<MySqlConnection, ProvisionError> {
        MySqlConnection::connect_with(&self.admin)
            .await
            .map_err(|source| ProvisionError::Connect {
                engine: Engine::Mysql,
                source,
            })
    }

    async fn database_connection(&self, db_name: &str) -> Result<MySqlConnection, sqlx::Error> {
        MySqlConnection::connect_with(&self.admin.clone().database(db_name)).await
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
impl Provisioner for MysqlProvisioner {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let mut conn = self.admin_connection().await?;
        let result: Result<i64, _> =
            sqlx::query_scalar("SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?")
                .bind(db_name)
                .fetch_one(&mut conn)
                .await;
        release(conn).await;
        result
            .map(|count| count > 0)
            .map_err(|source| ProvisionError::Query {
                action: "look up",
                db_name: db_name.to_string(),
                source,
            })
    }

    async fn create(&self, db_name: &str) -> Result<(), ProvisionError> {
        check_name(db_name)?;
        let sql = format!("CREATE DATABASE {}", quote_mysql_ident(db_name));
        self.run_ddl("create", sql, db_name).await?;
        tracing::info!(engine = "mysql", db_name, "Database created");
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        check_name(db_name)?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_mysql_ident(db_name));
        self.run_ddl("drop", sql, db_name).await?;
        tracing::info!(engine = "mysql", db_name, "Database dropped");
        Ok(())
    }

    async fn apply(
        &self,
        db_name: &str,
        schema: &Path,
        progress: &watch::Sender<u64>,
    ) -> Result<ApplySummary, ApplyError> {
        check_name(db_name).map_err(|_| ApplyError::InvalidName(db_name.to_string()))?;
        let mut reader = StatementReader::open(schema, Dialect::MySql).await?;
        let mut conn = self
            .database_connection(db_name)
            .await
            .map_err(|source| ApplyError::Connect {
                db_name: db_name.to_string(),
                source,
            })?;

        let result = run_statements(&mut conn, &mut reader, progress).await;
        release(conn).await;
        result
    }

    async fn load_structure(&self, db_name: &str) -> Result<DatabaseStructure, ProvisionError> {
        check_name(db_name)?;
        let mut conn = self
            .database_connection(db_name)
            .await
            .map_err(|source| ProvisionError::Connect {
                engine: Engine::Mysql,
                source,
            })?;
        let rows: Result<Vec<(String, String, String, i64, Option<String>)>, _> =
            sqlx::query_as(STRUCTURE_QUERY)
                .bind(db_name)
                .fetch_all(&mut conn)
                .await;
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
                    nullable: nullable != 0,
                    default,
                },
            },
        )))
    }
}

async fn run_statements(
    conn: &mut MySqlConnection,
    reader: &mut StatementReader<tokio::fs::File>,
    progress: &watch::Sender<u64>,
) -> Result<ApplySummary, ApplyError> {
    let mut applied = 0usize;
    let mut bytes = 0u64;
    while let Some(stmt) = reader.next_statement().await? {
        if let Err(source) = conn.execute(sqlx::raw_sql(&stmt.sql)).await {
            tracing::warn!(
                statement = applied + 1,
                applied,
                "MySQL apply stopped, earlier statements remain applied"
            );
            return Err(ApplyError::Partial {
                index: applied + 1,
                applied,
                source,
            });
        }
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

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn provisioner() -> MysqlProvisioner {
        MysqlProvisioner::from_url("mysql://root@localhost:3306").unwrap()
    }

    #[tokio::test]
    async fn ddl_with_invalid_name_never_connects() {
        let p = provisioner();
        assert_matches!(p.create("a`b").await, Err(ProvisionError::InvalidName(_)));
        assert_matches!(p.drop_database("x y").await, Err(ProvisionError::InvalidName(_)));
        assert_matches!(p.load_structure("").await, Err(ProvisionError::InvalidName(_)));
    }

    #[tokio::test]
    async fn apply_reports_missing_schema_file() {
        let (tx, _rx) = watch::channel(0);
        let dir = tempfile::tempdir().unwrap();
        let err = provisioner()
            .apply("shop", &dir.path().join("missing.sql"), &tx)
            .await
            .unwrap_err();
        assert_matches!(err, ApplyError::Io(_));
    }
}
