use dbforge_core::job::Engine;

/// Failure of a server-level operation (exists / create / drop / structure).
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Invalid database name '{0}'")]
    InvalidName(String),

    #[error("Invalid {engine} connection URL: {source}")]
    InvalidUrl {
        engine: Engine,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to connect to {engine} server: {source}")]
    Connect {
        engine: Engine,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to {action} database '{db_name}': {source}")]
    Query {
        action: &'static str,
        db_name: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Failure while applying a schema to a database.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Invalid database name '{0}'")]
    InvalidName(String),

    #[error("Failed to connect to database '{db_name}': {source}")]
    Connect {
        db_name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to read schema: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema is not valid UTF-8 near byte {offset}")]
    InvalidUtf8 { offset: u64 },

    #[error("Statement {index} failed, transaction rolled back: {source}")]
    RolledBack {
        index: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "Statement {index} failed after {applied} statement(s) had been applied \
         (schema partially applied): {source}"
    )]
    Partial {
        index: usize,
        applied: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to {action} transaction: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },
}
