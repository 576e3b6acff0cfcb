//! Database name validation and identifier quoting.
//!
//! Callers validate names against [`DB_NAME_PATTERN`] before a job is
//! created; the quoting helpers are still applied to every DDL statement.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Accepted database names: ASCII letters, digits and underscores, 1 to 100 chars.
pub const DB_NAME_PATTERN: &str = r"^[A-Za-z0-9_]{1,100}$";

static DB_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DB_NAME_PATTERN).expect("valid regex"));

/// Returns `true` when `name` matches [`DB_NAME_PATTERN`].
pub fn is_valid_db_name(name: &str) -> bool {
    DB_NAME_RE.is_match(name)
}

/// Validate a database name, returning a [`CoreError::Validation`] on mismatch.
pub fn validate_db_name(name: &str) -> Result<(), CoreError> {
    if is_valid_db_name(name) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid database name '{name}': must match {DB_NAME_PATTERN}"
        )))
    }
}

/// Quote an identifier for PostgreSQL: `"name"`, embedded `"` doubled.
///
/// ```
/// use dbforge_core::naming::quote_pg_ident;
///
/// assert_eq!(quote_pg_ident("shop"), "\"shop\"");
/// assert_eq!(quote_pg_ident("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_pg_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an identifier for MySQL: `` `name` ``, embedded backticks doubled.
///
/// ```
/// use dbforge_core::naming::quote_mysql_ident;
///
/// assert_eq!(quote_mysql_ident("shop"), "`shop`");
/// assert_eq!(quote_mysql_ident("a`b"), "`a``b`");
/// ```
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
