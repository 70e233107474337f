//! Database migrations
//!
//! SQL migrations are embedded as strings and executed when a database is opened.

use rusqlite::Connection;

use crate::AceflowResult;

/// Memory and gate history tables (001)
pub const CORE_TABLES_SQL: &str = include_str!("001_core_tables.sql");

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> AceflowResult<()> {
    conn.execute_batch(CORE_TABLES_SQL)?;
    Ok(())
}
