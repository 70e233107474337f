//! Direct SQLite database access.
//!
//! Holds the memory records and the decision gate audit trail. Project
//! state lives in per-project JSON files instead (see [`crate::state`]).

pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{AceflowError, AceflowResult};

/// Database connection wrapper.
///
/// Thread-safe via internal Mutex. All database operations acquire the lock,
/// so a multi-statement write inside one transaction is never observed
/// half-applied by a concurrent reader.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (and migrate) the database at a specific path
    pub fn open(path: &Path) -> AceflowResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::run_migrations(&conn)?;
        debug!("Opened database at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (tests, ephemeral runs)
    pub fn open_in_memory() -> AceflowResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection
    pub fn lock(&self) -> AceflowResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AceflowError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('memories', 'gate_evaluations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("aceflow.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO gate_evaluations (gate_id, outcome, score, threshold, evaluated_at) VALUES ('DG1', 'PASS', 0.9, 0.8, 0)",
                [],
            )
            .unwrap();

        // Reopening an existing database re-runs idempotent migrations and keeps rows
        drop(db);
        let db = Database::open(&path).unwrap();
        let rows: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM gate_evaluations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
