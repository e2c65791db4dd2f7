//! Database connection management.
//!
//! A single rusqlite Connection behind a Mutex, opened in WAL mode with
//! migrations applied before first use.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use thermocal_core::error::ThermocalError;

use crate::migrations;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;";

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the cache database at `path`, creating parent
    /// directories and running pending migrations.
    pub fn new(path: &Path) -> Result<Self, ThermocalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ThermocalError::Storage(format!("Failed to open database: {}", e)))?;
        let db = Self::init(conn)?;

        info!(path = %path.display(), "Cache database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ThermocalError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ThermocalError::Storage(format!("Failed to open in-memory db: {}", e))
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ThermocalError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| ThermocalError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection. The mutex is held
    /// for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ThermocalError>
    where
        F: FnOnce(&Connection) -> Result<T, ThermocalError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ThermocalError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Like [`Database::with_conn`], with mutable access for transactions.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ThermocalError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ThermocalError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ThermocalError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
