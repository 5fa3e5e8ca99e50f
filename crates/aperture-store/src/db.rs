//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex and configures WAL mode
//! plus the usual PRAGMAs on open. Migrations run as part of opening, so a
//! `Database` in hand always has the full schema.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use aperture_core::ApertureError;

use crate::migrations;

/// Thread-safe SQLite wrapper. The connection is behind a Mutex since
/// rusqlite's Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn new(path: &Path) -> Result<Self, ApertureError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ApertureError::Storage(format!("Failed to open database: {}", e)))?;
        configure(&conn)?;
        info!("Database opened at {}", path.display());

        let db = Self { conn: Mutex::new(conn) };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ApertureError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ApertureError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        configure(&conn)?;

        let db = Self { conn: Mutex::new(conn) };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection. The mutex is held
    /// for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ApertureError>
    where
        F: FnOnce(&Connection) -> Result<T, ApertureError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ApertureError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

fn configure(conn: &Connection) -> Result<(), ApertureError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| ApertureError::Storage(format!("Failed to set pragmas: {}", e)))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
