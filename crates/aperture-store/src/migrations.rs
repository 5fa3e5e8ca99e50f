//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use aperture_core::ApertureError;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ApertureError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ApertureError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ApertureError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: frames");
    }

    Ok(())
}

/// Version 1: the frames table, one row per image_id.
fn apply_v1(conn: &Connection) -> Result<(), ApertureError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS frames (
            image_id       TEXT PRIMARY KEY NOT NULL,
            seq            INTEGER NOT NULL,
            timestamp      TEXT NOT NULL,
            path           TEXT NOT NULL,
            num_keypoints  INTEGER NOT NULL DEFAULT 0,
            features       BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_frames_seq
            ON frames (seq ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'frames');
        ",
    )
    .map_err(|e| ApertureError::Storage(format!("Failed to apply migration v1: {}", e)))
}
