//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use thermocal_core::error::ThermocalError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ThermocalError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ThermocalError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            ThermocalError::Storage(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: action records and the device topology cache.
fn apply_v1(conn: &Connection) -> Result<(), ThermocalError> {
    conn.execute_batch(
        "
        -- One row per scheduled action instance. scheduled_date is unix
        -- seconds; scheduled_offset is the original UTC offset in seconds.
        CREATE TABLE IF NOT EXISTS events (
            id                TEXT PRIMARY KEY NOT NULL,
            event_id          TEXT NOT NULL,
            calendar_id       TEXT NOT NULL,
            title             TEXT NOT NULL DEFAULT '',
            action            TEXT NOT NULL CHECK (action IN ('home', 'away')),
            description       TEXT,
            state             TEXT NOT NULL DEFAULT 'waiting'
                              CHECK (state IN ('waiting', 'complete', 'removed')),
            scheduled_date    INTEGER NOT NULL,
            scheduled_offset  INTEGER NOT NULL DEFAULT 0,
            actioned_date     INTEGER,
            created_at        INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_unique_schedule
            ON events (event_id, scheduled_date, calendar_id);

        CREATE INDEX IF NOT EXISTS idx_events_state_date
            ON events (state, scheduled_date);

        CREATE TABLE IF NOT EXISTS device_structures (
            name          TEXT PRIMARY KEY NOT NULL,
            label         TEXT NOT NULL UNIQUE,
            refreshed_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS device_thermostats (
            name              TEXT PRIMARY KEY NOT NULL,
            label             TEXT NOT NULL,
            structure_name    TEXT NOT NULL,
            mode              TEXT NOT NULL,
            eco_mode          TEXT NOT NULL,
            setpoint_celsius  REAL,
            previous_mode     TEXT,
            refreshed_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_device_thermostats_structure
            ON device_thermostats (structure_name);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ThermocalError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
