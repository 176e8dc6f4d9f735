//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use offsync_core::Timestamp;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, Timestamp::now().as_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Cached objects, one row per (bucket, id)
        CREATE TABLE objects (
            bucket TEXT NOT NULL,
            id TEXT NOT NULL,
            etag TEXT NOT NULL,               -- empty until the remote acknowledges the object
            payload BLOB NOT NULL,            -- CBOR document
            acl BLOB NOT NULL,                -- CBOR permission set
            created_at INTEGER NOT NULL,      -- Unix ms
            updated_at INTEGER NOT NULL,      -- Unix ms
            deleted INTEGER NOT NULL DEFAULT 0,
            sync_state INTEGER NOT NULL,      -- 0=sync, 1=dirty

            PRIMARY KEY (bucket, id)
        );

        -- Per-bucket sync bookkeeping
        CREATE TABLE bucket_sync (
            bucket TEXT PRIMARY KEY,
            sync_scope TEXT,                  -- stable query string, NULL = not configured
            last_pull_server_time INTEGER,    -- Unix ms, NULL = full pull next
            last_sync_time INTEGER            -- Unix ms
        );

        CREATE INDEX idx_objects_sync_state ON objects(bucket, sync_state);
        CREATE INDEX idx_objects_updated ON objects(bucket, updated_at, id);
        "#,
    )?;

    Ok(())
}
