//! Database schema migrations for SQLite.
//!
//! Versions are recorded in `schema_migrations`; each step runs once, in
//! order, inside a single transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::traits::now_millis;

/// Ordered schema steps. Entry `n` upgrades version `n` to `n + 1`.
const MIGRATIONS: &[fn(&Connection) -> Result<()>] = &[apply_v1];

/// Schema version after all migrations ran.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call repeatedly.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied = schema_version(conn)?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema {} is newer than supported {}",
            applied, CURRENT_VERSION
        )));
    }
    if applied == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (step, apply) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        let version = step as u32 + 1;
        apply(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, now_millis()],
        )?;
        tracing::debug!(version, "applied schema migration");
    }
    tx.commit()?;

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content blobs with the metadata reconciliation needs
        CREATE TABLE blobs (
            id BLOB PRIMARY KEY,              -- content id
            resource TEXT NOT NULL,           -- normalized hm:// resource
            ts INTEGER NOT NULL,              -- logical timestamp, u64 stored bitwise
            data BLOB NOT NULL,               -- raw bytes
            inserted_at INTEGER NOT NULL      -- local timestamp of ingestion
        );

        -- Private visibility: one row per space a blob is restricted to
        CREATE TABLE blob_visibility (
            id BLOB NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
            space TEXT NOT NULL,
            PRIMARY KEY (id, space)
        );

        -- Durable subscriptions
        CREATE TABLE subscriptions (
            iri TEXT PRIMARY KEY,
            recursive INTEGER NOT NULL,       -- 0/1
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_blobs_resource ON blobs(resource);
        "#,
    )?;

    Ok(())
}
