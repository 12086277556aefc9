//! Schema migrations.
//!
//! Applied versions are recorded in `schema_history`. A database whose
//! recorded version is ahead of this build is refused rather than used.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "media_assets",
        sql: include_str!("sql/001_create_media_assets.sql"),
    },
    Migration {
        version: 2,
        name: "transcription_jobs",
        sql: include_str!("sql/002_create_transcription_jobs.sql"),
    },
    Migration {
        version: 3,
        name: "retired_asset_ids",
        sql: include_str!("sql/003_create_retired_asset_ids.sql"),
    },
];

/// Highest schema version this build knows how to use.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Version recorded in `schema_history`, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_history",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to `latest_version()`.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_history (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let found = schema_version(conn)?;
    let supported = latest_version();
    if found > supported {
        return Err(DatabaseError::SchemaTooNew { found, supported });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > found) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<(), DatabaseError> {
    log::info!("Applying schema v{} ({})", migration.version, migration.name);

    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO schema_history (version, name) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.name],
    )
    .map_err(failed)?;
    tx.commit()?;
    Ok(())
}
