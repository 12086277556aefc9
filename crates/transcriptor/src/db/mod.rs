//! SQLite persistence for asset/job pairs.
//!
//! One connection per process, shared behind a mutex. Status changes go
//! through `with_transaction`, which takes SQLite's write lock up front so
//! compare-and-swap reads and writes cannot interleave.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod asset_repo;
pub mod error;
pub mod migrations;

pub use error::DatabaseError;

/// Shared handle to the records database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating it and its parent directory if
    /// needed, and migrates it.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        log::debug!("journal_mode={}", mode);
        conn.pragma_update(None, "busy_timeout", 5000)?;
        let db = Self::prepare(conn)?;

        log::info!("Records database at {}", path.display());
        Ok(db)
    }

    /// Fresh migrated database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(mut conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_all(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction: committed on `Ok`, rolled
    /// back on `Err`.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        Ok(value)
    }
}

/// `<data dir>/transcriptor/transcriptor.db`
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("transcriptor").join("transcriptor.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retired_count(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM retired_asset_ids", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_open_creates_parent_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("records.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        let version = db.with_conn(migrations::schema_version).unwrap();
        assert_eq!(version, migrations::latest_version());

        // Reopening an existing file is fine
        drop(db);
        Database::open(&path).unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().unwrap();
        let enabled: i64 = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<(), DatabaseError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO retired_asset_ids (id, retired_at) VALUES ('r1', '2026-01-01')",
                [],
            )?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(retired_count(&db), 0);
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();

        db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO retired_asset_ids (id, retired_at) VALUES ('t1', '2026-01-01')",
                [],
            )?;
            Ok::<_, DatabaseError>(())
        })
        .unwrap();
        assert_eq!(retired_count(&other), 1);
    }
}
