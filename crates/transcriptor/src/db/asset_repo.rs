//! Asset repository: rows of `media_assets` and `transcription_jobs`.
//!
//! Functions take a `&Connection` so callers can compose them inside a
//! single transaction (see `Database::with_transaction`).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw asset row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRow {
    pub id: String,
    pub kind: String,
    pub source_path: String,
    pub original_name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl AssetRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            source_path: row.get("source_path")?,
            original_name: row.get("original_name")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// A raw transcription job row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub asset_id: String,
    pub language: String,
    pub status: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub container_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            asset_id: row.get("asset_id")?,
            language: row.get("language")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            container_id: row.get("container_id")?,
            failure_reason: row.get("failure_reason")?,
        })
    }
}

/// Fields written by a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusChange<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub failure_reason: Option<&'a str>,
    /// Clears `started_at`/`container_id` (used when a launch is rolled back).
    pub reset_worker: bool,
}

pub fn insert_asset(conn: &Connection, asset: &AssetRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO media_assets (id, kind, source_path, original_name, status, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            asset.id,
            asset.kind,
            asset.source_path,
            asset.original_name,
            asset.status,
            asset.created_at,
            asset.completed_at,
        ],
    )?;
    Ok(())
}

pub fn insert_job(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO transcription_jobs (id, asset_id, language, status, created_at,
         started_at, completed_at, container_id, failure_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.asset_id,
            job.language,
            job.status,
            job.created_at,
            job.started_at,
            job.completed_at,
            job.container_id,
            job.failure_reason,
        ],
    )?;
    Ok(())
}

pub fn find_asset(conn: &Connection, id: &str) -> Result<Option<AssetRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM media_assets WHERE id = ?1",
            params![id],
            AssetRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_job_by_asset(conn: &Connection, asset_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM transcription_jobs WHERE asset_id = ?1",
            params![asset_id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists assets newest first, optionally restricted to one status.
pub fn list_assets(
    conn: &Connection,
    status: Option<&str>,
    limit: u64,
    offset: u64,
) -> Result<Vec<AssetRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM media_assets
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![status, limit as i64, offset as i64], AssetRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves both rows of a pair from `change.from` to `change.to`.
///
/// Each UPDATE is guarded by the expected current status, so the change only
/// lands when nobody moved the pair first. Returns the number of rows updated
/// per table as `(assets, jobs)`; the caller decides how to treat a miss.
pub fn compare_and_set_status(
    conn: &Connection,
    asset_id: &str,
    change: &StatusChange<'_>,
) -> Result<(usize, usize), DatabaseError> {
    let assets = conn.execute(
        "UPDATE media_assets SET status = ?3, completed_at = ?4
         WHERE id = ?1 AND status = ?2",
        params![asset_id, change.from, change.to, change.completed_at],
    )?;

    let jobs = if change.reset_worker {
        conn.execute(
            "UPDATE transcription_jobs
             SET status = ?3, completed_at = ?4, failure_reason = ?5,
                 started_at = NULL, container_id = NULL
             WHERE asset_id = ?1 AND status = ?2",
            params![
                asset_id,
                change.from,
                change.to,
                change.completed_at,
                change.failure_reason,
            ],
        )?
    } else {
        conn.execute(
            "UPDATE transcription_jobs
             SET status = ?3, completed_at = ?4, failure_reason = ?5,
                 started_at = COALESCE(?6, started_at)
             WHERE asset_id = ?1 AND status = ?2",
            params![
                asset_id,
                change.from,
                change.to,
                change.completed_at,
                change.failure_reason,
                change.started_at,
            ],
        )?
    };

    Ok((assets, jobs))
}

pub fn set_container_id(
    conn: &Connection,
    asset_id: &str,
    container_id: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE transcription_jobs SET container_id = ?2 WHERE asset_id = ?1",
        params![asset_id, container_id],
    )?;
    Ok(changed)
}

/// Deletes a pair and records its id so it can never be handed out again.
pub fn delete_pair(conn: &Connection, asset_id: &str, retired_at: &str) -> Result<usize, DatabaseError> {
    conn.execute(
        "DELETE FROM transcription_jobs WHERE asset_id = ?1",
        params![asset_id],
    )?;
    let deleted = conn.execute("DELETE FROM media_assets WHERE id = ?1", params![asset_id])?;
    if deleted > 0 {
        conn.execute(
            "INSERT OR IGNORE INTO retired_asset_ids (id, retired_at) VALUES (?1, ?2)",
            params![asset_id, retired_at],
        )?;
    }
    Ok(deleted)
}

pub fn is_retired(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM retired_asset_ids WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
