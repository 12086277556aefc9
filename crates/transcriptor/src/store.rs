//! Work item store: typed access to asset/job pairs on top of `db`.
//!
//! Every status change touches both rows inside one transaction, so no
//! reader can observe an asset and its job in different states.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::db::asset_repo::{self, AssetRow, JobRow, StatusChange};
use crate::db::{Database, DatabaseError};
use crate::media::{Language, MediaKind};
use crate::model::{FailureReason, MediaAsset, TranscriptionJob, WorkStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No asset/job pair for {0}")]
    NotFound(String),

    #[error("Pair {0} was changed concurrently")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(DatabaseError::Sqlite(err))
    }
}

/// Result of a compare-and-swap on a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The pair was not in the expected state; carries what it is in now.
    Rejected { current: WorkStatus },
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &'static str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::CorruptValue {
            column,
            value: s.to_string(),
        })
}

fn parse_status(column: &'static str, s: &str) -> Result<WorkStatus, DatabaseError> {
    WorkStatus::parse(s).ok_or_else(|| DatabaseError::CorruptValue {
        column,
        value: s.to_string(),
    })
}

fn asset_to_row(asset: &MediaAsset) -> AssetRow {
    AssetRow {
        id: asset.id.clone(),
        kind: asset.kind.as_str().to_string(),
        source_path: asset.source_path.to_string_lossy().to_string(),
        original_name: asset.original_name.clone(),
        status: asset.status.as_str().to_string(),
        created_at: format_timestamp(asset.created_at),
        completed_at: asset.completed_at.map(format_timestamp),
    }
}

fn asset_from_row(row: AssetRow) -> Result<MediaAsset, DatabaseError> {
    let kind = MediaKind::parse(&row.kind).ok_or_else(|| DatabaseError::CorruptValue {
        column: "media_assets.kind",
        value: row.kind.clone(),
    })?;
    Ok(MediaAsset {
        kind,
        status: parse_status("media_assets.status", &row.status)?,
        created_at: parse_timestamp("media_assets.created_at", &row.created_at)?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|s| parse_timestamp("media_assets.completed_at", s))
            .transpose()?,
        source_path: PathBuf::from(row.source_path),
        original_name: row.original_name,
        id: row.id,
    })
}

fn job_to_row(job: &TranscriptionJob) -> JobRow {
    JobRow {
        id: job.id.clone(),
        asset_id: job.asset_id.clone(),
        language: job.language.as_str().to_string(),
        status: job.status.as_str().to_string(),
        created_at: format_timestamp(job.created_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        container_id: job.container_id.clone(),
        failure_reason: job.failure_reason.as_ref().map(FailureReason::to_column),
    }
}

fn job_from_row(row: JobRow) -> Result<TranscriptionJob, DatabaseError> {
    let language = Language::parse(&row.language).ok_or_else(|| DatabaseError::CorruptValue {
        column: "transcription_jobs.language",
        value: row.language.clone(),
    })?;
    Ok(TranscriptionJob {
        language,
        status: parse_status("transcription_jobs.status", &row.status)?,
        created_at: parse_timestamp("transcription_jobs.created_at", &row.created_at)?,
        started_at: row
            .started_at
            .as_deref()
            .map(|s| parse_timestamp("transcription_jobs.started_at", s))
            .transpose()?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|s| parse_timestamp("transcription_jobs.completed_at", s))
            .transpose()?,
        failure_reason: row.failure_reason.as_deref().map(FailureReason::from_column),
        container_id: row.container_id,
        asset_id: row.asset_id,
        id: row.id,
    })
}

/// Durable repository for `MediaAsset` / `TranscriptionJob` pairs.
#[derive(Clone)]
pub struct WorkItemStore {
    db: Database,
}

impl WorkItemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts an asset and its job in one transaction.
    ///
    /// Ids that were used before (even if since deleted) are refused with
    /// `Conflict`.
    pub fn create(&self, asset: &MediaAsset, job: &TranscriptionJob) -> Result<(), StoreError> {
        let asset_row = asset_to_row(asset);
        let job_row = job_to_row(job);
        self.db.with_transaction(|tx| {
            if asset_repo::is_retired(tx, &asset_row.id)?
                || asset_repo::find_asset(tx, &asset_row.id)?.is_some()
            {
                return Err(StoreError::Conflict(asset_row.id.clone()));
            }
            asset_repo::insert_asset(tx, &asset_row)?;
            asset_repo::insert_job(tx, &job_row)?;
            Ok(())
        })
    }

    /// Inserts an asset on its own.
    pub fn create_asset(&self, asset: &MediaAsset) -> Result<(), StoreError> {
        let row = asset_to_row(asset);
        self.db.with_transaction(|tx| {
            if asset_repo::is_retired(tx, &row.id)? || asset_repo::find_asset(tx, &row.id)?.is_some()
            {
                return Err(StoreError::Conflict(row.id.clone()));
            }
            asset_repo::insert_asset(tx, &row)?;
            Ok(())
        })
    }

    /// Inserts the job of an existing asset. A second job for the same asset
    /// is refused with `Conflict`.
    pub fn create_job(&self, job: &TranscriptionJob) -> Result<(), StoreError> {
        let row = job_to_row(job);
        self.db.with_transaction(|tx| {
            if asset_repo::find_asset(tx, &row.asset_id)?.is_none() {
                return Err(StoreError::NotFound(row.asset_id.clone()));
            }
            if asset_repo::find_job_by_asset(tx, &row.asset_id)?.is_some() {
                return Err(StoreError::Conflict(row.asset_id.clone()));
            }
            asset_repo::insert_job(tx, &row)?;
            Ok(())
        })
    }

    pub fn find_asset(&self, asset_id: &str) -> Result<MediaAsset, StoreError> {
        let row = self
            .db
            .with_conn(|conn| asset_repo::find_asset(conn, asset_id))?
            .ok_or_else(|| StoreError::NotFound(asset_id.to_string()))?;
        Ok(asset_from_row(row)?)
    }

    pub fn find_job(&self, asset_id: &str) -> Result<TranscriptionJob, StoreError> {
        let row = self
            .db
            .with_conn(|conn| asset_repo::find_job_by_asset(conn, asset_id))?
            .ok_or_else(|| StoreError::NotFound(asset_id.to_string()))?;
        Ok(job_from_row(row)?)
    }

    /// Reads both rows under one lock.
    pub fn find_pair(&self, asset_id: &str) -> Result<(MediaAsset, TranscriptionJob), StoreError> {
        let (asset, job) = self.db.with_conn(|conn| {
            Ok((
                asset_repo::find_asset(conn, asset_id)?,
                asset_repo::find_job_by_asset(conn, asset_id)?,
            ))
        })?;
        match (asset, job) {
            (Some(asset), Some(job)) => Ok((asset_from_row(asset)?, job_from_row(job)?)),
            _ => Err(StoreError::NotFound(asset_id.to_string())),
        }
    }

    /// Compare-and-swap of a non-terminal transition on both rows.
    ///
    /// `started_at` is stamped when entering PROCESSING. Leaving PROCESSING
    /// for QUEUED clears the launch fields.
    pub fn transition_pair(
        &self,
        asset_id: &str,
        from: WorkStatus,
        to: WorkStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        if to.is_terminal() || !from.can_transition_to(to) {
            let (asset, _) = self.find_pair(asset_id)?;
            return Ok(Transition::Rejected {
                current: asset.status,
            });
        }

        let started_at = format_timestamp(at);
        self.db.with_transaction(|tx| {
            let current = match asset_repo::find_asset(tx, asset_id)? {
                Some(row) => parse_status("media_assets.status", &row.status)?,
                None => return Err(StoreError::NotFound(asset_id.to_string())),
            };
            if current != from {
                return Ok(Transition::Rejected { current });
            }

            let change = StatusChange {
                from: from.as_str(),
                to: to.as_str(),
                started_at: (to == WorkStatus::Processing).then_some(started_at.as_str()),
                reset_worker: to == WorkStatus::Queued,
                ..Default::default()
            };
            match asset_repo::compare_and_set_status(tx, asset_id, &change)? {
                (1, 1) => Ok(Transition::Applied),
                (0, 0) => Ok(Transition::Rejected { current }),
                // Half-applied change: roll the whole transaction back.
                _ => Err(StoreError::Conflict(asset_id.to_string())),
            }
        })
    }

    /// Moves the pair to `new_status` atomically.
    ///
    /// Fails with `NotFound` if the pair does not exist and with `Conflict`
    /// if it is already terminal (or the edge is not part of the lifecycle).
    /// `completed_at` defaults to now for terminal states.
    pub fn update_status_pair(
        &self,
        asset_id: &str,
        new_status: WorkStatus,
        completed_at: Option<DateTime<Utc>>,
        reason: Option<&FailureReason>,
    ) -> Result<(), StoreError> {
        let completed_at = if new_status.is_terminal() {
            Some(format_timestamp(completed_at.unwrap_or_else(Utc::now)))
        } else {
            None
        };
        let reason = match new_status {
            WorkStatus::Failed => reason.map(FailureReason::to_column),
            _ => None,
        };

        self.db.with_transaction(|tx| {
            let current = match asset_repo::find_asset(tx, asset_id)? {
                Some(row) => parse_status("media_assets.status", &row.status)?,
                None => return Err(StoreError::NotFound(asset_id.to_string())),
            };
            if asset_repo::find_job_by_asset(tx, asset_id)?.is_none() {
                return Err(StoreError::NotFound(asset_id.to_string()));
            }
            if !current.can_transition_to(new_status) {
                return Err(StoreError::Conflict(asset_id.to_string()));
            }

            let change = StatusChange {
                from: current.as_str(),
                to: new_status.as_str(),
                completed_at: completed_at.as_deref(),
                failure_reason: reason.as_deref(),
                reset_worker: new_status == WorkStatus::Queued,
                ..Default::default()
            };
            match asset_repo::compare_and_set_status(tx, asset_id, &change)? {
                (1, 1) => Ok(()),
                _ => Err(StoreError::Conflict(asset_id.to_string())),
            }
        })
    }

    pub fn record_container(&self, asset_id: &str, container_id: &str) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| asset_repo::set_container_id(conn, asset_id, container_id))?;
        if changed == 0 {
            return Err(StoreError::NotFound(asset_id.to_string()));
        }
        Ok(())
    }

    pub fn list_assets(
        &self,
        status: Option<WorkStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<MediaAsset>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            asset_repo::list_assets(conn, status.map(|s| s.as_str()), limit, offset)
        })?;
        rows.into_iter()
            .map(|row| asset_from_row(row).map_err(StoreError::from))
            .collect()
    }

    /// All pairs currently in `status`.
    pub fn list_by_status(
        &self,
        status: WorkStatus,
    ) -> Result<Vec<(MediaAsset, TranscriptionJob)>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let assets = asset_repo::list_assets(conn, Some(status.as_str()), i64::MAX as u64, 0)?;
            let mut pairs = Vec::with_capacity(assets.len());
            for asset in assets {
                if let Some(job) = asset_repo::find_job_by_asset(conn, &asset.id)? {
                    pairs.push((asset, job));
                }
            }
            Ok(pairs)
        })?;
        rows.into_iter()
            .map(|(a, j)| Ok((asset_from_row(a)?, job_from_row(j)?)))
            .collect()
    }

    /// Deletes a pair that is not PROCESSING and retires its id.
    pub fn delete(&self, asset_id: &str) -> Result<(), StoreError> {
        let retired_at = format_timestamp(Utc::now());
        self.db.with_transaction(|tx| {
            let current = match asset_repo::find_asset(tx, asset_id)? {
                Some(row) => parse_status("media_assets.status", &row.status)?,
                None => return Err(StoreError::NotFound(asset_id.to_string())),
            };
            if current == WorkStatus::Processing {
                return Err(StoreError::Conflict(asset_id.to_string()));
            }
            asset_repo::delete_pair(tx, asset_id, &retired_at)?;
            Ok(())
        })
    }

    pub fn is_retired(&self, asset_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .db
            .with_conn(|conn| asset_repo::is_retired(conn, asset_id))?)
    }
}
