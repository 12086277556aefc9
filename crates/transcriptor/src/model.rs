//! Asset and job records plus the shared status state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::{Language, MediaKind};

/// Lifecycle shared by assets and their jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Queued => "queued",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(WorkStatus::Queued),
            "processing" => Some(WorkStatus::Processing),
            "completed" => Some(WorkStatus::Completed),
            "failed" => Some(WorkStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    ///
    /// `Processing -> Queued` is only used to undo a dispatch whose
    /// container never started.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        matches!(
            (self, next),
            (WorkStatus::Queued, WorkStatus::Processing)
                | (WorkStatus::Processing, WorkStatus::Queued)
                | (WorkStatus::Processing, WorkStatus::Completed)
                | (WorkStatus::Processing, WorkStatus::Failed)
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended up FAILED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Worker exited with a non-zero code.
    NonZeroExit(i64),
    /// Worker exited 0 but left the output directory empty.
    MissingOutput,
    /// Worker exceeded its deadline and was force-stopped.
    Timeout,
    /// The runtime failed while observing the worker.
    Runtime(String),
    /// No monitor owns the worker any more (e.g. after a restart).
    WorkerLost,
    /// Stopped on request.
    Cancelled,
}

impl FailureReason {
    /// Serializes for the `failure_reason` column.
    pub fn to_column(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "\"unknown\"".to_string())
    }

    pub fn from_column(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_else(|_| FailureReason::Runtime(s.to_string()))
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NonZeroExit(code) => write!(f, "worker exited with code {}", code),
            FailureReason::MissingOutput => write!(f, "worker produced no output"),
            FailureReason::Timeout => write!(f, "worker timed out"),
            FailureReason::Runtime(msg) => write!(f, "runtime error: {}", msg),
            FailureReason::WorkerLost => write!(f, "worker lost"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: String,
    pub kind: MediaKind,
    pub source_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MediaAsset {
    pub fn new(
        id: String,
        kind: MediaKind,
        source_path: PathBuf,
        original_name: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            source_path,
            original_name,
            status: WorkStatus::Queued,
            created_at,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJob {
    pub id: String,
    pub asset_id: String,
    pub language: Language,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Engine id of the worker container, once launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl TranscriptionJob {
    pub fn for_asset(asset: &MediaAsset, language: Language) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: asset.id.clone(),
            language,
            status: WorkStatus::Queued,
            created_at: asset.created_at,
            started_at: None,
            completed_at: None,
            container_id: None,
            failure_reason: None,
        }
    }
}

/// Terminal result of a job, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        #[serde(rename = "completedAt")]
        completed_at: DateTime<Utc>,
    },
    Failed {
        #[serde(rename = "completedAt")]
        completed_at: DateTime<Utc>,
        reason: FailureReason,
    },
}

impl JobOutcome {
    pub fn status(&self) -> WorkStatus {
        match self {
            JobOutcome::Completed { .. } => WorkStatus::Completed,
            JobOutcome::Failed { .. } => WorkStatus::Failed,
        }
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        match self {
            JobOutcome::Completed { completed_at } | JobOutcome::Failed { completed_at, .. } => {
                *completed_at
            }
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            JobOutcome::Completed { .. } => None,
            JobOutcome::Failed { reason, .. } => Some(reason),
        }
    }

    /// Rebuilds the outcome of a terminal job row.
    pub fn from_job(job: &TranscriptionJob) -> Option<Self> {
        let completed_at = job.completed_at?;
        match job.status {
            WorkStatus::Completed => Some(JobOutcome::Completed { completed_at }),
            WorkStatus::Failed => Some(JobOutcome::Failed {
                completed_at,
                reason: job
                    .failure_reason
                    .clone()
                    .unwrap_or(FailureReason::WorkerLost),
            }),
            _ => None,
        }
    }
}

/// Read-only view returned by `status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub asset_id: String,
    pub asset_status: WorkStatus,
    pub job_status: WorkStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl StatusReport {
    pub fn from_pair(asset: &MediaAsset, job: &TranscriptionJob) -> Self {
        Self {
            asset_id: asset.id.clone(),
            asset_status: asset.status,
            job_status: job.status,
            created_at: asset.created_at,
            completed_at: asset.completed_at,
            failure_reason: job.failure_reason.clone(),
        }
    }
}
