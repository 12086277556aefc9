//! Client-facing boundaries: upload, status, download, list and delete.
//!
//! Transport-agnostic: each call returns either a serialisable payload or a
//! `ClientError` with a stable reason code and a suggested HTTP status.

use std::sync::Arc;

use serde::Serialize;

use crate::archive::ArtifactAssembler;
use crate::error::{ArchiveError, OrchestratorError};
use crate::media::{DeclaredMedia, Language};
use crate::model::{MediaAsset, StatusReport, WorkStatus};
use crate::orchestrator::JobOrchestrator;

/// Stable reason codes shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientErrorCode {
    UnsupportedType,
    EmptyFile,
    InvalidIdentifier,
    InvalidArgument,
    NotFound,
    NotCompleted,
    OutputMissing,
    ArchiveFailed,
    RuntimeUnavailable,
    LaunchFailure,
    AlreadyRunning,
    InvalidState,
    Conflict,
    Timeout,
    StorageFailure,
    Internal,
}

impl ClientErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientErrorCode::UnsupportedType => "unsupported-type",
            ClientErrorCode::EmptyFile => "empty-file",
            ClientErrorCode::InvalidIdentifier => "invalid-identifier",
            ClientErrorCode::InvalidArgument => "invalid-argument",
            ClientErrorCode::NotFound => "not-found",
            ClientErrorCode::NotCompleted => "not-completed",
            ClientErrorCode::OutputMissing => "output-missing",
            ClientErrorCode::ArchiveFailed => "archive-failed",
            ClientErrorCode::RuntimeUnavailable => "runtime-unavailable",
            ClientErrorCode::LaunchFailure => "launch-failure",
            ClientErrorCode::AlreadyRunning => "already-running",
            ClientErrorCode::InvalidState => "invalid-state",
            ClientErrorCode::Conflict => "conflict",
            ClientErrorCode::Timeout => "timeout",
            ClientErrorCode::StorageFailure => "storage-failure",
            ClientErrorCode::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ClientErrorCode::UnsupportedType => 415,
            ClientErrorCode::EmptyFile
            | ClientErrorCode::InvalidIdentifier
            | ClientErrorCode::InvalidArgument => 400,
            ClientErrorCode::NotFound | ClientErrorCode::OutputMissing => 404,
            ClientErrorCode::NotCompleted
            | ClientErrorCode::AlreadyRunning
            | ClientErrorCode::InvalidState
            | ClientErrorCode::Conflict => 409,
            ClientErrorCode::RuntimeUnavailable | ClientErrorCode::LaunchFailure => 503,
            ClientErrorCode::Timeout => 504,
            ClientErrorCode::ArchiveFailed
            | ClientErrorCode::StorageFailure
            | ClientErrorCode::Internal => 500,
        }
    }
}

impl std::fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    pub code: ClientErrorCode,
    pub message: String,
}

impl ClientError {
    pub fn new(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl From<OrchestratorError> for ClientError {
    fn from(err: OrchestratorError) -> Self {
        use crate::error::InputRejection;

        let code = match &err {
            OrchestratorError::InvalidInput(InputRejection::UnsupportedType) => {
                ClientErrorCode::UnsupportedType
            }
            OrchestratorError::InvalidInput(InputRejection::EmptyFile) => ClientErrorCode::EmptyFile,
            OrchestratorError::InvalidInput(InputRejection::InvalidIdentifier) => {
                ClientErrorCode::InvalidIdentifier
            }
            OrchestratorError::NotFound(_) => ClientErrorCode::NotFound,
            OrchestratorError::RuntimeUnavailable(_) => ClientErrorCode::RuntimeUnavailable,
            OrchestratorError::LaunchFailure(_) => ClientErrorCode::LaunchFailure,
            OrchestratorError::AlreadyRunning(_) => ClientErrorCode::AlreadyRunning,
            OrchestratorError::InvalidState { .. } => ClientErrorCode::InvalidState,
            OrchestratorError::Conflict(_) => ClientErrorCode::Conflict,
            OrchestratorError::Timeout(_) => ClientErrorCode::Timeout,
            OrchestratorError::StorageFailure(_) => ClientErrorCode::StorageFailure,
            OrchestratorError::Database(_) => ClientErrorCode::Internal,
        };
        if code.http_status() >= 500 {
            log::error!("Request failed: {}", err);
        }
        ClientError::new(code, err.to_string())
    }
}

impl From<ArchiveError> for ClientError {
    fn from(err: ArchiveError) -> Self {
        let code = match &err {
            ArchiveError::DirectoryMissing(_) => ClientErrorCode::OutputMissing,
            ArchiveError::Write { .. } | ArchiveError::Compression(_) => {
                log::error!("Archive assembly failed: {}", err);
                ClientErrorCode::ArchiveFailed
            }
        };
        ClientError::new(code, err.to_string())
    }
}

/// Uniform envelope for boundary results.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ClientError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

impl<T> From<Result<T, ClientError>> for ApiResponse<T> {
    fn from(result: Result<T, ClientError>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: Option<String>,
    pub language: Option<Language>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub asset_id: String,
    pub status: WorkStatus,
}

/// A ready-to-send archive.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct TranscriptionService {
    orchestrator: JobOrchestrator,
    assembler: Arc<dyn ArtifactAssembler>,
}

impl TranscriptionService {
    pub fn new(orchestrator: JobOrchestrator, assembler: Arc<dyn ArtifactAssembler>) -> Self {
        Self {
            orchestrator,
            assembler,
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Accepts a media file and starts its worker.
    ///
    /// The file write and record insert run on the blocking pool. If the
    /// worker cannot be launched the stored upload is discarded again, so
    /// a failed upload leaves neither records nor files behind.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, ClientError> {
        let mut declared = DeclaredMedia::new(request.content_type);
        if let Some(filename) = request.filename {
            declared = declared.with_filename(filename);
        }
        let language = request.language.unwrap_or_default();
        let bytes = request.bytes;

        let orchestrator = self.orchestrator.clone();
        let asset = tokio::task::spawn_blocking(move || {
            orchestrator.submit(&bytes, &declared, language)
        })
        .await
        .map_err(|e| {
            ClientError::new(ClientErrorCode::Internal, format!("Upload task failed: {}", e))
        })??;

        if let Err(e) = self.orchestrator.dispatch(&asset.id).await {
            log::warn!("Launch for upload {} failed, discarding it: {}", asset.id, e);
            if let Err(cleanup) = self.orchestrator.delete(&asset.id).await {
                log::error!("Failed to discard upload {}: {}", asset.id, cleanup);
            }
            return Err(e.into());
        }

        let report = self.orchestrator.status(&asset.id)?;
        Ok(UploadResponse {
            asset_id: asset.id,
            status: report.asset_status,
        })
    }

    pub fn status(&self, asset_id: &str) -> Result<StatusReport, ClientError> {
        Ok(self.orchestrator.status(asset_id)?)
    }

    /// Archive of the output directory of a COMPLETED asset.
    pub fn download(&self, asset_id: &str) -> Result<Download, ClientError> {
        let report = self.orchestrator.status(asset_id)?;
        if report.asset_status != WorkStatus::Completed {
            return Err(ClientError::new(
                ClientErrorCode::NotCompleted,
                format!("Asset {} is {}", asset_id, report.asset_status),
            ));
        }

        let dir = self.orchestrator.paths().output_directory(asset_id);
        let bytes = self.assembler.assemble(&dir)?;

        Ok(Download {
            file_name: format!("{}.{}", asset_id, self.assembler.extension()),
            content_type: self.assembler.content_type(),
            bytes,
        })
    }

    pub fn list(
        &self,
        status: Option<WorkStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<MediaAsset>, ClientError> {
        Ok(self.orchestrator.list(status, limit, offset)?)
    }

    pub async fn delete(&self, asset_id: &str) -> Result<(), ClientError> {
        Ok(self.orchestrator.delete(asset_id).await?)
    }
}
