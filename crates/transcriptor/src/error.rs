use std::path::PathBuf;
use thiserror::Error;

use crate::model::WorkStatus;

/// Why an upload was turned away before anything touched the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    UnsupportedType,
    EmptyFile,
    InvalidIdentifier,
}

impl InputRejection {
    /// Stable reason code shown to clients.
    pub fn code(&self) -> &'static str {
        match self {
            InputRejection::UnsupportedType => "unsupported-type",
            InputRejection::EmptyFile => "empty-file",
            InputRejection::InvalidIdentifier => "invalid-identifier",
        }
    }
}

impl std::fmt::Display for InputRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(InputRejection),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Worker launch rejected: {0}")]
    LaunchFailure(String),

    #[error("A worker is already running for asset {0}")]
    AlreadyRunning(String),

    #[error("Asset {asset_id} is {status}, operation not allowed")]
    InvalidState { asset_id: String, status: WorkStatus },

    #[error("Worker for asset {0} exceeded its deadline")]
    Timeout(String),

    #[error("Concurrent update on asset {0}")]
    Conflict(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[source] crate::db::DatabaseError),
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(reason) => OrchestratorError::RuntimeUnavailable(reason),
            RuntimeError::LaunchRejected(reason) => OrchestratorError::LaunchFailure(reason),
            other => OrchestratorError::RuntimeUnavailable(other.to_string()),
        }
    }
}

impl From<crate::store::StoreError> for OrchestratorError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            StoreError::Conflict(id) => OrchestratorError::Conflict(id),
            StoreError::Database(e) => OrchestratorError::Database(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Persisting records failed: {0}")]
    Records(String),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The engine could not be reached at all.
    #[error("Container engine unreachable: {0}")]
    Unavailable(String),

    /// The engine refused the container (bad image, limits, mounts).
    #[error("Container engine rejected the worker: {0}")]
    LaunchRejected(String),

    #[error("Container command failed: {0}")]
    Command(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Output directory missing: {0}")]
    DirectoryMissing(PathBuf),

    #[error("Failed to write archive entry '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compression failed: {0}")]
    Compression(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
