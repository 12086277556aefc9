pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod runtime;
pub mod service;
pub mod store;

pub use archive::{ArtifactAssembler, ZipAssembler};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ArchiveError, ConfigError, InputRejection, OrchestratorError, Result, RuntimeError,
    StorageError,
};
pub use media::{DeclaredMedia, Language, MediaKind};
pub use model::{FailureReason, JobOutcome, MediaAsset, StatusReport, TranscriptionJob, WorkStatus};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings};
pub use paths::PathResolver;
pub use runtime::{ContainerHandle, ContainerRuntime, DockerRuntime, ExitResult, WorkerSpec};
pub use service::{ClientError, ClientErrorCode, TranscriptionService};
pub use store::WorkItemStore;
