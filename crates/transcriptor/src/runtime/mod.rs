//! Container runtime abstraction.
//!
//! The orchestrator only sees `ContainerRuntime`; `DockerRuntime` is the
//! production implementation and tests plug in scripted fakes.

pub mod docker;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

pub use docker::DockerRuntime;

/// A bind mount from the host into the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    pub fn writable(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }
}

/// Everything needed to launch one worker container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: Option<String>,
    pub image: String,
    /// Empty means the image's entrypoint.
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub labels: Vec<(String, String)>,
}

/// Engine-side identity of a launched worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Engine ids are long; the first 12 chars are what `docker ps` shows
        let short: String = self.id.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// How a worker ended, as observed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitResult {
    Exited { code: i64 },
    /// Deadline passed; the container has been force-stopped.
    TimedOut,
    /// The engine has no container with this handle.
    Unknown,
    /// The runtime could not observe the worker.
    Failed(String),
}

impl ExitResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitResult::Exited { code: 0 })
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launches a worker. Returns once the engine reports it running.
    ///
    /// Fails with `RuntimeError::Unavailable` when the engine cannot be
    /// reached and `RuntimeError::LaunchRejected` when it refuses the spec.
    async fn start(&self, spec: &WorkerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Waits until the worker exits or `timeout` elapses. On timeout the
    /// container is stopped before `ExitResult::TimedOut` is returned.
    /// Works for any container the engine knows, not only ones this
    /// process started.
    async fn await_completion(&self, handle: &ContainerHandle, timeout: Duration) -> ExitResult;

    /// Force-stops a worker. Stopping one that already exited is not an error.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Discards a worker, killing it first if it still runs. Removing one
    /// that is already gone is not an error.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn is_connected(&self) -> bool;

    /// Drops the cached engine connection.
    async fn disconnect(&self);
}
