//! `ContainerRuntime` backed by the docker CLI.
//!
//! Workers are created without `--rm` and started with a plain
//! `docker start`, whose exit status tells us whether the engine really ran
//! the container. The container then outlives its process so that any
//! `docker wait`, from this process or another, can still read the exit
//! code. It is removed once the outcome has been persisted.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{ContainerHandle, ContainerRuntime, ExitResult, WorkerSpec};
use crate::config::DockerConfig;
use crate::error::RuntimeError;

/// stderr fragments the docker CLI prints when it cannot reach the daemon.
const UNREACHABLE_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "Is the docker daemon running",
    "error during connect",
    "connection refused",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Connection {
    Unverified,
    Connected { server_version: String },
}

pub struct DockerRuntime {
    binary: String,
    host: Option<String>,
    connection: Mutex<Connection>,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host,
            connection: Mutex::new(Connection::Unverified),
        }
    }

    pub fn from_config(config: &DockerConfig) -> Self {
        Self::new(config.binary.clone(), config.host.clone())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("--host").arg(host);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Runs a short docker command to completion. A missing binary counts
    /// as an unreachable engine.
    async fn run(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        self.command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("failed to run {}: {}", self.binary, e)))
    }

    /// Verifies the engine once and caches the result until a command
    /// reports it unreachable again.
    async fn ensure_connected(&self) -> Result<(), RuntimeError> {
        let mut connection = self.connection.lock().await;
        if matches!(*connection, Connection::Connected { .. }) {
            return Ok(());
        }

        let output = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if output.status.success() {
            let server_version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            log::info!("Connected to container engine (server {})", server_version);
            *connection = Connection::Connected { server_version };
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::error!("Container engine unreachable: {}", stderr);
            Err(RuntimeError::Unavailable(stderr))
        }
    }

    async fn mark_unverified(&self) {
        *self.connection.lock().await = Connection::Unverified;
    }

    /// Server version reported when the connection was verified.
    pub async fn server_version(&self) -> Option<String> {
        match &*self.connection.lock().await {
            Connection::Connected { server_version } => Some(server_version.clone()),
            Connection::Unverified => None,
        }
    }

    /// Turns a failed command's stderr into an error, flagging the
    /// connection when the daemon is gone.
    async fn command_error(
        &self,
        output: &Output,
        rejected: fn(String) -> RuntimeError,
    ) -> RuntimeError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_unreachable(&stderr) {
            self.mark_unverified().await;
            RuntimeError::Unavailable(stderr)
        } else {
            rejected(stderr)
        }
    }

    async fn stop_after_timeout(&self, handle: &ContainerHandle) {
        log::warn!("Worker {} exceeded its deadline, stopping it", handle);
        if let Err(e) = self.stop(handle).await {
            log::error!("Failed to stop timed out worker {}: {}", handle, e);
        }
    }
}

/// Arguments for `docker create`.
pub(crate) fn create_args(spec: &WorkerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];

    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }
    for mount in &spec.mounts {
        // --mount (unlike -v) refuses missing host paths at create time
        let mut value = format!(
            "type=bind,source={},target={}",
            mount.host_path.display(),
            mount.container_path
        );
        if mount.read_only {
            value.push_str(",readonly");
        }
        args.push("--mount".to_string());
        args.push(value);
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

fn is_unreachable(stderr: &str) -> bool {
    UNREACHABLE_MARKERS.iter().any(|m| stderr.contains(m))
}

fn is_already_gone(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("is not running")
}

fn is_unknown_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

/// `docker wait` prints the exit code on its own line.
fn parse_wait_output(stdout: &str) -> ExitResult {
    match stdout.trim().parse::<i64>() {
        Ok(code) => ExitResult::Exited { code },
        Err(_) => ExitResult::Failed(format!("unexpected wait output: {}", stdout.trim())),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &WorkerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.ensure_connected().await?;

        let args = create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs).await?;
        if !output.status.success() {
            return Err(self.command_error(&output, RuntimeError::LaunchRejected).await);
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::LaunchRejected(
                "engine returned no container id".to_string(),
            ));
        }
        let handle = ContainerHandle::new(id);

        // A failed start (bad entrypoint, mount refused by the runtime) is
        // only reported here, so a created container is not yet a launch
        let started = self.run(&["start", &handle.id]).await;
        let failure = match started {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(self.command_error(&output, RuntimeError::LaunchRejected).await),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            if let Err(cleanup) = self.remove(&handle).await {
                log::warn!("Failed to remove unstarted worker {}: {}", handle, cleanup);
            }
            return Err(e);
        }

        log::info!("Started worker {} from image {}", handle, spec.image);
        Ok(handle)
    }

    async fn await_completion(&self, handle: &ContainerHandle, timeout: Duration) -> ExitResult {
        let wait = self
            .command()
            .args(["wait", &handle.id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_wait_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if is_unknown_container(&stderr) {
                    log::warn!("Engine does not know worker {}", handle);
                    return ExitResult::Unknown;
                }
                if is_unreachable(&stderr) {
                    self.mark_unverified().await;
                }
                ExitResult::Failed(stderr)
            }
            Ok(Err(e)) => ExitResult::Failed(e.to_string()),
            Err(_) => {
                self.stop_after_timeout(handle).await;
                ExitResult::TimedOut
            }
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let output = self.run(&["kill", &handle.id]).await?;
        if output.status.success() {
            log::info!("Stopped worker {}", handle);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_already_gone(&stderr) {
            log::debug!("Worker {} already gone", handle);
            Ok(())
        } else {
            Err(self.command_error(&output, RuntimeError::Command).await)
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let output = self.run(&["rm", "--force", &handle.id]).await?;
        if output.status.success() {
            log::debug!("Removed worker {}", handle);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_unknown_container(&stderr) {
            Ok(())
        } else {
            Err(self.command_error(&output, RuntimeError::Command).await)
        }
    }

    async fn is_connected(&self) -> bool {
        self.ensure_connected().await.is_ok()
    }

    async fn disconnect(&self) {
        self.mark_unverified().await;
        log::info!("Disconnected from container engine");
    }
}
