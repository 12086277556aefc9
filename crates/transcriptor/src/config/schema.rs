use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub data_directory: String,
    /// Defaults to the platform data dir (see `db::default_database_path`).
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_directory = dirs::data_dir()
            .map(|d| d.join("transcriptor").join("assets"))
            .unwrap_or_else(|| PathBuf::from("transcriptor-data"));
        Self {
            version: "1.0".to_string(),
            data_directory: data_directory.to_string_lossy().to_string(),
            database_path: None,
            worker: WorkerConfig::default(),
            docker: DockerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn data_directory(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_image")]
    pub image: String,
    /// Entry command; empty means the image's own entrypoint.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the source file appears inside the container (read-only).
    #[serde(default = "default_source_mount")]
    pub source_mount: String,
    /// Where the worker writes its transcripts.
    #[serde(default = "default_output_mount")]
    pub output_mount: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Reconcile from the monitor task as soon as a worker exits.
    #[serde(default = "default_true")]
    pub auto_reconcile: bool,
}

fn default_image() -> String {
    "transcriptor-worker:latest".to_string()
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_source_mount() -> String {
    "/input".to_string()
}

fn default_output_mount() -> String {
    "/output".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            command: Vec::new(),
            timeout_secs: default_timeout_secs(),
            source_mount: default_source_mount(),
            output_mount: default_output_mount(),
            env: HashMap::new(),
            auto_reconcile: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    /// Passed as `--host`; unset means the CLI's own default.
    #[serde(default)]
    pub host: Option<String>,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
