use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// `<config dir>/transcriptor/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("transcriptor").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.data_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "data_directory must not be empty".to_string(),
        });
    }

    let worker = &config.worker;
    if worker.image.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "worker.image must not be empty".to_string(),
        });
    }

    // Every PROCESSING asset needs a deadline
    if worker.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "worker.timeout_secs must be greater than zero".to_string(),
        });
    }

    for (name, mount) in [
        ("worker.source_mount", &worker.source_mount),
        ("worker.output_mount", &worker.output_mount),
    ] {
        if !mount.starts_with('/') {
            return Err(ConfigError::Validation {
                message: format!("{} must be an absolute container path: {}", name, mount),
            });
        }
    }
    if worker.source_mount == worker.output_mount {
        return Err(ConfigError::Validation {
            message: "worker.source_mount and worker.output_mount must differ".to_string(),
        });
    }

    if config.docker.binary.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "docker.binary must not be empty".to_string(),
        });
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown logging.level: {}", config.logging.level),
        });
    }

    Ok(())
}
