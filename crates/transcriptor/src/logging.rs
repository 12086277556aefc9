//! Subscriber setup for the binary.
//!
//! Library code logs through `log` and `tracing`; `LogTracer` forwards the
//! `log` records so both end up in the same subscriber with span context.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Chatty dependencies kept at warn unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["rusqlite", "tokio", "mio"];

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn build_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![level.to_ascii_lowercase()];
    for target in QUIET_TARGETS {
        directives.push(format!("{}=warn", target));
    }
    let filter = directives.join(",");

    EnvFilter::try_new(&filter).map_err(|e| ConfigError::Validation {
        message: format!("Invalid log filter '{}': {}", filter, e),
    })
}

/// Installs the global subscriber. Calling it twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    // Ignore the error: a logger may already be installed (tests, embedding)
    tracing_log::LogTracer::init().ok();

    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        log::debug!("Global subscriber already installed");
    }

    Ok(())
}
