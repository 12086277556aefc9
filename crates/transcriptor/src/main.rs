use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use transcriptor::config::{default_config_path, load_config, Config};
use transcriptor::db::Database;
use transcriptor::orchestrator::{JobOrchestrator, OrchestratorSettings};
use transcriptor::service::{
    ApiResponse, ClientError, ClientErrorCode, TranscriptionService, UploadRequest,
};
use transcriptor::{
    DockerRuntime, Language, PathResolver, WorkItemStore, WorkStatus, ZipAssembler,
};

/// Transcriptor - run media files through isolated transcription workers
#[derive(Parser, Debug)]
#[command(name = "transcriptor")]
#[command(version)]
#[command(about = "Media transcription job orchestrator", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/transcriptor/config.json)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a media file and wait for its transcription
    Submit {
        file: PathBuf,

        /// MIME type (guessed from the file name when omitted)
        #[arg(long = "content-type")]
        content_type: Option<String>,

        /// Transcription language, by name or ISO code
        #[arg(short = 'l', long = "language", default_value = "english")]
        language: String,
    },

    /// Show the status of an asset
    Status { asset_id: String },

    /// Wait for an asset's worker and record its outcome
    Reconcile { asset_id: String },

    /// Write the transcription archive of a completed asset
    Download {
        asset_id: String,

        /// Target file (default: ./<asset id>.zip)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// List assets, newest first
    List {
        /// Only assets in this status (queued, processing, completed, failed)
        #[arg(long = "status")]
        status: Option<String>,

        #[arg(long = "limit", default_value = "50")]
        limit: u64,

        #[arg(long = "offset", default_value = "0")]
        offset: u64,
    },

    /// Stop a running worker and mark its asset failed
    Cancel { asset_id: String },

    /// Delete a queued or finished asset and its files
    Delete { asset_id: String },

    /// Watch live workers left by a previous run and fail expired ones
    Recover,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Written {
    file: PathBuf,
    bytes: usize,
    content_type: &'static str,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = transcriptor::logging::init(&config.logging) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let service = match build_service(&config) {
        Ok(service) => service,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = service.orchestrator().clone();
    let outcome = tokio::select! {
        code = run(&service, &config, cli.command) => code,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted");
            ExitCode::FAILURE
        }
    };

    orchestrator.shutdown().await;
    outcome
}

fn resolve_config(explicit: Option<&std::path::Path>) -> Result<Config, String> {
    if let Some(path) = explicit {
        return load_config(path).map_err(|e| e.to_string());
    }
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path).map_err(|e| e.to_string()),
        _ => Ok(Config::default()),
    }
}

fn build_service(config: &Config) -> Result<TranscriptionService, String> {
    let db_path = config
        .database_path()
        .ok_or_else(|| "No database_path configured and no platform data dir".to_string())?;
    let db = Database::open(&db_path).map_err(|e| e.to_string())?;

    let orchestrator = JobOrchestrator::new(
        WorkItemStore::new(db),
        PathResolver::new(config.data_directory()),
        Arc::new(DockerRuntime::from_config(&config.docker)),
        OrchestratorSettings::from_config(&config.worker),
    );
    Ok(TranscriptionService::new(
        orchestrator,
        Arc::new(ZipAssembler::new()),
    ))
}

fn print<T: Serialize>(result: Result<T, ClientError>) -> ExitCode {
    let failed = result.is_err();
    let response = ApiResponse::from(result);
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize response: {}", e),
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn bad_argument(message: String) -> ClientError {
    ClientError::new(ClientErrorCode::InvalidArgument, message)
}

async fn run(service: &TranscriptionService, config: &Config, command: Command) -> ExitCode {
    let orchestrator = service.orchestrator();

    match command {
        Command::Submit {
            file,
            content_type,
            language,
        } => {
            let Some(language) = Language::parse(&language) else {
                return print::<()>(Err(bad_argument(format!("Unknown language: {}", language))));
            };
            let bytes = match tokio::fs::read(&file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("Failed to read {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            let content_type = content_type.unwrap_or_else(|| {
                mime_guess::from_path(&file)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });

            let request = UploadRequest {
                bytes,
                content_type,
                filename: file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string()),
                language: Some(language),
            };
            let uploaded = match service.upload(request).await {
                Ok(uploaded) => uploaded,
                Err(e) => return print::<()>(Err(e)),
            };
            let deadline = Duration::from_secs(config.worker.timeout_secs) + Duration::from_secs(60);
            let result = orchestrator
                .reconcile_within(&uploaded.asset_id, deadline)
                .await
                .map_err(ClientError::from)
                .and_then(|_| service.status(&uploaded.asset_id));
            print(result)
        }

        Command::Status { asset_id } => print(service.status(&asset_id)),

        Command::Reconcile { asset_id } => {
            print(orchestrator.reconcile(&asset_id).await.map_err(ClientError::from))
        }

        Command::Download { asset_id, output } => {
            let download = match service.download(&asset_id) {
                Ok(download) => download,
                Err(e) => return print::<()>(Err(e)),
            };
            let target = output.unwrap_or_else(|| PathBuf::from(&download.file_name));
            if let Err(e) = tokio::fs::write(&target, &download.bytes).await {
                log::error!("Failed to write {}: {}", target.display(), e);
                return ExitCode::FAILURE;
            }
            print(Ok(Written {
                file: target,
                bytes: download.bytes.len(),
                content_type: download.content_type,
            }))
        }

        Command::List {
            status,
            limit,
            offset,
        } => {
            let status = match status.as_deref().map(WorkStatus::parse) {
                None => None,
                Some(Some(status)) => Some(status),
                Some(None) => {
                    return print::<()>(Err(bad_argument(format!(
                        "Unknown status: {}",
                        status.unwrap_or_default()
                    ))))
                }
            };
            print(service.list(status, limit, offset))
        }

        Command::Cancel { asset_id } => {
            print(orchestrator.cancel(&asset_id).await.map_err(ClientError::from))
        }

        Command::Delete { asset_id } => print(service.delete(&asset_id).await),

        Command::Recover => print(orchestrator.recover().await.map_err(ClientError::from)),
    }
}
