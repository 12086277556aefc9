//! Isolated orchestrator setup for integration tests.
//!
//! Every harness gets its own temp data directory, an in-memory database and
//! a `FakeRuntime`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use transcriptor::archive::ZipAssembler;
use transcriptor::db::Database;
use transcriptor::media::{DeclaredMedia, Language};
use transcriptor::model::MediaAsset;
use transcriptor::orchestrator::{JobOrchestrator, OrchestratorSettings};
use transcriptor::paths::PathResolver;
use transcriptor::service::TranscriptionService;
use transcriptor::store::WorkItemStore;

use super::fake_runtime::{FakeRuntime, Script};

/// Ten bytes is enough: the fake runtime never decodes media.
pub const MP3_BYTES: &[u8] = b"ID3\x03\x00\x00\x00\x00\x00\x0f";

pub struct TestHarness {
    temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub db: Database,
    pub runtime: Arc<FakeRuntime>,
    pub orchestrator: JobOrchestrator,
    pub service: TranscriptionService,
}

impl TestHarness {
    /// Workers succeed with a single transcript file.
    pub fn new() -> Self {
        Self::with_script(Script::transcript("hello world"))
    }

    pub fn with_script(default: Script) -> Self {
        Self::with_settings(default, Self::settings())
    }

    pub fn with_settings(default: Script, settings: OrchestratorSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir).expect("Failed to create data dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let runtime = Arc::new(FakeRuntime::new(default));
        let orchestrator = Self::build_orchestrator(&data_dir, &db, runtime.clone(), settings);
        let service = TranscriptionService::new(orchestrator.clone(), Arc::new(ZipAssembler::new()));

        Self {
            temp_dir,
            data_dir,
            db,
            runtime,
            orchestrator,
            service,
        }
    }

    /// Short deadline so timeout paths run quickly.
    pub fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            image: "transcriptor-worker:test".to_string(),
            timeout: Duration::from_secs(5),
            ..OrchestratorSettings::default()
        }
    }

    pub fn build_orchestrator(
        data_dir: &Path,
        db: &Database,
        runtime: Arc<FakeRuntime>,
        settings: OrchestratorSettings,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            WorkItemStore::new(db.clone()),
            PathResolver::new(data_dir),
            runtime,
            settings,
        )
    }

    /// A second orchestrator over the same data, as after a restart.
    pub fn restarted(&self) -> JobOrchestrator {
        self.restarted_with(Self::settings())
    }

    pub fn restarted_with(&self, settings: OrchestratorSettings) -> JobOrchestrator {
        Self::build_orchestrator(&self.data_dir, &self.db, self.runtime.clone(), settings)
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn submit_mp3(&self) -> MediaAsset {
        self.orchestrator
            .submit(
                MP3_BYTES,
                &DeclaredMedia::new("audio/mpeg").with_filename("interview.mp3"),
                Language::English,
            )
            .expect("Submit failed")
    }

    /// Entries directly under the data directory.
    pub fn data_entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.data_dir)
            .expect("Failed to read data dir")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        entries
    }

    pub fn container_id(&self, asset_id: &str) -> String {
        self.orchestrator
            .store()
            .find_job(asset_id)
            .expect("Job not found")
            .container_id
            .expect("No container recorded")
    }
}
