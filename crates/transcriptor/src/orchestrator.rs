//! Job orchestration: submit, dispatch, reconcile and the rest of the asset
//! lifecycle.
//!
//! Per-asset transitions are serialised by a per-asset async mutex that is
//! only held for short critical sections, backed by compare-and-swap updates
//! in the store. Waiting for a worker never happens while that mutex is held:
//! each launched worker gets a monitor task that awaits its exit and
//! publishes the result on a `watch` channel.
//!
//! A worker started by another process (or before a restart) has no local
//! monitor. Reconcile then waits on the runtime directly for whatever is left
//! of the worker's deadline, which is counted from the job's `started_at`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::{InputRejection, OrchestratorError, Result, StorageError};
use crate::media::{DeclaredMedia, Language};
use crate::model::{
    FailureReason, JobOutcome, MediaAsset, StatusReport, TranscriptionJob, WorkStatus,
};
use crate::paths::{write_new_file, PathResolver};
use crate::runtime::{ContainerHandle, ContainerRuntime, ExitResult, Mount, WorkerSpec};
use crate::store::{StoreError, Transition, WorkItemStore};

/// Extra time reconcile gives the monitor beyond the worker deadline, to
/// cover the stop that follows a timeout.
const MONITOR_GRACE: Duration = Duration::from_secs(30);

/// Worker launch settings, resolved from `WorkerConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub source_mount: String,
    pub output_mount: String,
    pub auto_reconcile: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut env: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        Self {
            image: config.image.clone(),
            command: config.command.clone(),
            env,
            timeout: Duration::from_secs(config.timeout_secs),
            source_mount: config.source_mount.clone(),
            output_mount: config.output_mount.clone(),
            auto_reconcile: config.auto_reconcile,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// A worker monitored by this process.
struct WorkerSlot {
    handle: ContainerHandle,
    exit: watch::Receiver<Option<ExitResult>>,
    monitor: JoinHandle<()>,
    /// False for workers adopted by `recover`; shutdown leaves those running.
    owned: bool,
}

/// How a reconcile observes the worker once the asset lock is released.
enum Observation {
    Monitor {
        exit: watch::Receiver<Option<ExitResult>>,
        handle: ContainerHandle,
    },
    Runtime {
        handle: ContainerHandle,
        remaining: Duration,
    },
}

/// What `recover` did with the PROCESSING assets it found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Live workers now watched by a monitor in this process.
    pub adopted: usize,
    /// Assets failed with `WorkerLost`.
    pub failed: usize,
}

struct Inner {
    store: WorkItemStore,
    paths: PathResolver,
    runtime: Arc<dyn ContainerRuntime>,
    settings: OrchestratorSettings,
    asset_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    workers: Mutex<HashMap<String, WorkerSlot>>,
}

/// Drives assets from upload to a terminal state. Cloning is cheap.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

/// `<YYYYMM-DDHH-MMSS>-<uuid v4>`: sortable by creation and collision free.
pub fn generate_asset_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m-%d%H-%M%S"), uuid::Uuid::new_v4())
}

impl JobOrchestrator {
    pub fn new(
        store: WorkItemStore,
        paths: PathResolver,
        runtime: Arc<dyn ContainerRuntime>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                paths,
                runtime,
                settings,
                asset_locks: StdMutex::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &WorkItemStore {
        &self.inner.store
    }

    pub fn paths(&self) -> &PathResolver {
        &self.inner.paths
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    fn asset_lock(&self, asset_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .asset_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(asset_id.to_string()).or_default().clone()
    }

    fn forget_lock(&self, asset_id: &str) {
        let mut locks = self
            .inner
            .asset_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(asset_id);
    }

    /// Drops the lock entry of an asset that is gone or already terminal.
    fn forget_if_settled(&self, asset_id: &str) {
        let settled = match self.inner.store.find_job(asset_id) {
            Ok(job) => job.status.is_terminal(),
            Err(StoreError::NotFound(_)) => true,
            Err(_) => false,
        };
        if settled {
            self.forget_lock(asset_id);
        }
    }

    fn check_id(asset_id: &str) -> Result<()> {
        if PathResolver::is_valid_id(asset_id) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidInput(
                InputRejection::InvalidIdentifier,
            ))
        }
    }

    // ========================================================================
    // Submit
    // ========================================================================

    /// Stores an upload and creates its QUEUED asset/job pair.
    ///
    /// Nothing is left behind on failure: the asset directory is removed and
    /// no records are written.
    pub fn submit(
        &self,
        bytes: &[u8],
        declared: &DeclaredMedia,
        language: Language,
    ) -> Result<MediaAsset> {
        if bytes.is_empty() {
            return Err(OrchestratorError::InvalidInput(InputRejection::EmptyFile));
        }
        let (kind, extension) = declared
            .resolve()
            .ok_or(OrchestratorError::InvalidInput(InputRejection::UnsupportedType))?;

        let created_at = Utc::now();
        let id = generate_asset_id(created_at);
        let _span = info_span!("submit", asset_id = %id, kind = %kind).entered();

        let paths = &self.inner.paths;
        paths.asset_directory(&id)?;
        let source_path = paths.source_file_path(&id, &extension);

        let asset = MediaAsset::new(
            id.clone(),
            kind,
            source_path.clone(),
            declared.filename.clone(),
            created_at,
        );
        let job = TranscriptionJob::for_asset(&asset, language);

        let persisted = write_new_file(&source_path, bytes).and_then(|_| {
            self.inner
                .store
                .create(&asset, &job)
                .map_err(|e| StorageError::Records(e.to_string()))
        });

        if let Err(e) = persisted {
            error!("Submit failed, removing asset directory: {}", e);
            if let Err(cleanup) = paths.remove_asset_directory(&id) {
                warn!("Failed to clean up after submit: {}", cleanup);
            }
            return Err(e.into());
        }

        info!(
            "Accepted {} upload ({} bytes) as {}",
            kind,
            bytes.len(),
            source_path.display()
        );
        Ok(asset)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Moves a QUEUED asset to PROCESSING and launches its worker.
    ///
    /// Returns once the runtime reports the container started. If the runtime
    /// is unreachable or rejects the launch, the pair goes back to QUEUED
    /// and the error is returned.
    pub async fn dispatch(&self, asset_id: &str) -> Result<()> {
        Self::check_id(asset_id)?;
        let result = self
            .dispatch_locked(asset_id)
            .instrument(info_span!("dispatch", asset_id = %asset_id))
            .await;
        if result.is_err() {
            self.forget_if_settled(asset_id);
        }
        result
    }

    async fn dispatch_locked(&self, asset_id: &str) -> Result<()> {
        let lock = self.asset_lock(asset_id);
        let _guard = lock.lock().await;

        let (asset, job) = self.inner.store.find_pair(asset_id)?;

        match self.inner.store.transition_pair(
            asset_id,
            WorkStatus::Queued,
            WorkStatus::Processing,
            Utc::now(),
        )? {
            Transition::Applied => {}
            Transition::Rejected {
                current: WorkStatus::Processing,
            } => return Err(OrchestratorError::AlreadyRunning(asset_id.to_string())),
            Transition::Rejected { current } => {
                return Err(OrchestratorError::InvalidState {
                    asset_id: asset_id.to_string(),
                    status: current,
                })
            }
        }

        let handle = match self.launch(&asset, &job).await {
            Ok(handle) => handle,
            Err(e) => {
                self.roll_back_dispatch(asset_id);
                return Err(e);
            }
        };

        if let Err(e) = self.inner.store.record_container(asset_id, &handle.id) {
            error!("Failed to record worker {}: {}", handle, e);
            if let Err(remove) = self.inner.runtime.remove(&handle).await {
                error!("Failed to remove unrecorded worker {}: {}", handle, remove);
            }
            self.roll_back_dispatch(asset_id);
            return Err(e.into());
        }

        let timeout = self.inner.settings.timeout;
        self.spawn_monitor(asset_id, handle, timeout, true).await;
        Ok(())
    }

    async fn launch(&self, asset: &MediaAsset, job: &TranscriptionJob) -> Result<ContainerHandle> {
        let spec = self.worker_spec(asset, job)?;
        let handle = self.inner.runtime.start(&spec).await?;
        info!("Worker {} launched for asset {}", handle, asset.id);
        Ok(handle)
    }

    fn roll_back_dispatch(&self, asset_id: &str) {
        match self.inner.store.transition_pair(
            asset_id,
            WorkStatus::Processing,
            WorkStatus::Queued,
            Utc::now(),
        ) {
            Ok(Transition::Applied) => debug!("Asset {} returned to queued", asset_id),
            Ok(Transition::Rejected { current }) => {
                warn!("Could not roll back asset {}: now {}", asset_id, current)
            }
            Err(e) => error!("Could not roll back asset {}: {}", asset_id, e),
        }
    }

    /// Container spec for an asset: read-only source, writable output.
    pub fn worker_spec(&self, asset: &MediaAsset, job: &TranscriptionJob) -> Result<WorkerSpec> {
        let settings = &self.inner.settings;
        let output_dir = self.inner.paths.ensure_output_directory(&asset.id)?;

        let file_name = asset
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| crate::paths::SOURCE_STEM.to_string());
        let source_target = format!("{}/{}", settings.source_mount.trim_end_matches('/'), file_name);

        let mut env = settings.env.clone();
        env.push(("ASSET_ID".to_string(), asset.id.clone()));
        env.push(("SOURCE_FILE".to_string(), source_target.clone()));
        env.push(("OUTPUT_DIR".to_string(), settings.output_mount.clone()));
        env.push((
            "TRANSCRIPTION_LANGUAGE".to_string(),
            job.language.code().to_string(),
        ));

        Ok(WorkerSpec {
            name: Some(format!("transcriptor-{}", asset.id)),
            image: settings.image.clone(),
            command: settings.command.clone(),
            env,
            mounts: vec![
                Mount::read_only(&asset.source_path, source_target),
                Mount::writable(output_dir, settings.output_mount.clone()),
            ],
            labels: vec![
                ("transcriptor.asset".to_string(), asset.id.clone()),
                ("transcriptor.job".to_string(), job.id.clone()),
            ],
        })
    }

    async fn spawn_monitor(
        &self,
        asset_id: &str,
        handle: ContainerHandle,
        timeout: Duration,
        owned: bool,
    ) {
        let (tx, rx) = watch::channel(None);
        let this = self.clone();
        let id = asset_id.to_string();
        let watched = handle.clone();

        let monitor = tokio::spawn(
            async move {
                let result = this.inner.runtime.await_completion(&watched, timeout).await;
                debug!("Worker {} finished: {:?}", watched, result);
                let _ = tx.send(Some(result));

                if this.inner.settings.auto_reconcile {
                    match this.reconcile(&id).await {
                        Ok(outcome) => debug!("Asset {} reconciled: {}", id, outcome.status()),
                        Err(e) => error!("Reconcile of asset {} failed: {}", id, e),
                    }
                }
            }
            .instrument(info_span!("monitor", asset_id = %asset_id)),
        );

        self.inner.workers.lock().await.insert(
            asset_id.to_string(),
            WorkerSlot {
                handle,
                exit: rx,
                monitor,
                owned,
            },
        );
    }

    // ========================================================================
    // Reconcile
    // ========================================================================

    /// Brings a PROCESSING asset to its terminal state.
    ///
    /// Waits (bounded by the worker deadline) for the monitor to report the
    /// exit, then classifies and persists it. Terminal assets return their
    /// persisted outcome without writing anything.
    pub async fn reconcile(&self, asset_id: &str) -> Result<JobOutcome> {
        Self::check_id(asset_id)?;
        let result = self
            .reconcile_inner(asset_id)
            .instrument(info_span!("reconcile", asset_id = %asset_id))
            .await;
        if result.is_err() {
            self.forget_if_settled(asset_id);
        }
        result
    }

    /// `reconcile`, giving up with `Timeout` after `deadline`.
    pub async fn reconcile_within(&self, asset_id: &str, deadline: Duration) -> Result<JobOutcome> {
        tokio::time::timeout(deadline, self.reconcile(asset_id))
            .await
            .map_err(|_| OrchestratorError::Timeout(asset_id.to_string()))?
    }

    async fn reconcile_inner(&self, asset_id: &str) -> Result<JobOutcome> {
        let lock = self.asset_lock(asset_id);

        let observation = {
            let _guard = lock.lock().await;
            let (asset, job) = self.inner.store.find_pair(asset_id)?;

            if let Some(outcome) = JobOutcome::from_job(&job) {
                self.settle(asset_id, job.container_id.as_deref()).await;
                return Ok(outcome);
            }
            if asset.status == WorkStatus::Queued {
                return Err(OrchestratorError::InvalidState {
                    asset_id: asset_id.to_string(),
                    status: asset.status,
                });
            }

            let slot = self
                .inner
                .workers
                .lock()
                .await
                .get(asset_id)
                .map(|slot| (slot.exit.clone(), slot.handle.clone()));
            match (slot, self.remaining_time(&job)) {
                (Some((exit, handle)), _) => Observation::Monitor { exit, handle },
                (None, Some((handle, remaining))) => Observation::Runtime { handle, remaining },
                (None, None) => return self.fail_orphan(&job).await,
            }
        };

        let (handle, result) = match observation {
            Observation::Monitor { mut exit, handle } => {
                let result = self.wait_for_monitor(&mut exit, &handle).await;
                (handle, result)
            }
            Observation::Runtime { handle, remaining } => {
                info!(
                    "Waiting up to {:?} on worker {} started elsewhere",
                    remaining, handle
                );
                let result = self.inner.runtime.await_completion(&handle, remaining).await;
                (handle, result)
            }
        };
        let (status, reason) = self.classify(asset_id, &result);

        let _guard = lock.lock().await;
        let outcome = self.persist_outcome(asset_id, status, reason)?;
        self.settle(asset_id, Some(&handle.id)).await;
        Ok(outcome)
    }

    async fn wait_for_monitor(
        &self,
        exit: &mut watch::Receiver<Option<ExitResult>>,
        handle: &ContainerHandle,
    ) -> ExitResult {
        let deadline = self.inner.settings.timeout + MONITOR_GRACE;
        // Clone out of the borrowed value before anything else is awaited
        let waited = tokio::time::timeout(deadline, exit.wait_for(Option::is_some))
            .await
            .map(|seen| seen.map(|result| (*result).clone()));

        match waited {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => ExitResult::Failed("monitor published no result".to_string()),
            Ok(Err(_)) => ExitResult::Failed("monitor ended without a result".to_string()),
            Err(_) => {
                warn!("No exit reported for worker {} in time, stopping it", handle);
                if let Err(e) = self.inner.runtime.stop(handle).await {
                    error!("Failed to stop worker {}: {}", handle, e);
                }
                ExitResult::TimedOut
            }
        }
    }

    /// The recorded worker and what is left of its deadline. `None` when no
    /// container was recorded or the deadline has already passed.
    fn remaining_time(&self, job: &TranscriptionJob) -> Option<(ContainerHandle, Duration)> {
        let container_id = job.container_id.as_ref()?;
        let started_at = job.started_at?;
        let timeout = chrono::Duration::from_std(self.inner.settings.timeout).ok()?;
        let remaining = (started_at + timeout - Utc::now()).to_std().ok()?;
        if remaining.is_zero() {
            return None;
        }
        Some((ContainerHandle::new(container_id.clone()), remaining))
    }

    /// Maps a worker exit onto the terminal status it implies.
    fn classify(&self, asset_id: &str, result: &ExitResult) -> (WorkStatus, Option<FailureReason>) {
        if result.is_success() {
            return if self.inner.paths.has_output(asset_id) {
                (WorkStatus::Completed, None)
            } else {
                (WorkStatus::Failed, Some(FailureReason::MissingOutput))
            };
        }
        match result {
            ExitResult::Exited { code } => {
                (WorkStatus::Failed, Some(FailureReason::NonZeroExit(*code)))
            }
            ExitResult::TimedOut => (WorkStatus::Failed, Some(FailureReason::Timeout)),
            ExitResult::Unknown => (WorkStatus::Failed, Some(FailureReason::WorkerLost)),
            ExitResult::Failed(msg) => {
                (WorkStatus::Failed, Some(FailureReason::Runtime(msg.clone())))
            }
        }
    }

    /// Writes a terminal status. A conflicting write is retried once after
    /// re-reading; if someone else already finished the pair, their outcome
    /// wins.
    fn persist_outcome(
        &self,
        asset_id: &str,
        status: WorkStatus,
        reason: Option<FailureReason>,
    ) -> Result<JobOutcome> {
        let store = &self.inner.store;

        match store.update_status_pair(asset_id, status, None, reason.as_ref()) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                let job = store.find_job(asset_id)?;
                if let Some(outcome) = JobOutcome::from_job(&job) {
                    debug!("Asset {} already {}", asset_id, outcome.status());
                    return Ok(outcome);
                }
                store.update_status_pair(asset_id, status, None, reason.as_ref())?;
            }
            Err(e) => return Err(e.into()),
        }

        let job = store.find_job(asset_id)?;
        let outcome = JobOutcome::from_job(&job)
            .ok_or_else(|| OrchestratorError::Conflict(asset_id.to_string()))?;

        match outcome.failure_reason() {
            None => info!("Asset {} completed", asset_id),
            Some(reason) => warn!("Asset {} failed: {}", asset_id, reason),
        }
        Ok(outcome)
    }

    /// Fails a PROCESSING asset whose worker cannot be observed: nothing
    /// was recorded or its deadline has passed.
    ///
    /// The status is written before the container is removed, so an exit
    /// observed elsewhere cannot overtake it.
    async fn fail_orphan(&self, job: &TranscriptionJob) -> Result<JobOutcome> {
        warn!("Worker for asset {} is lost", job.asset_id);
        let outcome = self.persist_outcome(
            &job.asset_id,
            WorkStatus::Failed,
            Some(FailureReason::WorkerLost),
        )?;
        self.settle(&job.asset_id, job.container_id.as_deref()).await;
        Ok(outcome)
    }

    async fn release_worker(&self, asset_id: &str) -> Option<WorkerSlot> {
        self.inner.workers.lock().await.remove(asset_id)
    }

    /// Cleanup for a terminal pair: drops the monitor slot, removes the
    /// container and forgets the per-asset lock. Safe to repeat.
    async fn settle(&self, asset_id: &str, container_id: Option<&str>) {
        self.release_worker(asset_id).await;
        if let Some(container_id) = container_id {
            let handle = ContainerHandle::new(container_id);
            if let Err(e) = self.inner.runtime.remove(&handle).await {
                warn!("Failed to remove worker {}: {}", handle, e);
            }
        }
        self.forget_lock(asset_id);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self, asset_id: &str) -> Result<StatusReport> {
        Self::check_id(asset_id)?;
        let (asset, job) = self.inner.store.find_pair(asset_id)?;
        Ok(StatusReport::from_pair(&asset, &job))
    }

    /// Assets newest first.
    pub fn list(
        &self,
        status: Option<WorkStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<MediaAsset>> {
        Ok(self.inner.store.list_assets(status, limit, offset)?)
    }

    /// Number of workers this process is currently monitoring.
    pub async fn active_workers(&self) -> usize {
        self.inner.workers.lock().await.len()
    }

    /// Number of assets holding a per-asset lock entry. Entries are dropped
    /// once an asset settles, so this tracks in-flight work.
    pub fn tracked_assets(&self) -> usize {
        self.inner
            .asset_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    // ========================================================================
    // Cancel / delete
    // ========================================================================

    /// Fails a PROCESSING asset with `Cancelled` and removes its worker.
    pub async fn cancel(&self, asset_id: &str) -> Result<JobOutcome> {
        Self::check_id(asset_id)?;
        async {
            let lock = self.asset_lock(asset_id);
            let _guard = lock.lock().await;

            let (asset, job) = self.inner.store.find_pair(asset_id)?;
            if asset.status != WorkStatus::Processing {
                return Err(OrchestratorError::InvalidState {
                    asset_id: asset_id.to_string(),
                    status: asset.status,
                });
            }

            let outcome = self.persist_outcome(
                asset_id,
                WorkStatus::Failed,
                Some(FailureReason::Cancelled),
            )?;

            self.settle(asset_id, job.container_id.as_deref()).await;
            Ok(outcome)
        }
        .instrument(info_span!("cancel", asset_id = %asset_id))
        .await
        .inspect_err(|_| self.forget_if_settled(asset_id))
    }

    /// Removes a QUEUED or terminal asset with its files. The id is retired.
    pub async fn delete(&self, asset_id: &str) -> Result<()> {
        Self::check_id(asset_id)?;
        let lock = self.asset_lock(asset_id);
        let removed = async {
            let _guard = lock.lock().await;

            let asset = self.inner.store.find_asset(asset_id)?;
            if asset.status == WorkStatus::Processing {
                return Err(OrchestratorError::InvalidState {
                    asset_id: asset_id.to_string(),
                    status: asset.status,
                });
            }

            self.inner.store.delete(asset_id)?;
            self.inner.paths.remove_asset_directory(asset_id)?;
            Ok(())
        }
        .await;
        if let Err(e) = removed {
            self.forget_if_settled(asset_id);
            return Err(e);
        }
        self.forget_lock(asset_id);
        info!("Deleted asset {}", asset_id);
        Ok(())
    }

    // ========================================================================
    // Startup / shutdown
    // ========================================================================

    /// Takes charge of every PROCESSING asset that has no monitor in this
    /// process, e.g. after a restart. Workers still inside their deadline
    /// get a monitor; the rest are failed with `WorkerLost`.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recover_orphans().instrument(info_span!("recover")).await
    }

    async fn recover_orphans(&self) -> Result<RecoveryReport> {
        let processing = self.inner.store.list_by_status(WorkStatus::Processing)?;
        let mut report = RecoveryReport::default();

        for (asset, _) in processing {
            let lock = self.asset_lock(&asset.id);
            let _guard = lock.lock().await;

            if self.inner.workers.lock().await.contains_key(&asset.id) {
                continue;
            }
            // Re-read under the lock; it may have finished meanwhile
            let job = self.inner.store.find_job(&asset.id)?;
            if job.status != WorkStatus::Processing {
                continue;
            }

            match self.remaining_time(&job) {
                Some((handle, remaining)) => {
                    info!("Adopting worker {} for asset {}", handle, asset.id);
                    self.spawn_monitor(&asset.id, handle, remaining, false).await;
                    report.adopted += 1;
                }
                None => {
                    self.fail_orphan(&job).await?;
                    report.failed += 1;
                }
            }
        }

        if report.adopted + report.failed > 0 {
            warn!(
                "Recovered {} asset(s): {} adopted, {} failed",
                report.adopted + report.failed,
                report.adopted,
                report.failed
            );
        }
        Ok(report)
    }

    /// Stops every worker this process launched, fails their assets and
    /// disconnects from the runtime. Adopted workers are only unwatched.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.workers.lock().await.keys().cloned().collect();
        info!("Shutting down, releasing {} worker(s)", ids.len());

        for id in ids {
            let lock = self.asset_lock(&id);
            let _guard = lock.lock().await;

            let Some(slot) = self.release_worker(&id).await else {
                continue;
            };
            slot.monitor.abort();
            if !slot.owned {
                debug!("Leaving adopted worker {} running", slot.handle);
                continue;
            }
            if let Err(e) =
                self.persist_outcome(&id, WorkStatus::Failed, Some(FailureReason::WorkerLost))
            {
                error!("Failed to mark asset {} as failed: {}", id, e);
            }
            self.settle(&id, Some(&slot.handle.id)).await;
        }

        self.inner.runtime.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_asset_id_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 7, 9, 5, 2).unwrap();
        let id = generate_asset_id(now);

        assert!(id.starts_with("202603-0709-0502-"));
        assert_eq!(id.len(), "202603-0709-0502-".len() + 36);
        assert!(PathResolver::is_valid_id(&id));
        assert_ne!(generate_asset_id(now), id);
    }

    #[test]
    fn test_settings_from_config_sorts_env() {
        let mut config = WorkerConfig::default();
        config.env.insert("B".to_string(), "2".to_string());
        config.env.insert("A".to_string(), "1".to_string());
        config.timeout_secs = 90;

        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(
            settings.env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
        assert_eq!(settings.timeout, Duration::from_secs(90));
        assert!(settings.auto_reconcile);
    }
}
