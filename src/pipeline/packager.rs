use crate::metrics::Metrics;
use crate::models::{
    ARCHIVE_EXTENSION, MANIFEST_FILE_NAME, ManifestError, PACKAGE_ROOT_FOLDER_NAME,
    PackageManifest, PackerConfig, PipelineRun, Stage,
};
use crate::services::workspace;
use crate::services::{
    ArchiveError, ArchiveOptions, ArchiveSource, ArchiveSummary, ExclusionList, ExclusionReport,
    ProgressEvent, ProgressReporter, ReplicationError, ReplicationOutcome, ReplicationTask,
    Workspace, WorkspaceError, apply_exclusions, archive, replicate,
};
use crate::state::{StateError, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Errors that end a packaging run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Destination {path} is not writable: {reason}")]
    DestinationUnwritable { path: Utf8PathBuf, reason: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to write manifest {path}: {source}")]
    ManifestWrite {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Replication of {folder} failed: {source}")]
    Replication {
        folder: String,
        #[source]
        source: ReplicationError,
    },

    #[error(transparent)]
    Archive(ArchiveError),

    #[error("Packaging cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    fn replication(folder: &str, source: ReplicationError) -> Self {
        match source {
            ReplicationError::Cancelled => PipelineError::Cancelled,
            source => PipelineError::Replication {
                folder: folder.to_string(),
                source,
            },
        }
    }
}

impl From<ArchiveError> for PipelineError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Cancelled => PipelineError::Cancelled,
            e => PipelineError::Archive(e),
        }
    }
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct PackagingReport {
    /// Path of the `.tgz` artifact
    pub artifact: Utf8PathBuf,

    /// Workspace kept until [`Packager::teardown`]
    pub workspace_root: Utf8PathBuf,

    /// Replication outcome per source folder, in configured order
    pub replication: IndexMap<String, ReplicationOutcome>,

    pub exclusions: ExclusionReport,

    pub archive: ArchiveSummary,
}

impl PackagingReport {
    pub fn files_copied(&self) -> usize {
        self.replication.values().map(|o| o.files_copied).sum()
    }

    pub fn files_skipped(&self) -> usize {
        self.replication.values().map(|o| o.skipped.len()).sum()
    }
}

/// Packaging pipeline orchestrator
///
/// Sequences workspace creation, manifest writing, concurrent replication,
/// exclusion filtering, and archiving, and guarantees the workspace is gone
/// after any failed run. Only one run may be active at a time; the current
/// stage is observable through [`run_state`](Self::run_state) and the
/// [`StateManager`] event stream.
///
/// The process working directory is never changed: the archiver receives
/// explicit `(path, entry name)` pairs.
pub struct Packager {
    config: Arc<PackerConfig>,
    exclusions: ExclusionList,
    state: StateManager,
    metrics: Arc<Metrics>,

    /// Send `true` to request cancellation of the current run
    cancel_tx: watch::Sender<bool>,
}

impl Packager {
    pub fn new(config: PackerConfig, state: StateManager) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            exclusions: ExclusionList::builtin(),
            state,
            metrics: Arc::new(Metrics::new()),
            cancel_tx,
        }
    }

    /// Replace the built-in exclusion list
    pub fn with_exclusions(mut self, exclusions: ExclusionList) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    pub fn exclusions(&self) -> &ExclusionList {
        &self.exclusions
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current stage, for polling callers
    pub fn run_state(&self) -> Stage {
        self.state.stage()
    }

    pub fn snapshot(&self) -> PipelineRun {
        self.state.snapshot()
    }

    /// Request graceful cancellation of the current run
    ///
    /// Replication stops before its next file and archiving before its next
    /// entry; the run then fails with [`PipelineError::Cancelled`].
    /// A request made while idle is dropped when the next run is claimed.
    pub fn request_cancel(&self) {
        tracing::warn!("Cancellation requested");
        // state first: `claim` copies the state flag into the signal
        self.state.request_cancel();
        self.cancel_tx.send_replace(true);
    }

    /// Start a run on the current tokio runtime
    ///
    /// The run is claimed before this returns, so the pipeline is already in
    /// [`Stage::Preparing`] and a [`request_cancel`](Self::request_cancel)
    /// made right afterwards applies to it. Exactly one of the callbacks is
    /// invoked. After `on_success` returns the workspace is torn down and the
    /// pipeline returns to idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_packaging<S, F>(
        self: &Arc<Self>,
        manifest: PackageManifest,
        destination: Utf8PathBuf,
        on_success: S,
        on_failure: F,
    ) -> Result<JoinHandle<()>, PipelineError>
    where
        S: FnOnce(PackagingReport) + Send + 'static,
        F: FnOnce(PipelineError) + Send + 'static,
    {
        self.claim(&destination)?;

        let packager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            match packager.drive(&manifest, &destination).await {
                Ok(report) => {
                    on_success(report);
                    if let Err(e) = packager.teardown().await {
                        tracing::error!("Failed to tear down workspace after success: {}", e);
                    }
                }
                Err(e) => on_failure(e),
            }
        }))
    }

    /// Run the whole pipeline once
    ///
    /// On success the pipeline stays in [`Stage::Succeeded`] with the
    /// workspace on disk until [`teardown`](Self::teardown) is called. On
    /// failure the workspace is removed, the pipeline is back in
    /// [`Stage::Idle`], and the original cause is returned.
    pub async fn run(
        &self,
        manifest: &PackageManifest,
        destination: &Utf8Path,
    ) -> Result<PackagingReport, PipelineError> {
        self.claim(destination)?;
        self.drive(manifest, destination).await
    }

    /// Enter `Preparing` and reset the cancel signal for the new run
    fn claim(&self, destination: &Utf8Path) -> Result<(), PipelineError> {
        self.state.begin_run(destination.to_path_buf())?;
        // begin_run cleared the state flag; a request recorded since then is kept
        self.cancel_tx
            .send_replace(self.state.read(|s| s.cancel_requested));
        Ok(())
    }

    /// Execute a claimed run and settle its outcome
    async fn drive(
        &self,
        manifest: &PackageManifest,
        destination: &Utf8Path,
    ) -> Result<PackagingReport, PipelineError> {
        let started = Instant::now();
        tracing::info!(
            "Starting packaging of {} into {}",
            manifest.name,
            destination
        );

        match self.execute(manifest, destination).await {
            Ok(report) => {
                self.state.mark_succeeded(report.artifact.clone())?;
                self.metrics.record_run(true, started.elapsed());
                self.metrics.log_summary();

                tracing::info!("Template package generated: {}", report.artifact);
                Ok(report)
            }
            Err(e) => Err(self.fail_run(e, started).await),
        }
    }

    /// Failure path: drop the workspace, publish the cause, return to idle
    async fn fail_run(&self, e: PipelineError, started: Instant) -> PipelineError {
        tracing::error!("Packaging failed: {}", e);
        self.report_stage(Stage::Failed, 0.0);

        let cause = match self.discard_workspace().await {
            Some(leaked) => {
                self.state
                    .add_warning(format!("Workspace could not be removed: {}", leaked));
                format!("{} (workspace left at {})", e, leaked)
            }
            None => e.to_string(),
        };

        if let Err(state_err) = self.state.mark_failed(cause) {
            tracing::error!("Could not record failure: {}", state_err);
        }
        if let Err(state_err) = self.state.finish_run() {
            tracing::error!("Could not reset run state: {}", state_err);
        }

        self.metrics.record_run(false, started.elapsed());
        if e.is_cancelled() {
            self.metrics.record_cancelled();
        }
        self.metrics.log_summary();
        e
    }

    /// Delete the workspace of a finished run and return to idle
    ///
    /// A no-op when idle; rejected while a run is still in progress.
    pub async fn teardown(&self) -> Result<(), PipelineError> {
        let stage = self.run_state();
        if stage.is_busy() && !stage.is_terminal() {
            return Err(StateError::AlreadyRunning(stage).into());
        }

        if let Some(root) = self.state.read(|s| s.workspace_root.clone()) {
            workspace::teardown(&root).await?;
            self.state.clear_workspace_root();
        }

        if stage.is_terminal() {
            self.state.finish_run()?;
        }

        Ok(())
    }

    async fn execute(
        &self,
        manifest: &PackageManifest,
        destination: &Utf8Path,
    ) -> Result<PackagingReport, PipelineError> {
        // Preparing: the begin_run transition already happened
        self.report_stage(Stage::Preparing, 0.0);
        ensure_destination_writable(destination).await?;
        let workspace = Workspace::create(&self.config.resolved_workspace_base()).await?;
        self.state.set_workspace_root(workspace.root().to_path_buf())?;
        self.report_stage(Stage::Preparing, 1.0);

        self.enter(Stage::WritingManifest)?;
        write_manifest(manifest, &workspace).await?;
        self.report_stage(Stage::WritingManifest, 1.0);

        self.enter(Stage::Replicating)?;
        let replication = self.replicate_sources(&workspace).await?;
        self.report_stage(Stage::Replicating, 1.0);

        self.enter(Stage::Filtering)?;
        let exclusions = apply_exclusions(workspace.data_dir(), &self.exclusions);
        self.metrics.record_exclusions(&exclusions);
        for warning in exclusions.warnings() {
            self.state.add_warning(warning);
        }
        self.report_stage(Stage::Filtering, 1.0);

        self.enter(Stage::Archiving)?;
        let artifact = destination.join(manifest.artifact_file_name(ARCHIVE_EXTENSION));
        let summary = self.archive_workspace(&workspace, &artifact).await?;
        self.metrics
            .record_archive(summary.entries, summary.compressed_bytes);
        self.report_stage(Stage::Archiving, 1.0);

        Ok(PackagingReport {
            artifact,
            workspace_root: workspace.root().to_path_buf(),
            replication,
            exclusions,
            archive: summary,
        })
    }

    /// Fan out one replication task per source folder and wait for all of them.
    async fn replicate_sources(
        &self,
        workspace: &Workspace,
    ) -> Result<IndexMap<String, ReplicationOutcome>, PipelineError> {
        if *self.cancel_tx.borrow() {
            tracing::warn!("Packaging cancelled before replication");
            return Err(PipelineError::Cancelled);
        }

        let mut handles = Vec::with_capacity(self.config.source_folders.len());
        for folder in &self.config.source_folders {
            let task = ReplicationTask::new(
                folder.clone(),
                self.config.project_root.join(folder),
                workspace.data_dir().join(folder),
            );
            let cancel = self.cancel_tx.subscribe();
            let reporter = self.state.clone();

            let handle = tokio::spawn(async move { replicate(&task, &cancel, &reporter).await });
            handles.push((folder.clone(), handle));
        }

        // Fan-in: every task finishes before the stage result is decided
        let mut outcomes = IndexMap::new();
        let mut first_error = None;
        for (folder, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    outcomes.insert(folder, outcome);
                }
                Ok(Err(e)) => {
                    tracing::error!("Replication of {} failed: {}", folder, e);
                    first_error.get_or_insert(PipelineError::replication(&folder, e));
                }
                Err(e) => {
                    tracing::error!("Replication task for {} panicked: {}", folder, e);
                    first_error.get_or_insert(PipelineError::Task(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        for outcome in outcomes.values() {
            self.metrics.record_replication(outcome);
            self.state
                .add_replication_counts(outcome.files_copied, outcome.files_total);
            for skipped in &outcome.skipped {
                self.state.add_warning(format!(
                    "File was not copied: {} ({})",
                    skipped.path, skipped.reason
                ));
            }
        }

        Ok(outcomes)
    }

    async fn archive_workspace(
        &self,
        workspace: &Workspace,
        artifact: &Utf8Path,
    ) -> Result<ArchiveSummary, PipelineError> {
        let sources = vec![ArchiveSource::new(
            workspace.package_dir().to_path_buf(),
            PACKAGE_ROOT_FOLDER_NAME,
        )];
        let options = ArchiveOptions {
            recursive: true,
            compression_level: self.config.effective_compression_level(),
        };
        let cancel = self.cancel_tx.subscribe();
        let destination = artifact.to_path_buf();

        let summary =
            tokio::task::spawn_blocking(move || archive(&destination, &sources, &options, &cancel))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))??;

        Ok(summary)
    }

    /// Tear down the workspace of a failed run
    ///
    /// Returns the root if it could not be removed.
    async fn discard_workspace(&self) -> Option<Utf8PathBuf> {
        let root = self.state.read(|s| s.workspace_root.clone())?;

        match workspace::teardown(&root).await {
            Ok(()) => {
                self.state.clear_workspace_root();
                None
            }
            Err(e) => {
                tracing::error!("Failed to clean up workspace {}: {}", root, e);
                Some(root)
            }
        }
    }

    fn enter(&self, stage: Stage) -> Result<(), PipelineError> {
        self.state.transition(stage)?;
        tracing::info!("Stage: {}", stage);
        self.report_stage(stage, 0.0);
        Ok(())
    }

    fn report_stage(&self, stage: Stage, fraction: f32) {
        self.state
            .report(ProgressEvent::new(stage.label(), fraction, stage.label()));
    }
}

/// Probe the destination by creating and removing a scratch directory.
async fn ensure_destination_writable(destination: &Utf8Path) -> Result<(), PipelineError> {
    let probe = destination.join(format!(".template-packer-probe-{}", Uuid::new_v4()));

    let result: std::io::Result<()> = async {
        tokio::fs::create_dir(&probe).await?;
        tokio::fs::remove_dir(&probe).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::debug!("Destination is writable: {}", destination);
            Ok(())
        }
        Err(e) => Err(PipelineError::DestinationUnwritable {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

async fn write_manifest(
    manifest: &PackageManifest,
    workspace: &Workspace,
) -> Result<(), PipelineError> {
    manifest.ensure_present()?;
    let json = manifest.to_json()?;

    let path = workspace.package_dir().join(MANIFEST_FILE_NAME);
    tokio::fs::write(&path, json)
        .await
        .map_err(|source| PipelineError::ManifestWrite {
            path: path.clone(),
            source,
        })?;

    tracing::info!("Wrote manifest {}", path);
    Ok(())
}
