use crate::services::progress::{ProgressEvent, ProgressReporter, counter_label};
use camino::{Utf8Path, Utf8PathBuf};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use walkdir::WalkDir;

/// One directory tree to copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    /// Name used for progress events and log lines (e.g. the folder name)
    pub label: String,
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub recursive: bool,
}

impl ReplicationTask {
    pub fn new(label: impl Into<String>, source: Utf8PathBuf, destination: Utf8PathBuf) -> Self {
        Self {
            label: label.into(),
            source,
            destination,
            recursive: true,
        }
    }

    fn stage_name(&self) -> String {
        format!("Copy Directory: {}", self.label)
    }
}

/// A file that could not be copied and was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: Utf8PathBuf,
    pub reason: String,
}

/// Result of a replication that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub label: String,

    /// Files in the snapshot taken before copying started
    pub files_total: usize,

    pub files_copied: usize,
    pub bytes_copied: u64,

    /// Files skipped because of per-file I/O errors
    pub skipped: Vec<SkippedFile>,
}

impl ReplicationOutcome {
    pub fn is_complete(&self) -> bool {
        self.files_copied == self.files_total
    }
}

/// Fatal replication errors; per-file I/O errors never surface here
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Source directory does not exist: {0}")]
    SourceNotFound(Utf8PathBuf),

    #[error("Replication cancelled")]
    Cancelled,

    #[error("Failed to enumerate {root}: {source}")]
    Enumeration {
        root: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),

    #[error("{path} is not inside {root}")]
    OutsideSource { path: Utf8PathBuf, root: Utf8PathBuf },

    #[error("Failed to create destination {path}: {source}")]
    CreateDestination {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Replication task aborted: {0}")]
    Aborted(String),
}

/// Copy `task.source` into `task.destination` file by file.
///
/// The file list is snapshotted once before copying; files created in the
/// source afterwards are not copied. An I/O error on an individual file is
/// logged, recorded in [`ReplicationOutcome::skipped`], and the remaining
/// files are still copied. Anything else aborts the replication.
///
/// Cancellation is checked on entry, before any filesystem access, and again
/// before each file.
pub async fn replicate(
    task: &ReplicationTask,
    cancel: &watch::Receiver<bool>,
    reporter: &dyn ProgressReporter,
) -> Result<ReplicationOutcome, ReplicationError> {
    if *cancel.borrow() {
        tracing::warn!("Replication of {} cancelled before start", task.label);
        return Err(ReplicationError::Cancelled);
    }

    let is_dir = tokio::fs::metadata(&task.source)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ReplicationError::SourceNotFound(task.source.clone()));
    }

    let stage = task.stage_name();
    reporter.report(ProgressEvent::new(&stage, 0.0, stage.clone()));

    let files = {
        let root = task.source.clone();
        let recursive = task.recursive;
        tokio::task::spawn_blocking(move || snapshot_files(&root, recursive))
            .await
            .map_err(|e| ReplicationError::Aborted(e.to_string()))??
    };

    tokio::fs::create_dir_all(&task.destination)
        .await
        .map_err(|source| ReplicationError::CreateDestination {
            path: task.destination.clone(),
            source,
        })?;

    let mut outcome = ReplicationOutcome {
        label: task.label.clone(),
        files_total: files.len(),
        ..ReplicationOutcome::default()
    };

    tracing::info!(
        "Replicating {} files from {} to {}",
        outcome.files_total,
        task.source,
        task.destination
    );

    for file in &files {
        if *cancel.borrow() {
            tracing::warn!(
                "Replication of {} cancelled after {} of {} files",
                task.label,
                outcome.files_copied,
                outcome.files_total
            );
            return Err(ReplicationError::Cancelled);
        }

        let relative = file
            .strip_prefix(&task.source)
            .map_err(|_| ReplicationError::OutsideSource {
                path: file.clone(),
                root: task.source.clone(),
            })?;
        let target = task.destination.join(relative);

        match copy_file(file, &target).await {
            Ok(bytes) => {
                outcome.files_copied += 1;
                outcome.bytes_copied += bytes;

                reporter.report(ProgressEvent::new(
                    &stage,
                    outcome.files_copied as f32 / outcome.files_total as f32,
                    format!(
                        "{} files copied.",
                        counter_label(outcome.files_copied, outcome.files_total)
                    ),
                ));
            }
            Err(e) => {
                tracing::warn!("File was not copied and has been skipped: {} ({})", file, e);
                outcome.skipped.push(SkippedFile {
                    path: file.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if outcome.files_total == 0 {
        reporter.report(ProgressEvent::new(&stage, 1.0, "0/0 files copied."));
    }

    tracing::info!(
        "Replicated {}: {}/{} files, {} bytes, {} skipped",
        task.label,
        outcome.files_copied,
        outcome.files_total,
        outcome.bytes_copied,
        outcome.skipped.len()
    );

    Ok(outcome)
}

/// Enumerate every non-directory entry under `root`, sorted by file name.
fn snapshot_files(root: &Utf8Path, recursive: bool) -> Result<Vec<Utf8PathBuf>, ReplicationError> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| ReplicationError::Enumeration {
            root: root.to_path_buf(),
            source,
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(ReplicationError::NonUtf8Path)?;
        files.push(path);
    }

    Ok(files)
}

/// Byte-stream copy of one file, creating parent directories as needed.
async fn copy_file(source: &Utf8Path, target: &Utf8Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = tokio::fs::File::create(target).await?;
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;

    tracing::debug!("Copied {} -> {} ({} bytes)", source, target, bytes);
    Ok(bytes)
}
