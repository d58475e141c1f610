//! Integration tests for the Packager
//!
//! These tests run the whole pipeline against scratch project trees and verify:
//! - Archive layout and contents, including the manifest and exclusions
//! - The workspace is always gone after a failed run or teardown
//! - Repeated runs over the same tree produce the same archive entries
//! - Single-run guard, cancellation, and progress reporting

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use template_packer::services::ArchiveError;
use template_packer::state::StateError;
use template_packer::{
    PackageManifest, Packager, PackerConfig, PipelineError, Stage, StateChange, StateManager,
};
use tempfile::TempDir;
use tokio::sync::oneshot;

struct Project {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
    destination: Utf8PathBuf,
    workspace_base: Utf8PathBuf,
}

impl Project {
    /// Assets with three files, an empty Packages folder, and a ProjectSettings
    /// folder holding only the excluded version file
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let root = base.join("project");
        let destination = base.join("out");
        let workspace_base = base.join("tmp");

        std::fs::create_dir_all(root.join("Assets/sub/deeper")).unwrap();
        std::fs::create_dir_all(root.join("Packages")).unwrap();
        std::fs::create_dir_all(root.join("ProjectSettings")).unwrap();
        std::fs::create_dir_all(&destination).unwrap();
        std::fs::create_dir_all(&workspace_base).unwrap();

        std::fs::write(root.join("Assets/a.txt"), "alpha").unwrap();
        std::fs::write(root.join("Assets/sub/b.txt"), "beta").unwrap();
        std::fs::write(root.join("Assets/sub/deeper/c.bin"), [0u8, 1, 2, 255]).unwrap();
        std::fs::write(
            root.join("ProjectSettings/ProjectVersion.txt"),
            "m_EditorVersion: 2021.3.0f1",
        )
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            root,
            destination,
            workspace_base,
        }
    }

    fn config(&self) -> PackerConfig {
        PackerConfig {
            project_root: self.root.clone(),
            workspace_base: Some(self.workspace_base.clone()),
            ..PackerConfig::default()
        }
    }

    fn packager(&self) -> Packager {
        Packager::new(self.config(), StateManager::new())
    }

    fn workspaces_left(&self) -> usize {
        std::fs::read_dir(&self.workspace_base).unwrap().count()
    }
}

fn manifest() -> PackageManifest {
    PackageManifest {
        name: "com.acme.template.starter".to_string(),
        display_name: "Starter".to_string(),
        version: "2.1.0".to_string(),
        description: String::new(),
        ..PackageManifest::default()
    }
}

/// Entry names (directory slashes trimmed) and contents, in archive order
fn read_archive(path: &Utf8Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry
            .path()
            .unwrap()
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.push((name, data));
    }
    entries
}

fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data.as_slice())
}

#[tokio::test]
async fn test_package_layout() {
    let project = Project::new();
    let packager = project.packager();

    let report = packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap();

    assert_eq!(
        report.artifact,
        project.destination.join("com.acme.template.starter.tgz")
    );
    assert_eq!(report.files_copied(), 4);
    assert_eq!(report.exclusions.removed(), 1);

    let entries = read_archive(&report.artifact);
    let names: BTreeSet<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    let expected: BTreeSet<&str> = [
        "package",
        "package/package.json",
        "package/ProjectData~",
        "package/ProjectData~/Assets",
        "package/ProjectData~/Assets/a.txt",
        "package/ProjectData~/Assets/sub",
        "package/ProjectData~/Assets/sub/b.txt",
        "package/ProjectData~/Assets/sub/deeper",
        "package/ProjectData~/Assets/sub/deeper/c.bin",
        "package/ProjectData~/Packages",
        "package/ProjectData~/ProjectSettings",
    ]
    .into_iter()
    .collect();
    assert_eq!(names, expected);

    assert_eq!(
        entry(&entries, "package/ProjectData~/Assets/sub/deeper/c.bin"),
        Some(&[0u8, 1, 2, 255][..])
    );

    let json = entry(&entries, "package/package.json").unwrap();
    let written = PackageManifest::from_json(std::str::from_utf8(json).unwrap()).unwrap();
    assert_eq!(written, manifest());

    packager.teardown().await.unwrap();
    assert_eq!(project.workspaces_left(), 0);
    assert_eq!(packager.run_state(), Stage::Idle);
}

#[tokio::test]
async fn test_workspace_kept_until_teardown() {
    let project = Project::new();
    let packager = project.packager();

    let report = packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap();

    assert_eq!(packager.run_state(), Stage::Succeeded);
    assert!(report.workspace_root.join("package/package.json").exists());
    assert_eq!(
        packager.snapshot().artifact_path.as_deref(),
        Some(report.artifact.as_path())
    );

    packager.teardown().await.unwrap();
    assert!(!report.workspace_root.exists());
}

#[tokio::test]
async fn test_repeated_runs_produce_same_entries() {
    let project = Project::new();
    let second_destination = project.destination.join("second");
    std::fs::create_dir_all(&second_destination).unwrap();

    let mut archives = Vec::new();
    for destination in [&project.destination, &second_destination] {
        let packager = project.packager();
        let report = packager.run(&manifest(), destination).await.unwrap();
        archives.push(read_archive(&report.artifact));
        packager.teardown().await.unwrap();
    }

    assert_eq!(archives[0], archives[1]);
}

#[tokio::test]
async fn test_failed_archive_removes_workspace_and_keeps_foreign_partial() {
    let project = Project::new();
    let packager = project.packager();

    // Another writer holds the partial file for the same artifact
    let foreign = project
        .destination
        .join("com.acme.template.starter.tgz.partial");
    std::fs::write(&foreign, "in progress").unwrap();
    let other_writer = std::fs::File::open(&foreign).unwrap();
    fs2::FileExt::try_lock_exclusive(&other_writer).unwrap();

    let err = packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Archive(ArchiveError::Locked(_))));
    assert_eq!(project.workspaces_left(), 0);
    assert_eq!(packager.run_state(), Stage::Idle);
    assert_eq!(std::fs::read(&foreign).unwrap(), b"in progress");
    assert!(!project.destination.join("com.acme.template.starter.tgz").exists());
}

#[tokio::test]
async fn test_partial_left_by_killed_run_does_not_block_later_runs() {
    let project = Project::new();
    let packager = project.packager();

    // Nobody holds a lock on it any more
    let abandoned = project
        .destination
        .join("com.acme.template.starter.tgz.partial");
    std::fs::write(&abandoned, vec![0u8; 8192]).unwrap();

    for _ in 0..2 {
        let report = packager
            .run(&manifest(), &project.destination)
            .await
            .unwrap();
        assert!(entry(&read_archive(&report.artifact), "package/package.json").is_some());
        packager.teardown().await.unwrap();
    }

    assert!(!abandoned.exists());
    assert_eq!(project.workspaces_left(), 0);
}

#[tokio::test]
async fn test_failure_event_carries_cause() {
    let project = Project::new();
    std::fs::remove_dir_all(project.root.join("Assets")).unwrap();
    let packager = project.packager();
    let mut rx = packager.state().subscribe();

    let err = packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Replication { ref folder, .. } if folder == "Assets"));
    assert_eq!(project.workspaces_left(), 0);

    let mut finished = None;
    while let Ok(change) = rx.try_recv() {
        if let StateChange::RunFinished { success, detail } = change {
            finished = Some((success, detail));
        }
    }
    let (success, detail) = finished.expect("no RunFinished event");
    assert!(!success);
    assert!(detail.contains("Assets"));
}

#[tokio::test]
async fn test_second_run_rejected_while_active() {
    let project = Project::new();
    let packager = project.packager();
    packager
        .state()
        .begin_run(project.destination.clone())
        .unwrap();

    let err = packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::State(StateError::AlreadyRunning(Stage::Preparing))
    ));
    // The active run's state is untouched
    assert_eq!(packager.run_state(), Stage::Preparing);
    assert_eq!(project.workspaces_left(), 0);
}

#[tokio::test]
async fn test_working_directory_unchanged() {
    let project = Project::new();
    let packager = project.packager();
    let before = std::env::current_dir().unwrap();

    packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap();
    packager.teardown().await.unwrap();

    assert_eq!(std::env::current_dir().unwrap(), before);
}

#[tokio::test]
async fn test_every_stage_reports_start_and_end() {
    let project = Project::new();
    let packager = project.packager();
    let mut rx = packager.state().subscribe();

    packager
        .run(&manifest(), &project.destination)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(change) = rx.try_recv() {
        if let StateChange::Progress(event) = change {
            events.push(event);
        }
    }

    for stage in [
        Stage::Preparing,
        Stage::WritingManifest,
        Stage::Replicating,
        Stage::Filtering,
        Stage::Archiving,
    ] {
        let fractions: Vec<f32> = events
            .iter()
            .filter(|e| e.stage == stage.label())
            .map(|e| e.fraction)
            .collect();
        assert_eq!(fractions, vec![0.0, 1.0], "stage {:?}", stage);
    }

    // Per-file counters from the replication tasks
    assert!(
        events
            .iter()
            .any(|e| e.stage == "Copy Directory: Assets" && e.label == "3/3 files copied.")
    );
    assert!(
        events
            .iter()
            .any(|e| e.stage == "Copy Directory: Packages" && e.label == "0/0 files copied.")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_packaging_calls_success_then_tears_down() {
    let project = Project::new();
    let packager = Arc::new(project.packager());
    let (tx, rx) = oneshot::channel();

    let handle = packager
        .start_packaging(
            manifest(),
            project.destination.clone(),
            move |report| {
                let _ = tx.send(Ok(report));
            },
            |e| panic!("unexpected failure: {}", e),
        )
        .unwrap();

    handle.await.unwrap();
    let report: Result<_, PipelineError> = rx.await.unwrap();
    let report = report.unwrap();

    assert!(report.artifact.exists());
    assert!(!report.workspace_root.exists());
    assert_eq!(packager.run_state(), Stage::Idle);
}

#[tokio::test]
async fn test_cancel_right_after_start_fails_cleanly() {
    let project = Project::new();
    let packager = Arc::new(project.packager());
    let (tx, result_rx) = oneshot::channel();

    let handle = packager
        .start_packaging(
            manifest(),
            project.destination.clone(),
            |report| panic!("run succeeded: {}", report.artifact),
            move |e| {
                let _ = tx.send(e);
            },
        )
        .unwrap();

    // The spawned task has not been polled yet on this runtime
    assert_eq!(packager.run_state(), Stage::Preparing);
    packager.request_cancel();

    handle.await.unwrap();
    let err = result_rx.await.unwrap();

    assert!(err.is_cancelled(), "unexpected error: {}", err);
    assert!(!project.destination.join("com.acme.template.starter.tgz").exists());
    assert!(!project.destination.join("com.acme.template.starter.tgz.partial").exists());
    assert_eq!(project.workspaces_left(), 0);
    assert_eq!(packager.run_state(), Stage::Idle);
    assert_eq!(packager.metrics().runs_cancelled.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_cancel_while_idle_does_not_reach_next_start() {
    let project = Project::new();
    let packager = Arc::new(project.packager());
    let (tx, result_rx) = oneshot::channel();

    packager.request_cancel();
    let handle = packager
        .start_packaging(
            manifest(),
            project.destination.clone(),
            move |report| {
                let _ = tx.send(report.artifact);
            },
            |e| panic!("unexpected failure: {}", e),
        )
        .unwrap();

    handle.await.unwrap();
    let artifact = result_rx.await.unwrap();

    assert!(artifact.exists());
    assert_eq!(project.workspaces_left(), 0);
}
