use camino::Utf8PathBuf;
use serde::Serialize;
use std::fmt;

/// Stage of a packaging run.
///
/// Stages advance strictly forward through the happy path. Any non-terminal
/// stage may drop to [`Stage::Failed`], and both terminal stages return to
/// [`Stage::Idle`] once cleanup and reporting are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Stage {
    #[default]
    Idle,
    Preparing,
    WritingManifest,
    Replicating,
    Filtering,
    Archiving,
    Succeeded,
    Failed,
}

impl Stage {
    /// Position on the happy path, used for the monotonic check
    fn ordinal(self) -> u8 {
        match self {
            Stage::Idle => 0,
            Stage::Preparing => 1,
            Stage::WritingManifest => 2,
            Stage::Replicating => 3,
            Stage::Filtering => 4,
            Stage::Archiving => 5,
            Stage::Succeeded => 6,
            Stage::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    /// True while a run owns the pipeline (anything but `Idle`)
    pub fn is_busy(self) -> bool {
        self != Stage::Idle
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: Stage) -> bool {
        match (self, next) {
            (Stage::Succeeded | Stage::Failed, Stage::Idle) => true,
            (Stage::Idle, Stage::Preparing) => true,
            (from, Stage::Failed) => !from.is_terminal() && from != Stage::Idle,
            (from, to) if from.is_terminal() || to == Stage::Idle => false,
            (from, to) => to.ordinal() == from.ordinal() + 1,
        }
    }

    /// Human-readable label used in progress events
    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Preparing => "Preparing workspace",
            Stage::WritingManifest => "Writing package manifest",
            Stage::Replicating => "Replicating project data",
            Stage::Filtering => "Removing excluded files",
            Stage::Archiving => "Archiving package",
            Stage::Succeeded => "Package generated",
            Stage::Failed => "Packaging failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Working state of the packaging pipeline.
///
/// Held by [`crate::state::StateManager`] behind a lock; never mutate it
/// directly outside the state manager.
#[derive(Clone, Debug, Default)]
pub struct PipelineRun {
    pub stage: Stage,

    /// Set once per run when the workspace is created, cleared on teardown
    pub workspace_root: Option<Utf8PathBuf>,

    pub destination: Option<Utf8PathBuf>,

    /// Path of the produced archive once archiving succeeded
    pub artifact_path: Option<Utf8PathBuf>,

    pub cancel_requested: bool,

    // Replication progress, summed across all source folders
    pub files_copied: usize,
    pub files_total: usize,

    /// Non-fatal problems collected during the run
    pub warnings: Vec<String>,

    /// Cause of the most recent failure
    pub last_error: Option<String>,
}

impl PipelineRun {
    /// Reset everything belonging to a single run, keeping nothing.
    pub fn clear(&mut self) {
        *self = PipelineRun::default();
    }

    /// Fraction of discovered files copied so far
    pub fn replication_fraction(&self) -> f32 {
        if self.files_total == 0 {
            0.0
        } else {
            self.files_copied as f32 / self.files_total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_is_idle() {
        let run = PipelineRun::default();
        assert_eq!(run.stage, Stage::Idle);
        assert!(run.workspace_root.is_none());
        assert!(!run.cancel_requested);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Stage::Idle,
            Stage::Preparing,
            Stage::WritingManifest,
            Stage::Replicating,
            Stage::Filtering,
            Stage::Archiving,
            Stage::Succeeded,
            Stage::Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(!Stage::Replicating.can_transition_to(Stage::WritingManifest));
        assert!(!Stage::Preparing.can_transition_to(Stage::Replicating));
        assert!(!Stage::Idle.can_transition_to(Stage::Archiving));
        assert!(!Stage::Archiving.can_transition_to(Stage::Idle));
    }

    #[test]
    fn test_failure_transitions() {
        for stage in [
            Stage::Preparing,
            Stage::WritingManifest,
            Stage::Replicating,
            Stage::Filtering,
            Stage::Archiving,
        ] {
            assert!(stage.can_transition_to(Stage::Failed));
        }
        assert!(!Stage::Idle.can_transition_to(Stage::Failed));
        assert!(!Stage::Succeeded.can_transition_to(Stage::Failed));
        assert!(Stage::Failed.can_transition_to(Stage::Idle));
    }

    #[test]
    fn test_replication_fraction() {
        let mut run = PipelineRun::default();
        assert_eq!(run.replication_fraction(), 0.0);

        run.files_total = 4;
        run.files_copied = 1;
        assert!((run.replication_fraction() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_clear() {
        let mut run = PipelineRun {
            stage: Stage::Failed,
            workspace_root: Some(Utf8PathBuf::from("/tmp/ws")),
            warnings: vec!["w".to_string()],
            ..PipelineRun::default()
        };
        run.clear();
        assert_eq!(run.stage, Stage::Idle);
        assert!(run.workspace_root.is_none());
        assert!(run.warnings.is_empty());
    }
}
