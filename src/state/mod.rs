// State management module
//
// This module provides the StateManager which wraps PipelineRun with thread-safe access
// using Arc<RwLock<T>> and emits change events for progress displays.

use crate::models::{PipelineRun, Stage};
use crate::services::progress::{ProgressEvent, ProgressReporter};
use camino::Utf8PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Change events emitted when run state is modified
///
/// These events notify interested parties (a CLI progress printer, a GUI)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The pipeline moved to another stage
    StageChanged { from: Stage, to: Stage },

    /// A stage reported progress
    Progress(ProgressEvent),

    /// Aggregate replication counters changed
    ReplicationProgress { copied: usize, total: usize },

    /// A non-fatal problem was recorded
    Warning { message: String },

    /// Cancellation was requested for the current run
    CancelRequested,

    /// The run reached a terminal stage
    RunFinished { success: bool, detail: String },

    /// State has been cleared back to idle
    StateReset,
}

/// Illegal requests against the run state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("A packaging run is already active (stage: {0:?})")]
    AlreadyRunning(Stage),

    #[error("Invalid stage transition {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Workspace root is already set for this run: {0}")]
    WorkspaceAlreadySet(Utf8PathBuf),
}

/// Thread-safe run state with event emission
///
/// This is the observable side of the packaging pipeline:
/// - Provides thread-safe access to [`PipelineRun`] via `Arc<RwLock<T>>`
/// - Validates stage transitions
/// - Detects state changes and emits [`StateChange`] events
/// - Re-broadcasts [`ProgressEvent`]s as a [`ProgressReporter`]
///
/// # Usage
///
/// - [`read()`](Self::read) / [`stage()`](Self::stage) for polling
/// - [`subscribe()`](Self::subscribe) for listening to changes
/// - The `begin_run`/`transition`/`finish_run` family is driven by
///   [`crate::pipeline::Packager`]
pub struct StateManager {
    /// The run state protected by RwLock for thread-safe access
    state: Arc<RwLock<PipelineRun>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with an idle run
    ///
    /// The broadcast channel buffers 256 events; per-file progress is
    /// chatty and slow subscribers simply lag.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(PipelineRun::default())),
            state_tx,
        }
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> PipelineRun {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&PipelineRun) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Current stage of the pipeline
    pub fn stage(&self) -> Stage {
        self.read(|s| s.stage)
    }

    /// Update the state and emit change events
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut PipelineRun),
    {
        self.try_update(|state| {
            update_fn(state);
            Ok(())
        })
        .unwrap_or_default()
    }

    /// Update the state with a fallible function
    ///
    /// If the function fails the state is rolled back and no events are emitted.
    pub fn try_update<F>(&self, update_fn: F) -> Result<Vec<StateChange>, StateError>
    where
        F: FnOnce(&mut PipelineRun) -> Result<(), StateError>,
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        if let Err(e) = update_fn(&mut state) {
            *state = old_state;
            return Err(e);
        }

        let changes = Self::detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        Ok(changes)
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Emit an event that is not derived from a field change
    fn emit(&self, change: StateChange) -> StateChange {
        let _ = self.state_tx.send(change.clone());
        change
    }

    fn detect_changes(old: &PipelineRun, new: &PipelineRun) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.stage != new.stage {
            changes.push(StateChange::StageChanged {
                from: old.stage,
                to: new.stage,
            });
        }

        if old.files_copied != new.files_copied || old.files_total != new.files_total {
            changes.push(StateChange::ReplicationProgress {
                copied: new.files_copied,
                total: new.files_total,
            });
        }

        if new.warnings.len() > old.warnings.len() {
            for message in &new.warnings[old.warnings.len()..] {
                changes.push(StateChange::Warning {
                    message: message.clone(),
                });
            }
        }

        if !old.cancel_requested && new.cancel_requested {
            changes.push(StateChange::CancelRequested);
        }

        changes
    }

    // Run lifecycle, driven by the packager

    /// Claim the pipeline for a new run
    ///
    /// Fails with [`StateError::AlreadyRunning`] unless the pipeline is idle.
    pub fn begin_run(&self, destination: Utf8PathBuf) -> Result<Vec<StateChange>, StateError> {
        self.try_update(|state| {
            if state.stage.is_busy() {
                return Err(StateError::AlreadyRunning(state.stage));
            }
            state.clear();
            state.destination = Some(destination);
            state.stage = Stage::Preparing;
            Ok(())
        })
    }

    /// Move to the next stage, rejecting non-monotonic transitions
    pub fn transition(&self, next: Stage) -> Result<Vec<StateChange>, StateError> {
        self.try_update(|state| {
            if !state.stage.can_transition_to(next) {
                return Err(StateError::InvalidTransition {
                    from: state.stage,
                    to: next,
                });
            }
            state.stage = next;
            Ok(())
        })
    }

    /// Record the workspace root; allowed once per run
    pub fn set_workspace_root(&self, root: Utf8PathBuf) -> Result<Vec<StateChange>, StateError> {
        self.try_update(|state| {
            if let Some(existing) = &state.workspace_root {
                return Err(StateError::WorkspaceAlreadySet(existing.clone()));
            }
            state.workspace_root = Some(root);
            Ok(())
        })
    }

    /// Clear the workspace root after teardown
    pub fn clear_workspace_root(&self) -> Vec<StateChange> {
        self.update(|state| state.workspace_root = None)
    }

    /// Add the counts of one finished replication task
    pub fn add_replication_counts(&self, copied: usize, total: usize) -> Vec<StateChange> {
        self.update(|state| {
            state.files_copied += copied;
            state.files_total += total;
        })
    }

    /// Record a non-fatal problem
    pub fn add_warning(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| state.warnings.push(message))
    }

    pub fn request_cancel(&self) -> Vec<StateChange> {
        self.update(|state| {
            if state.stage.is_busy() && !state.stage.is_terminal() {
                state.cancel_requested = true;
            }
        })
    }

    /// Enter `Succeeded` with the produced artifact
    pub fn mark_succeeded(&self, artifact: Utf8PathBuf) -> Result<Vec<StateChange>, StateError> {
        let detail = artifact.to_string();
        let mut changes = self.try_update(|state| {
            if !state.stage.can_transition_to(Stage::Succeeded) {
                return Err(StateError::InvalidTransition {
                    from: state.stage,
                    to: Stage::Succeeded,
                });
            }
            state.stage = Stage::Succeeded;
            state.artifact_path = Some(artifact);
            Ok(())
        })?;

        changes.push(self.emit(StateChange::RunFinished {
            success: true,
            detail,
        }));
        Ok(changes)
    }

    /// Enter `Failed` with the cause
    pub fn mark_failed(&self, cause: impl Into<String>) -> Result<Vec<StateChange>, StateError> {
        let detail = cause.into();
        let mut changes = self.try_update(|state| {
            if !state.stage.can_transition_to(Stage::Failed) {
                return Err(StateError::InvalidTransition {
                    from: state.stage,
                    to: Stage::Failed,
                });
            }
            state.stage = Stage::Failed;
            state.last_error = Some(detail.clone());
            Ok(())
        })?;

        changes.push(self.emit(StateChange::RunFinished {
            success: false,
            detail,
        }));
        Ok(changes)
    }

    /// Return from a terminal stage to idle, clearing all run data
    pub fn finish_run(&self) -> Result<Vec<StateChange>, StateError> {
        let mut changes = self.try_update(|state| {
            if !state.stage.can_transition_to(Stage::Idle) {
                return Err(StateError::InvalidTransition {
                    from: state.stage,
                    to: Stage::Idle,
                });
            }
            state.clear();
            Ok(())
        })?;

        changes.push(self.emit(StateChange::StateReset));
        Ok(changes)
    }
}

impl ProgressReporter for StateManager {
    fn report(&self, event: ProgressEvent) {
        tracing::debug!(
            "[{}] {:.0}% {}",
            event.stage,
            event.fraction * 100.0,
            event.label
        );
        self.emit(StateChange::Progress(event));
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across tasks
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
