//! Services module - the packaging stages as standalone building blocks.
//!
//! Each service does one stage of the pipeline and knows nothing about the
//! others or about run state. [`crate::pipeline::Packager`] sequences them.
//!
//! # Components
//!
//! - [`workspace`]: creates the uniquely named temporary build directory and
//!   tears it down again (idempotently).
//! - [`replicator`]: copies one directory tree on tokio I/O, skipping files
//!   that fail with an I/O error and reporting per-file progress.
//! - [`exclusion`]: best-effort removal of fixed relative paths from the
//!   replicated data.
//! - [`archiver`]: streams a set of directories into a gzip-compressed tar
//!   through a locked partial file that is renamed into place.
//! - [`progress`]: the [`ProgressReporter`] seam through which every stage
//!   reports `(stage, fraction, label)` events.
//!
//! # Error policy
//!
//! Per-file problems (a file that cannot be copied, an excluded path that is
//! missing) are logged with `tracing::warn!` and returned as data. Everything
//! else is a typed error that aborts the stage.

pub mod archiver;
pub mod exclusion;
pub mod progress;
pub mod replicator;
pub mod workspace;

pub use archiver::{ArchiveError, ArchiveOptions, ArchiveSource, ArchiveSummary, archive};
pub use exclusion::{ExclusionList, ExclusionReport, ExclusionStatus, apply_exclusions};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, counter_label};
pub use replicator::{
    ReplicationError, ReplicationOutcome, ReplicationTask, SkippedFile, replicate,
};
pub use workspace::{Workspace, WorkspaceError, teardown};
