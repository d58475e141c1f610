//! Data models for the template packager.
//!
//! - [`PackageManifest`]: package metadata serialized to `package.json`
//! - [`PipelineRun`] and [`Stage`]: the orchestrator's working state
//! - [`PackerConfig`]: packager settings loaded from `packer.yaml`
//! - [`LastUsedSettings`]: values restored on the next run
//!
//! The archive layout constants live in [`config`] because the external
//! package host depends on them and they are never user-editable.

pub mod config;
pub mod manifest;
pub mod run_state;

pub use config::{
    ARCHIVE_EXTENSION, LastUsedSettings, MANIFEST_FILE_NAME, PACKAGE_ROOT_FOLDER_NAME,
    PROJECT_DATA_FOLDER_NAME, PackerConfig, WorkflowType, editor_templates_dir,
};
pub use manifest::{ManifestError, PackageManifest, TEMPLATE_KIND};
pub use run_state::{PipelineRun, Stage};
