// Template Packer - package a project working tree into a project-template archive
//
// This is the library crate containing the packaging pipeline and its stages.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{PackageManifest, PackerConfig, Stage, WorkflowType};
pub use pipeline::{Packager, PackagingReport, PipelineError};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
