//! Pipeline module - sequences the packaging stages.
//!
//! A run moves through
//! `Idle -> Preparing -> WritingManifest -> Replicating -> Filtering -> Archiving`
//! and ends in `Succeeded` or `Failed`. A failed run always removes its
//! workspace before the failure is reported; a successful run keeps it until
//! [`Packager::teardown`].

pub mod packager;

pub use packager::{Packager, PackagingReport, PipelineError};
