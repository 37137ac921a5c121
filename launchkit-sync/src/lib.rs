//! # launchkit-sync
//!
//! Build distribution engine for the launcher: keeps an installed game build
//! in step with its published manifest, repairs corrupted installs, and
//! publishes new builds.
//!
//! - [`orchestrator`] decides install / patch / full update and owns the [`Session`]
//! - [`publish`] packages, diffs and uploads a new build
//! - [`integrity`] hashes and sizes trees and compares them with a manifest
//! - [`transfer`] moves artifacts to and from object storage
//! - [`tools`] wraps the external archiver, hasher and differ
//! - [`progress`] streams [`ProgressEvent`]s to a front end

pub mod error;
pub mod installer;
pub mod integrity;
pub mod orchestrator;
pub mod packager;
pub mod patcher;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod scratch;
pub mod tools;
pub mod transfer;

pub use error::SyncError;
pub use integrity::IntegrityReport;
pub use orchestrator::{
    decide, RepairOutcome, Session, StatusReport, SyncAction, SyncOutcome, SyncState,
};
pub use pipeline::{run, Operation, Outcome};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSink, Stage};
pub use publish::{PublishReport, PublishRequest};
pub use tools::{Compressor, DigestRecord, DigestSource, Differ, Toolchain};
pub use transfer::{HttpStore, LocalStore, ObjectStore};
