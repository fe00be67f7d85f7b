//! Core domain types and traits for the Carpenter build worker.
//!
//! This crate contains:
//! - Job identifiers and the validated job specification
//! - Collaborator traits (blob fetcher, build executor, asset publisher,
//!   head store, status sink)
//! - Status event types and retry policy configuration

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod head;
pub mod id;
pub mod publisher;
pub mod retry;
pub mod spec;
pub mod status;

pub use error::{Error, Result};
pub use id::JobId;
pub use spec::{BuildKind, JobRequest, JobSpec, PackageSpec};
