//! Build orchestration for the Carpenter worker.
//!
//! Takes job requests from a stream, gates them against the published head,
//! fetches, builds and publishes each with bounded concurrency, reports
//! progress to an optional status sink and reclaims working directories.

pub mod gate;
pub mod paths;
pub mod pipeline;
pub mod purge;
pub mod reporter;
pub mod retry;
pub mod stream;

#[cfg(test)]
mod testing;

pub use gate::{Decision, SkipReason, VersionGate};
pub use paths::{PathAllocator, WorkPaths};
pub use pipeline::{Collaborators, JobOutcome, JobPipeline, PipelineSettings};
pub use purge::{PurgeDaemon, PurgeSummary, PurgeSweeper};
pub use reporter::StatusReporter;
pub use stream::{BuildStream, ProcessedJob};
