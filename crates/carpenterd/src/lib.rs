//! Build worker daemon for Carpenter.
//!
//! Wires the local backends into the worker pipeline, serves the
//! healthcheck and drives the job stream until input ends or shutdown is
//! requested.

pub mod health;
pub mod telemetry;
pub mod worker;

pub use worker::{RunSummary, build_pipeline, run};
