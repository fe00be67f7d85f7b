//! Bounded-concurrency processing of a job stream.

use crate::pipeline::{JobOutcome, JobPipeline};
use carpenter_core::{Error, JobId, JobRequest, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use tracing::{error, info};

/// Default number of jobs in flight.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// A job that left the pipeline, whatever its outcome.
#[derive(Debug)]
pub struct ProcessedJob {
    pub request: JobRequest,
    pub outcome: Result<JobOutcome>,
}

impl ProcessedJob {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs a [`JobPipeline`] over a stream of requests.
#[derive(Clone)]
pub struct BuildStream {
    pipeline: Arc<JobPipeline>,
    concurrency: usize,
}

impl BuildStream {
    pub fn new(pipeline: Arc<JobPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process `jobs` with at most `concurrency` in flight.
    ///
    /// Every input yields exactly one [`ProcessedJob`], in completion order.
    /// A failed or panicking job never stops the stream. The output ends once
    /// the input has ended and every admitted job has finished.
    pub fn process<S>(&self, jobs: S) -> BoxStream<'static, ProcessedJob>
    where
        S: Stream<Item = JobRequest> + Send + 'static,
    {
        let pipeline = self.pipeline.clone();
        jobs.map(move |request| run_one(pipeline.clone(), request))
            .buffer_unordered(self.concurrency)
            .boxed()
    }
}

async fn run_one(pipeline: Arc<JobPipeline>, request: JobRequest) -> ProcessedJob {
    let id = JobId::new();
    let task_pipeline = pipeline.clone();
    let task_request = request.clone();
    let handle = tokio::spawn(async move { task_pipeline.run_with_id(id, &task_request).await });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(name = ?request.name, job_id = %id, error = %e, "Job task failed");
            let e = Error::Internal(format!("job task failed: {}", e));
            pipeline.abandon(id, &request, &e).await;
            Err(e)
        }
    };

    match &outcome {
        Ok(JobOutcome::Built) => info!(name = ?request.name, version = ?request.version, "Job built"),
        Ok(JobOutcome::Skipped { reason }) => {
            info!(name = ?request.name, version = ?request.version, %reason, "Job skipped")
        }
        Err(e) => error!(name = ?request.name, version = ?request.version, error = %e, "Job failed"),
    }

    ProcessedJob { request, outcome }
}
