//! Per-job pipeline: validate, gate, prepare, fetch, build, publish, clean up.

use crate::gate::{Decision, SkipReason, VersionGate};
use crate::paths::{PathAllocator, WorkPaths};
use crate::reporter::StatusReporter;
use crate::retry;
use carpenter_core::executor::{BuildExecutor, BuildOptions, BuildOutput};
use carpenter_core::fetcher::BlobFetcher;
use carpenter_core::head::HeadStore;
use carpenter_core::publisher::{AssetPublisher, PublishOptions};
use carpenter_core::retry::RetryPolicy;
use carpenter_core::status::{JobFields, StatusChannel, StatusInfo};
use carpenter_core::{Error, JobId, JobRequest, JobSpec, PackageSpec, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Timer spanning the whole job.
pub const TOTAL_TIMER: &str = "total";
/// Timer spanning every fetch attempt.
pub const TARBALL_TIMER: &str = "tarball";
/// Timer spanning every build attempt.
pub const BUILD_TIMER: &str = "build";

pub const COMPLETE_MESSAGE: &str = "carpenterd-worker build completed";

/// Where a job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Validating,
    Gating,
    Preparing,
    Fetching,
    Building,
    Publishing,
    CleaningUp,
    Done,
}

/// How a job that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Built and published.
    Built,
    /// Nothing to do.
    Skipped { reason: SkipReason },
}

/// External services a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn BlobFetcher>,
    pub executor: Arc<dyn BuildExecutor>,
    pub publisher: Arc<dyn AssetPublisher>,
    pub heads: Arc<dyn HeadStore>,
    /// Status transport. No events are emitted when unset.
    pub status: Option<Arc<dyn StatusChannel>>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Container holding source tarballs.
    pub bucket: String,
    pub fetch_retry: RetryPolicy,
    pub build_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "wrhs-tarballs".to_string(),
            fetch_retry: RetryPolicy::default(),
            build_retry: RetryPolicy::default(),
        }
    }
}

/// State of one job once it is past validation and gating.
struct JobContext {
    id: JobId,
    spec: JobSpec,
    paths: WorkPaths,
}

/// Runs build jobs one step at a time.
pub struct JobPipeline {
    fetcher: Arc<dyn BlobFetcher>,
    executor: Arc<dyn BuildExecutor>,
    publisher: Arc<dyn AssetPublisher>,
    gate: VersionGate,
    status: Option<Arc<dyn StatusChannel>>,
    paths: PathAllocator,
    settings: PipelineSettings,
}

impl JobPipeline {
    pub fn new(collaborators: Collaborators, paths: PathAllocator, settings: PipelineSettings) -> Self {
        Self {
            fetcher: collaborators.fetcher,
            executor: collaborators.executor,
            publisher: collaborators.publisher,
            gate: VersionGate::new(collaborators.heads),
            status: collaborators.status,
            paths,
            settings,
        }
    }

    pub fn paths(&self) -> &PathAllocator {
        &self.paths
    }

    /// Run one job to completion.
    ///
    /// Skips resolve successfully. Errors are returned only after the
    /// working directory has been removed and the failure reported.
    pub async fn run(&self, request: &JobRequest) -> Result<JobOutcome> {
        self.run_with_id(JobId::new(), request).await
    }

    /// Run one job under a caller-chosen id.
    pub async fn run_with_id(&self, id: JobId, request: &JobRequest) -> Result<JobOutcome> {
        let span = info_span!(
            "job",
            job_id = %id,
            name = request.name.as_deref().unwrap_or_default(),
            version = request.version.as_deref().unwrap_or_default(),
            env = request.env.as_deref().unwrap_or_default(),
        );
        self.run_job(id, request).instrument(span).await
    }

    /// Settle a job whose task died before reaching a terminal state.
    ///
    /// Removes the working directory allocated for `id` and ends a fresh
    /// status stream with `error`.
    pub async fn abandon(&self, id: JobId, request: &JobRequest, error: &Error) {
        if let Ok(spec) = request.validate() {
            let paths = self.paths.allocate(&spec, id, self.publisher.as_ref());
            cleanup(&paths.root).await;
        }
        let sink = self.status.as_ref().map(|channel| channel.open());
        let mut reporter = StatusReporter::new(JobFields::from(request), sink);
        reporter.end(None, StatusInfo::error(error)).await;
    }

    async fn run_job(&self, id: JobId, request: &JobRequest) -> Result<JobOutcome> {
        info!(locale = ?request.locale, build_type = ?request.build_type, "Received job");
        let sink = self.status.as_ref().map(|channel| channel.open());
        let mut reporter = StatusReporter::new(JobFields::from(request), sink);
        reporter.timer_start(TOTAL_TIMER, None).await;

        debug!(stage = ?JobStage::Validating);
        let spec = match request.validate() {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Rejected job");
                reporter.end(None, StatusInfo::error(&e)).await;
                return Err(e);
            }
        };

        debug!(stage = ?JobStage::Gating);
        if let Decision::Skip(reason) = self.gate.check(&spec).await {
            info!(%reason, "Skipping build");
            reporter
                .end(
                    Some(TOTAL_TIMER),
                    StatusInfo::complete(format!("Skipped build: {}", reason)),
                )
                .await;
            return Ok(JobOutcome::Skipped { reason });
        }

        debug!(stage = ?JobStage::Preparing);
        let paths = self.paths.allocate(&spec, id, self.publisher.as_ref());
        if let Err(e) = tokio::fs::create_dir_all(&paths.publish_dir).await {
            let e = Error::from(e);
            error!(path = %paths.publish_dir.display(), error = %e, "Failed to create working directory");
            reporter.end(None, StatusInfo::error(&e)).await;
            return Err(e);
        }

        let ctx = JobContext { id, spec, paths };
        let result = self.execute(&ctx, &mut reporter).await;

        debug!(stage = ?JobStage::CleaningUp);
        cleanup(&ctx.paths.root).await;

        debug!(stage = ?JobStage::Done);
        match result {
            Ok(()) => {
                reporter
                    .end(Some(TOTAL_TIMER), StatusInfo::complete(COMPLETE_MESSAGE))
                    .await;
                Ok(JobOutcome::Built)
            }
            Err(e) => {
                error!(error = %e, "Build failed");
                reporter.end(None, StatusInfo::error(&e)).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, ctx: &JobContext, reporter: &mut StatusReporter) -> Result<()> {
        let started = Instant::now();
        let package = ctx.spec.package();

        debug!(stage = ?JobStage::Fetching);
        self.fetch(ctx, &package, reporter).await?;

        debug!(stage = ?JobStage::Building);
        let output = self.build(ctx, reporter).await?;

        debug!(stage = ?JobStage::Publishing);
        self.publish(ctx, &package, output, reporter).await?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Total execution time"
        );
        Ok(())
    }

    async fn fetch(
        &self,
        ctx: &JobContext,
        package: &PackageSpec,
        reporter: &mut StatusReporter,
    ) -> Result<()> {
        let key = tarball_key(package);
        info!(bucket = %self.settings.bucket, key = %key, "Fetch tarball");

        reporter.timer_start(TARBALL_TIMER, None).await;
        let started = Instant::now();
        let key = key.as_str();
        let dest = ctx.paths.tarball.as_path();
        retry::attempt(&self.settings.fetch_retry, "fetch", move || {
            self.download(key, dest)
        })
        .await?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch tarball finish"
        );
        reporter
            .write(Some(TARBALL_TIMER), StatusInfo::event("Fetched tarball"))
            .await;
        Ok(())
    }

    /// One download attempt. Truncates whatever a previous attempt left.
    async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let mut stream = self.fetcher.download(&self.settings.bucket, key).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn build(&self, ctx: &JobContext, reporter: &mut StatusReporter) -> Result<BuildOutput> {
        let kind = ctx.spec.build_kind;
        reporter
            .timer_start(
                BUILD_TIMER,
                Some(StatusInfo::event(format!("{} build start", kind))),
            )
            .await;

        let started = Instant::now();
        let options = build_options(ctx);
        let executor = self.executor.as_ref();
        let output = retry::attempt(&self.settings.build_retry, "build", move || {
            executor.run(kind, options.clone())
        })
        .await?;

        info!(
            executor = executor.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            artifacts = output.artifacts.len(),
            "{} build",
            kind
        );
        reporter
            .write(
                Some(BUILD_TIMER),
                StatusInfo::event(format!("{} build completed", kind)),
            )
            .await;
        Ok(output)
    }

    async fn publish(
        &self,
        ctx: &JobContext,
        package: &PackageSpec,
        output: BuildOutput,
        reporter: &mut StatusReporter,
    ) -> Result<()> {
        info!(promote = ctx.spec.promote, "Publish assets");
        let started = Instant::now();
        let options = PublishOptions {
            promote: ctx.spec.promote,
            output,
        };
        self.publisher.publish(package, options).await?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Publish assets time"
        );
        reporter
            .write(None, StatusInfo::event("Assets published"))
            .await;
        Ok(())
    }
}

/// Object key of a package's source tarball.
pub fn tarball_key(package: &PackageSpec) -> String {
    format!(
        "{}-{}.tgz",
        urlencoding::encode(&package.name),
        package.version
    )
}

/// Long environment name the build tool expects.
pub fn long_env(env: &str) -> &str {
    match env {
        "dev" => "development",
        "test" => "test",
        "prod" => "production",
        other => other,
    }
}

fn build_options(ctx: &JobContext) -> BuildOptions {
    let spec = &ctx.spec;
    let mut env_vars = HashMap::new();
    env_vars.insert("NODE_ENV".to_string(), long_env(&spec.env).to_string());
    if let Some(locale) = &spec.locale {
        env_vars.insert("LOCALE".to_string(), locale.clone());
        env_vars.insert("WRHS_LOCALE".to_string(), locale.clone());
    }

    BuildOptions {
        id: ctx.id,
        name: spec.name.clone(),
        source: ctx.paths.root.clone(),
        target: ctx.paths.root.clone(),
        dest_dir: ctx.paths.publish_dir.clone(),
        content: ctx.paths.tarball.clone(),
        env: spec.env.clone(),
        locale: spec.locale.clone(),
        clean: true,
        env_vars,
    }
}

/// Remove a job's working directory. Failures are only logged.
async fn cleanup(root: &Path) {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => debug!(path = %root.display(), "Removed working directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %root.display(), error = %e, "Failed to remove working directory")
        }
    }
}
