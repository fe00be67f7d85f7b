//! Worker assembly and the main job loop.

use crate::health;
use anyhow::Context;
use carpenter_config::WorkerConfig;
use carpenter_core::JobRequest;
use carpenter_core::status::StatusChannel;
use carpenter_local::{CommandExecutor, DirBlobFetcher, DirPublisher, EventLog, FileHeadStore};
use carpenter_worker::{
    BuildStream, Collaborators, JobOutcome, JobPipeline, PathAllocator, PipelineSettings,
    ProcessedJob, PurgeSweeper,
};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counts of processed jobs by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.built + self.skipped + self.failed
    }

    fn record(&mut self, job: &ProcessedJob) {
        match &job.outcome {
            Ok(JobOutcome::Built) => self.built += 1,
            Ok(JobOutcome::Skipped { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Build a pipeline backed by the local filesystem.
pub fn build_pipeline(
    config: &WorkerConfig,
    status: Option<Arc<dyn StatusChannel>>,
) -> JobPipeline {
    let heads = Arc::new(FileHeadStore::new(&config.publish.heads));
    let collaborators = Collaborators {
        fetcher: Arc::new(DirBlobFetcher::new(&config.tarballs.root)),
        executor: Arc::new(CommandExecutor::new(config.builds.clone())),
        publisher: Arc::new(DirPublisher::new(&config.publish.root, heads.clone())),
        heads,
        status,
    };
    let settings = PipelineSettings {
        bucket: config.tarballs.bucket.clone(),
        fetch_retry: config.fetch_retry.clone(),
        build_retry: config.build_retry.clone(),
    };
    JobPipeline::new(collaborators, PathAllocator::new(&config.work_root), settings)
}

/// Process `jobs` until the input ends or `shutdown` is cancelled.
///
/// Cancelling stops admission only: jobs already running finish, then the
/// purge daemon, status log and healthcheck are shut down in that order.
pub async fn run(
    config: WorkerConfig,
    jobs: BoxStream<'static, JobRequest>,
    shutdown: CancellationToken,
) -> anyhow::Result<RunSummary> {
    tokio::fs::create_dir_all(&config.work_root).await?;
    let listener = match &config.http {
        Some(http) => Some(
            health::bind(http.port)
                .await
                .with_context(|| format!("failed to bind healthcheck port {}", http.port))?,
        ),
        None => None,
    };
    info!(
        env = %config.env,
        concurrency = config.concurrency,
        root = %config.work_root.display(),
        "Starting carpenterd worker"
    );

    let purge = if config.purge.enabled {
        let sweeper = PurgeSweeper::new(&config.work_root, config.purge.age)
            .with_interval(config.purge.interval);
        Some(sweeper.spawn(shutdown.clone()))
    } else {
        info!("Purge daemon disabled");
        None
    };

    let services = CancellationToken::new();
    let http = listener.map(|listener| tokio::spawn(health::serve(listener, services.clone())));

    let (status, event_log) = match &config.status {
        Some(status) => {
            let (channel, log) = EventLog::spawn(&status.topic, status.path.clone());
            (Some(Arc::new(channel) as Arc<dyn StatusChannel>), Some(log))
        }
        None => (None, None),
    };

    let summary = {
        let pipeline = Arc::new(build_pipeline(&config, status));
        let stream = BuildStream::new(pipeline, config.concurrency);
        let jobs = jobs.take_until(shutdown.clone().cancelled_owned());
        let mut processed = stream.process(jobs);

        let mut summary = RunSummary::default();
        while let Some(job) = processed.next().await {
            info!(
                name = ?job.request.name,
                version = ?job.request.version,
                env = ?job.request.env,
                success = job.is_success(),
                "job completed"
            );
            summary.record(&job);
        }
        summary
    };

    if shutdown.is_cancelled() {
        info!("Shutdown requested, in-flight jobs drained");
    } else {
        info!("All jobs completed, shutting down");
    }

    if let Some(purge) = purge {
        purge.stop().await;
    }
    if let Some(log) = event_log {
        match log.finish().await {
            Ok(written) => info!(written, "Status log flushed"),
            Err(e) => error!(error = %e, "Status log failed"),
        }
    }
    services.cancel();
    if let Some(http) = http {
        match http.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Healthcheck server failed"),
            Err(e) => warn!(error = %e, "Healthcheck task failed"),
        }
    }

    info!(
        built = summary.built,
        skipped = summary.skipped,
        failed = summary.failed,
        "Worker stopped"
    );
    Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use carpenter_core::BuildKind;
    use carpenter_core::retry::RetryPolicy;
    use carpenter_config::{HttpConfig, StatusConfig, parse_worker_config};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &Path) -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.concurrency = 1;
        config.work_root = dir.join("work");
        config.tarballs.root = dir.join("blobs");
        config.tarballs.bucket = "tarballs".to_string();
        config.publish.root = dir.join("assets");
        config.publish.heads = dir.join("assets/heads.json");
        config.fetch_retry = RetryPolicy::immediate(1);
        config.build_retry = RetryPolicy::immediate(1);
        config.status = Some(StatusConfig {
            topic: "queue-status".to_string(),
            path: Some(dir.join("status.jsonl")),
        });
        config.builds.insert(
            BuildKind::Webpack,
            "printf built > \"$CARPENTER_DEST/index.js\"".to_string(),
        );
        config
    }

    fn seed_tarball(dir: &Path, file: &str) {
        let bucket = dir.join("blobs/tarballs");
        std::fs::create_dir_all(&bucket).unwrap();
        std::fs::write(bucket.join(file), b"tarball").unwrap();
    }

    fn leftover_job_dirs(work: &Path) -> usize {
        std::fs::read_dir(work)
            .unwrap()
            .map(|base| std::fs::read_dir(base.unwrap().path()).unwrap().count())
            .sum()
    }

    #[tokio::test]
    async fn test_end_to_end_run() {
        let dir = TempDir::new().unwrap();
        seed_tarball(dir.path(), "test-1.0.0.tgz");
        let jobs = vec![
            JobRequest::new("test", "1.0.0", "dev"),
            JobRequest::new("test", "1.0.0", "dev"),
            JobRequest::new("test", "one", "dev"),
            JobRequest::new("missing", "1.0.0", "dev"),
        ];

        let summary = run(
            config(dir.path()),
            futures::stream::iter(jobs).boxed(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                built: 1,
                skipped: 1,
                failed: 2
            }
        );
        assert_eq!(summary.processed(), 4);

        let published = dir.path().join("assets/test/dev/1.0.0/index.js");
        assert_eq!(std::fs::read_to_string(published).unwrap(), "built");
        let heads = std::fs::read_to_string(dir.path().join("assets/heads.json")).unwrap();
        assert!(heads.contains("\"1.0.0\""));
        assert_eq!(leftover_job_dirs(&dir.path().join("work")), 0);

        let log = std::fs::read_to_string(dir.path().join("status.jsonl")).unwrap();
        let messages: Vec<String> = log
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages[0], "Fetched tarball");
        assert_eq!(messages[4], "carpenterd-worker build completed");
        assert_eq!(messages[5], "Skipped build: equal versions");
        assert_eq!(messages[6], "Invalid version specified");
        assert!(messages[7].contains("object not found"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_admission() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run(
                config(dir.path()),
                futures::stream::pending().boxed(),
                shutdown,
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.processed(), 0);
    }

    #[tokio::test]
    async fn test_runs_from_kdl_config() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display();
        let kdl = format!(
            r#"
            worker {{
                env "development"
                concurrency 2
                root "{root}/work"
            }}
            tarballs bucket="tarballs" root="{root}/blobs"
            publish root="{root}/assets"
            build "webpack" command="printf kdl > \"$CARPENTER_DEST/main.js\""
            "#
        );
        let config = parse_worker_config(&kdl).unwrap();
        assert!(!config.purge.enabled);
        seed_tarball(dir.path(), "test-2.0.0.tgz");

        let summary = run(
            config,
            futures::stream::iter(vec![JobRequest::new("test", "2.0.0", "dev")]).boxed(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.built, 1);
        assert!(dir.path().join("assets/test/dev/2.0.0/main.js").exists());
    }

    #[tokio::test]
    async fn test_occupied_healthcheck_port_fails_startup() {
        let dir = TempDir::new().unwrap();
        seed_tarball(dir.path(), "test-1.0.0.tgz");
        let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let mut config = config(dir.path());
        config.http = Some(HttpConfig {
            port: held.local_addr().unwrap().port(),
        });

        let err = run(
            config,
            futures::stream::iter(vec![JobRequest::new("test", "1.0.0", "dev")]).boxed(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("failed to bind healthcheck port"));
        assert!(!dir.path().join("assets/test").exists());
        assert!(!dir.path().join("status.jsonl").exists());
    }
}
