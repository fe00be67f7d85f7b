//! Worker configuration parsing.

use crate::{ConfigError, ConfigResult};
use carpenter_core::BuildKind;
use carpenter_core::retry::RetryPolicy;
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENV: &str = "development";
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_PURGE_AGE: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_BUCKET: &str = "wrhs-tarballs";

/// Complete worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deployment environment of the worker itself.
    pub env: String,
    /// Maximum number of jobs in flight.
    pub concurrency: usize,
    /// Shared root for per-job working directories.
    pub work_root: PathBuf,
    pub tarballs: TarballConfig,
    pub fetch_retry: RetryPolicy,
    pub build_retry: RetryPolicy,
    pub purge: PurgeConfig,
    pub status: Option<StatusConfig>,
    pub http: Option<HttpConfig>,
    pub publish: PublishConfig,
    /// Shell command per build kind, used by the local executor.
    pub builds: HashMap<BuildKind, String>,
    /// JSON-lines file to read jobs from. Stdin when unset.
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarballConfig {
    /// Container the source tarballs live in.
    pub bucket: String,
    /// Local directory holding one subdirectory per container.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Entries older than this are removed.
    pub age: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub topic: String,
    /// File the status event log is appended to. Events are only logged
    /// when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub root: PathBuf,
    /// JSON file holding build heads.
    pub heads: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            env: DEFAULT_ENV.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            work_root: tmp.join("carpenterd-worker"),
            tarballs: TarballConfig {
                bucket: DEFAULT_BUCKET.to_string(),
                root: tmp.join("tarballs"),
            },
            fetch_retry: RetryPolicy::default(),
            build_retry: RetryPolicy::default(),
            purge: PurgeConfig {
                enabled: false,
                interval: DEFAULT_PURGE_INTERVAL,
                age: DEFAULT_PURGE_AGE,
            },
            status: None,
            http: None,
            publish: PublishConfig {
                root: tmp.join("carpenter-assets"),
                heads: tmp.join("carpenter-assets").join("heads.json"),
            },
            builds: HashMap::new(),
            source: None,
        }
    }
}

impl WorkerConfig {
    pub fn is_development(&self) -> bool {
        self.env == DEFAULT_ENV
    }
}

/// Read and parse a worker configuration file.
pub fn load_worker_config(path: &Path) -> ConfigResult<WorkerConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_worker_config(&text)
}

/// Parse a worker configuration from KDL text.
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = WorkerConfig::default();
    let mut purge_enabled = None;
    let mut seen_retry = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "worker" => parse_worker(node, &mut config)?,
            "tarballs" => {
                if let Some(bucket) = get_string_prop(node, "bucket") {
                    config.tarballs.bucket = bucket;
                }
                if let Some(root) = get_string_prop(node, "root") {
                    config.tarballs.root = PathBuf::from(root);
                }
            }
            "retry" => {
                let step = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("retry step".to_string()))?;
                if seen_retry.contains(&step) {
                    return Err(ConfigError::Duplicate(format!("retry \"{}\"", step)));
                }
                let policy = parse_retry(node)?;
                match step.as_str() {
                    "fetch" => config.fetch_retry = policy,
                    "build" => config.build_retry = policy,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            field: "retry step".to_string(),
                            message: format!("unknown step: {}", step),
                        });
                    }
                }
                seen_retry.push(step);
            }
            "purge" => {
                purge_enabled = get_bool_prop(node, "enabled");
                if let Some(interval) = get_duration_prop(node, "interval")? {
                    config.purge.interval = interval;
                }
                if let Some(age) = get_duration_prop(node, "age")? {
                    config.purge.age = age;
                }
            }
            "status" => {
                let topic = get_string_prop(node, "topic")
                    .ok_or_else(|| ConfigError::MissingField("status topic".to_string()))?;
                config.status = Some(StatusConfig {
                    topic,
                    path: get_string_prop(node, "path").map(PathBuf::from),
                });
            }
            "http" => {
                let port = get_integer_prop(node, "port")
                    .ok_or_else(|| ConfigError::MissingField("http port".to_string()))?;
                let port = u16::try_from(port).map_err(|_| ConfigError::InvalidValue {
                    field: "http port".to_string(),
                    message: format!("{} is not a valid port", port),
                })?;
                config.http = Some(HttpConfig { port });
            }
            "publish" => {
                if let Some(root) = get_string_prop(node, "root") {
                    config.publish.heads = PathBuf::from(&root).join("heads.json");
                    config.publish.root = PathBuf::from(root);
                }
                if let Some(heads) = get_string_prop(node, "heads") {
                    config.publish.heads = PathBuf::from(heads);
                }
            }
            "build" => {
                let kind: BuildKind = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("build kind".to_string()))?
                    .parse()
                    .map_err(|e: carpenter_core::Error| ConfigError::InvalidValue {
                        field: "build kind".to_string(),
                        message: e.to_string(),
                    })?;
                let command = get_string_prop(node, "command").ok_or_else(|| {
                    ConfigError::MissingField(format!("command for build '{}'", kind))
                })?;
                config.builds.insert(kind, command);
            }
            "source" => {
                config.source = get_string_prop(node, "path")
                    .filter(|p| p != "-")
                    .map(PathBuf::from);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    // Purging is off in development unless asked for.
    config.purge.enabled = purge_enabled.unwrap_or(!config.is_development());

    Ok(config)
}

fn parse_worker(node: &KdlNode, config: &mut WorkerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "env" => {
                config.env = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("worker env".to_string()))?;
            }
            "concurrency" => {
                let value = get_first_integer_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("worker concurrency".to_string()))?;
                config.concurrency = usize::try_from(value)
                    .ok()
                    .filter(|c| *c > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "worker concurrency".to_string(),
                        message: format!("{} must be a positive integer", value),
                    })?;
            }
            "root" => {
                let root = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("worker root".to_string()))?;
                config.work_root = PathBuf::from(root);
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse_retry(node: &KdlNode) -> ConfigResult<RetryPolicy> {
    let mut policy = RetryPolicy::default();

    if let Some(attempts) = get_integer_prop(node, "attempts") {
        policy.attempts = u32::try_from(attempts)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "retry attempts".to_string(),
                message: format!("{} must be a positive integer", attempts),
            })?;
    }
    if let Some(delay) = get_duration_prop(node, "min-delay")? {
        policy.min_delay = delay;
    }
    if let Some(delay) = get_duration_prop(node, "max-delay")? {
        policy.max_delay = delay;
    }
    if let Some(factor) = node.get("factor").and_then(value_as_f64) {
        if factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry factor".to_string(),
                message: format!("{} must be at least 1", factor),
            });
        }
        policy.factor = factor;
    }

    Ok(policy)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_integer_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_duration_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<Duration>> {
    let Some(raw) = get_string_prop(node, name) else {
        return Ok(None);
    };
    humantime::parse_duration(&raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            field: name.to_string(),
            message: e.to_string(),
        })
}

fn value_as_f64(value: &KdlValue) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = parse_worker_config("").unwrap();
        assert_eq!(config.env, "development");
        assert_eq!(config.concurrency, 2);
        assert!(!config.purge.enabled);
        assert_eq!(config.purge.age, Duration::from_secs(4 * 60 * 60));
        assert!(config.status.is_none());
        assert!(config.http.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            worker {
                env "production"
                concurrency 4
                root "/var/tmp/carpenterd-worker"
            }

            tarballs bucket="npm-tars" root="/srv/blobs"
            retry "fetch" attempts=5 min-delay="250ms" max-delay="5s" factor=3
            retry "build" attempts=2
            purge interval="30m" age="2h"
            status topic="build-status" path="/var/log/status.jsonl"
            http port=8080
            publish root="/srv/assets"
            build "webpack" command="npx webpack"
            source path="/var/spool/jobs.jsonl"
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert_eq!(config.env, "production");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.work_root, PathBuf::from("/var/tmp/carpenterd-worker"));
        assert_eq!(config.tarballs.bucket, "npm-tars");
        assert_eq!(config.fetch_retry.attempts, 5);
        assert_eq!(config.fetch_retry.min_delay, Duration::from_millis(250));
        assert_eq!(config.fetch_retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.fetch_retry.factor, 3.0);
        assert_eq!(config.build_retry.attempts, 2);
        assert!(config.purge.enabled);
        assert_eq!(config.purge.interval, Duration::from_secs(30 * 60));
        assert_eq!(config.purge.age, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.status.as_ref().unwrap().topic, "build-status");
        assert_eq!(config.http.as_ref().unwrap().port, 8080);
        assert_eq!(config.publish.heads, PathBuf::from("/srv/assets/heads.json"));
        assert_eq!(
            config.builds.get(&BuildKind::Webpack).map(String::as_str),
            Some("npx webpack")
        );
        assert_eq!(config.source, Some(PathBuf::from("/var/spool/jobs.jsonl")));
    }

    #[test]
    fn test_unknown_retry_step() {
        let result = parse_worker_config(r#"retry "publish" attempts=2"#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_duplicate_retry_step() {
        let kdl = r#"
            retry "fetch" attempts=2
            retry "fetch" attempts=3
        "#;
        assert!(matches!(
            parse_worker_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_invalid_duration() {
        let result = parse_worker_config(r#"purge age="forever""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let kdl = r#"
            worker {
                concurrency 0
            }
        "#;
        assert!(parse_worker_config(kdl).is_err());
    }

    #[test]
    fn test_status_requires_topic() {
        let result = parse_worker_config(r#"status path="/tmp/x""#);
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_stdin_source() {
        let config = parse_worker_config(r#"source path="-""#).unwrap();
        assert!(config.source.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carpenter.kdl");
        std::fs::write(&path, "http port=9000\n").unwrap();

        let config = load_worker_config(&path).unwrap();
        assert_eq!(config.http.unwrap().port, 9000);

        let missing = load_worker_config(&dir.path().join("nope.kdl"));
        assert!(matches!(missing.unwrap_err(), ConfigError::Io(_)));
    }
}
