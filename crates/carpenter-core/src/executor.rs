//! Build executor trait and build types.
//!
//! The executor is whatever actually bundles a package; the worker only
//! hands it directories and waits for a result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{BuildKind, JobId, Result};

/// Options for a single build invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Job this build belongs to.
    pub id: JobId,
    /// Package name.
    pub name: String,
    /// Directory to unpack sources into.
    pub source: PathBuf,
    /// Directory the build runs in.
    pub target: PathBuf,
    /// Directory the build writes publishable files to.
    pub dest_dir: PathBuf,
    /// Path of the downloaded source tarball.
    pub content: PathBuf,
    /// Short environment name (dev, test, prod).
    pub env: String,
    pub locale: Option<String>,
    /// Wipe previous output before building. Always set so retries start clean.
    pub clean: bool,
    /// Extra process environment for the build tool.
    pub env_vars: HashMap<String, String>,
}

/// A file produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the build's destination directory.
    pub name: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    pub size: u64,
}

/// Result of a completed build. Opaque to the worker, it is handed to the
/// publisher unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    pub artifacts: Vec<ArtifactRef>,
    /// Executor-specific metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Trait for build executors.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run one build. Failures should be [`crate::Error::Build`] carrying the
    /// tool output.
    async fn run(&self, kind: BuildKind, options: BuildOptions) -> Result<BuildOutput>;
}
