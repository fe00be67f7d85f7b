//! Asset publisher writing into a local directory tree.

use crate::heads::FileHeadStore;
use async_trait::async_trait;
use carpenter_core::executor::ArtifactRef;
use carpenter_core::head::BuildHead;
use carpenter_core::publisher::{AssetPublisher, PublishOptions, path_segment};
use carpenter_core::{Error, PackageSpec, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MANIFEST: &str = "manifest.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    #[serde(flatten)]
    package: &'a PackageSpec,
    published_at: String,
    files: Vec<ManifestFile<'a>>,
    metadata: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ManifestFile<'a> {
    name: &'a str,
    size: u64,
}

/// Copies artifacts to `<root>/<name>/<env>/<version>[/<locale>]`.
///
/// A `manifest.json` describing the build is written next to them, and
/// promoted builds move the head in the shared [`FileHeadStore`].
pub struct DirPublisher {
    root: PathBuf,
    heads: Arc<FileHeadStore>,
}

impl DirPublisher {
    pub fn new(root: impl Into<PathBuf>, heads: Arc<FileHeadStore>) -> Self {
        Self {
            root: root.into(),
            heads,
        }
    }

    /// Directory holding the assets of `package`.
    pub fn package_dir(&self, package: &PackageSpec) -> PathBuf {
        let mut dir = self
            .root
            .join(path_segment(&package.name))
            .join(path_segment(&package.env))
            .join(path_segment(&package.version.to_string()));
        if let Some(locale) = &package.locale {
            dir = dir.join(path_segment(locale));
        }
        dir
    }
}

#[async_trait]
impl AssetPublisher for DirPublisher {
    async fn publish(&self, package: &PackageSpec, options: PublishOptions) -> Result<()> {
        let dir = self.package_dir(package);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Publish(format!("failed to create {}: {}", dir.display(), e)))?;

        for artifact in &options.output.artifacts {
            copy_artifact(artifact, &dir).await?;
        }

        let manifest = Manifest {
            package,
            published_at: Utc::now().to_rfc3339(),
            files: options
                .output
                .artifacts
                .iter()
                .map(|a| ManifestFile {
                    name: &a.name,
                    size: a.size,
                })
                .collect(),
            metadata: &options.output.metadata,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::Publish(format!("failed to encode manifest: {}", e)))?;
        tokio::fs::write(dir.join(MANIFEST), json)
            .await
            .map_err(|e| Error::Publish(format!("failed to write manifest: {}", e)))?;

        info!(
            key = %self.canonical_key(package),
            files = options.output.artifacts.len(),
            "Published assets"
        );

        if options.promote {
            let mut head = BuildHead::new(&package.name, &package.env, package.version.to_string());
            head.updated_at = Some(Utc::now());
            self.heads
                .promote(head)
                .await
                .map_err(|e| Error::Publish(format!("failed to promote head: {}", e)))?;
        }
        Ok(())
    }
}

async fn copy_artifact(artifact: &ArtifactRef, dir: &Path) -> Result<()> {
    let relative = Path::new(&artifact.name);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Publish(format!("invalid artifact name: {}", artifact.name)));
    }

    let dest = dir.join(relative);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&artifact.path, &dest)
        .await
        .map_err(|e| Error::Publish(format!("failed to copy {}: {}", artifact.name, e)))?;
    debug!(artifact = %artifact.name, "Copied artifact");
    Ok(())
}
