//! Blob fetcher reading from a local directory.

use async_trait::async_trait;
use carpenter_core::fetcher::{BlobFetcher, ByteStream};
use carpenter_core::{Error, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Serves `<root>/<container>/<key>`.
///
/// Keys are used as file names as-is, so url-encoded keys map to flat files.
pub struct DirBlobFetcher {
    root: PathBuf,
}

impl DirBlobFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf> {
        for part in [container, key] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(Error::Fetch(format!("invalid object path: {}/{}", container, key)));
            }
        }
        Ok(self.root.join(container).join(key))
    }
}

#[async_trait]
impl BlobFetcher for DirBlobFetcher {
    async fn download(&self, container: &str, key: &str) -> Result<ByteStream> {
        let path = self.object_path(container, key)?;
        debug!(path = %path.display(), "Opening blob");

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Fetch(format!("object not found: {}/{}", container, key))
            } else {
                Error::Fetch(format!("failed to open {}: {}", path.display(), e))
            }
        })?;

        Ok(ReaderStream::new(file).boxed())
    }
}
