//! Head store backed by a JSON file.

use async_trait::async_trait;
use carpenter_core::head::{BuildHead, HeadStore};
use carpenter_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Keeps every head in one JSON array.
///
/// Writers in this process are serialised. Updates replace the file through a
/// rename so readers never see a partial write.
pub struct FileHeadStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHeadStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All heads. A missing file holds none.
    pub async fn list(&self) -> Result<Vec<BuildHead>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("failed to read {}: {}", self.path.display(), e))),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data)
            .map_err(|e| Error::Store(format!("invalid head file {}: {}", self.path.display(), e)))
    }

    /// Insert or replace the head for `{name, env}`.
    pub async fn promote(&self, head: BuildHead) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut heads = self.list().await?;
        match heads
            .iter_mut()
            .find(|h| h.name == head.name && h.env == head.env)
        {
            Some(existing) => *existing = head.clone(),
            None => heads.push(head.clone()),
        }

        let json = serde_json::to_vec_pretty(&heads)
            .map_err(|e| Error::Store(format!("failed to encode heads: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(name = %head.name, env = %head.env, version = %head.version, "Promoted head");
        Ok(())
    }
}

#[async_trait]
impl HeadStore for FileHeadStore {
    async fn find_head(&self, name: &str, env: &str) -> Result<Option<BuildHead>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|h| h.name == name && h.env == env))
    }
}
