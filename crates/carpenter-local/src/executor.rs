//! Build executor running a shell command per build kind.

use async_trait::async_trait;
use carpenter_core::executor::{ArtifactRef, BuildExecutor, BuildOptions, BuildOutput};
use carpenter_core::{BuildKind, Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs `sh -c <command>` inside the job's target directory.
///
/// The command sees the job through `CARPENTER_*` variables plus the
/// build's own environment (`NODE_ENV`, `LOCALE`, ...). Whatever it leaves in
/// `CARPENTER_DEST` becomes the build output.
pub struct CommandExecutor {
    commands: HashMap<BuildKind, String>,
}

impl CommandExecutor {
    pub fn new(commands: HashMap<BuildKind, String>) -> Self {
        Self { commands }
    }

    pub fn with_command(mut self, kind: BuildKind, command: impl Into<String>) -> Self {
        self.commands.insert(kind, command.into());
        self
    }

    fn command_for(&self, kind: BuildKind) -> Result<&str> {
        self.commands
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| Error::Build {
                message: format!("no command configured for {} builds", kind),
                output: None,
            })
    }
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn run(&self, kind: BuildKind, options: BuildOptions) -> Result<BuildOutput> {
        let script = self.command_for(kind)?;

        if options.clean {
            match tokio::fs::remove_dir_all(&options.dest_dir).await {
                Ok(()) => debug!(path = %options.dest_dir.display(), "Cleaned output directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tokio::fs::create_dir_all(&options.dest_dir).await?;
        tokio::fs::create_dir_all(&options.target).await?;

        info!(kind = %kind, name = %options.name, "Running build command");
        let start = Instant::now();
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(&options.target)
            .envs(&options.env_vars)
            .env("CARPENTER_JOB_ID", options.id.to_string())
            .env("CARPENTER_NAME", &options.name)
            .env("CARPENTER_ENV", &options.env)
            .env("CARPENTER_LOCALE", options.locale.as_deref().unwrap_or_default())
            .env("CARPENTER_SOURCE", &options.source)
            .env("CARPENTER_TARGET", &options.target)
            .env("CARPENTER_DEST", &options.dest_dir)
            .env("CARPENTER_CONTENT", &options.content)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Build {
                message: format!("failed to start {} build: {}", kind, e),
                output: None,
            })?;

        let output = child.wait_with_output().await?;
        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            warn!(kind = %kind, status = %output.status, duration_ms, "Build command failed");
            let details = if stderr.is_empty() { stdout } else { stderr };
            return Err(Error::Build {
                message: format!("{} build exited with {}", kind, output.status),
                output: (!details.is_empty()).then_some(details),
            });
        }

        let artifacts = collect_artifacts(&options.dest_dir).await?;
        debug!(kind = %kind, duration_ms, artifacts = artifacts.len(), "Build command finished");

        let mut metadata = serde_json::Map::new();
        metadata.insert("executor".to_string(), self.name().into());
        metadata.insert("kind".to_string(), kind.as_str().into());
        metadata.insert("durationMs".to_string(), duration_ms.into());
        if !stdout.is_empty() {
            metadata.insert("stdout".to_string(), stdout.into());
        }

        Ok(BuildOutput {
            artifacts,
            metadata,
        })
    }
}

/// Every regular file under `dir`, named relative to it, sorted by name.
async fn collect_artifacts(dir: &Path) -> Result<Vec<ArtifactRef>> {
    let mut artifacts = Vec::new();
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let size = entry.metadata().await?.len();
                let name = path
                    .strip_prefix(dir)
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                artifacts.push(ArtifactRef { name, path, size });
            }
        }
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}
