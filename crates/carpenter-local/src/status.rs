//! Status channel appending events to a JSON-lines log.
//!
//! Sinks hand events to a single writer task over an unbounded channel, so
//! writing never waits on disk and events from one job stay in order.

use async_trait::async_trait;
use carpenter_core::status::{StatusChannel, StatusEvent, StatusSink};
use carpenter_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One line of the status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub topic: String,
    #[serde(flatten)]
    pub event: StatusEvent,
}

/// Hands out sinks feeding one [`EventLog`].
#[derive(Clone)]
pub struct ChannelStatus {
    topic: String,
    tx: mpsc::UnboundedSender<StatusRecord>,
}

impl StatusChannel for ChannelStatus {
    fn open(&self) -> Box<dyn StatusSink> {
        Box::new(ChannelSink {
            topic: self.topic.clone(),
            tx: self.tx.clone(),
            ended: false,
        })
    }
}

/// One job's event stream.
pub struct ChannelSink {
    topic: String,
    tx: mpsc::UnboundedSender<StatusRecord>,
    ended: bool,
}

impl ChannelSink {
    fn send(&self, event: StatusEvent) -> Result<()> {
        if self.ended {
            return Err(Error::Status("stream already ended".to_string()));
        }
        self.tx
            .send(StatusRecord {
                topic: self.topic.clone(),
                event,
            })
            .map_err(|_| Error::Status("status log closed".to_string()))
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn write(&mut self, event: StatusEvent) -> Result<()> {
        self.send(event)
    }

    async fn end(&mut self, event: StatusEvent) -> Result<()> {
        let result = self.send(event);
        self.ended = true;
        result
    }

    fn is_ended(&self) -> bool {
        self.ended
    }
}

/// Background writer owning the log file.
pub struct EventLog {
    handle: JoinHandle<Result<usize>>,
}

impl EventLog {
    /// Start the writer.
    ///
    /// Events are appended to `path`, or only traced when `path` is `None`.
    /// The writer stops once every [`ChannelStatus`] and sink is dropped.
    pub fn spawn(topic: impl Into<String>, path: Option<PathBuf>) -> (ChannelStatus, EventLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_log(rx, path));
        (
            ChannelStatus {
                topic: topic.into(),
                tx,
            },
            EventLog { handle },
        )
    }

    /// Wait for every queued event to be written. Returns how many were.
    pub async fn finish(self) -> Result<usize> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("status log task failed: {}", e)))?
    }
}

async fn write_log(
    mut rx: mpsc::UnboundedReceiver<StatusRecord>,
    path: Option<PathBuf>,
) -> Result<usize> {
    let mut file = match &path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            Some(file)
        }
        None => None,
    };

    let mut written = 0;
    while let Some(record) = rx.recv().await {
        let event = &record.event;
        info!(
            topic = %record.topic,
            event_type = ?event.event_type,
            name = event.name.as_deref().unwrap_or_default(),
            version = event.version.as_deref().unwrap_or_default(),
            timing = event.timing,
            "{}",
            event.message
        );

        if let Some(file) = file.as_mut() {
            let mut line = serde_json::to_vec(&record)
                .map_err(|e| Error::Status(format!("failed to encode event: {}", e)))?;
            line.push(b'\n');
            file.write_all(&line).await?;
        }
        written += 1;
    }

    if let Some(file) = file.as_mut() {
        file.flush().await?;
    }
    debug!(written, "Status log closed");
    Ok(written)
}
