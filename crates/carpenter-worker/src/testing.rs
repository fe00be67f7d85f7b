//! Mock collaborators shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use carpenter_core::executor::{BuildExecutor, BuildOptions, BuildOutput};
use carpenter_core::fetcher::{BlobFetcher, ByteStream};
use carpenter_core::head::{BuildHead, HeadStore};
use carpenter_core::publisher::{AssetPublisher, PublishOptions};
use carpenter_core::status::{StatusChannel, StatusEvent, StatusSink};
use carpenter_core::{BuildKind, Error, PackageSpec, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Write,
    End,
}

/// Status channel whose sinks all record into one shared log.
#[derive(Default, Clone)]
pub struct RecordingChannel {
    pub events: Arc<Mutex<Vec<(SinkCall, StatusEvent)>>>,
    pub opened: Arc<AtomicU32>,
}

impl RecordingChannel {
    pub fn events(&self) -> Vec<(SinkCall, StatusEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(_, event)| event.message)
            .collect()
    }
}

impl StatusChannel for RecordingChannel {
    fn open(&self) -> Box<dyn StatusSink> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingSink {
            events: self.events.clone(),
            ended: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<(SinkCall, StatusEvent)>>>,
    pub ended: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn write(&mut self, event: StatusEvent) -> Result<()> {
        self.events.lock().unwrap().push((SinkCall::Write, event));
        Ok(())
    }

    async fn end(&mut self, event: StatusEvent) -> Result<()> {
        self.events.lock().unwrap().push((SinkCall::End, event));
        self.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

/// Head store returning a fixed answer.
pub struct MockHeads {
    pub head: Option<BuildHead>,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl MockHeads {
    pub fn empty() -> Self {
        Self {
            head: None,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            head: Some(BuildHead::new("test", "dev", version)),
            ..Self::empty()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadStore for MockHeads {
    async fn find_head(&self, _name: &str, _env: &str) -> Result<Option<BuildHead>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Store("connection refused".to_string()));
        }
        Ok(self.head.clone())
    }
}

/// Fetcher that fails its first `failures` calls.
pub struct MockFetcher {
    pub failures: u32,
    pub calls: AtomicU32,
    pub requested: Mutex<Vec<(String, String)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobFetcher for MockFetcher {
    async fn download(&self, container: &str, key: &str) -> Result<ByteStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested
            .lock()
            .unwrap()
            .push((container.to_string(), key.to_string()));
        if call <= self.failures {
            return Err(Error::Fetch(format!("download attempt {} failed", call)));
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"package")),
            Ok(Bytes::from_static(b"-tarball")),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Executor that fails its first `failures` calls and tracks concurrency.
pub struct MockExecutor {
    pub failures: u32,
    pub delay: Duration,
    pub calls: AtomicU32,
    pub options: Mutex<Vec<BuildOptions>>,
    pub contents: Mutex<Vec<Vec<u8>>>,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            options: Mutex::new(Vec::new()),
            contents: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, _kind: BuildKind, options: BuildOptions) -> Result<BuildOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let content = std::fs::read(&options.content).unwrap_or_default();
        self.contents.lock().unwrap().push(content);
        self.options.lock().unwrap().push(options);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.failures {
            return Err(Error::Build {
                message: "webpack exited with status 1".to_string(),
                output: Some("Module not found: ./missing".to_string()),
            });
        }
        Ok(BuildOutput::default())
    }
}

/// Publisher that records what it was asked to publish.
pub struct MockPublisher {
    pub fail: bool,
    pub published: Mutex<Vec<(PackageSpec, bool)>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            fail: false,
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl AssetPublisher for MockPublisher {
    async fn publish(&self, package: &PackageSpec, options: PublishOptions) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((package.clone(), options.promote));
        if self.fail {
            return Err(Error::Publish("asset store unavailable".to_string()));
        }
        Ok(())
    }
}
