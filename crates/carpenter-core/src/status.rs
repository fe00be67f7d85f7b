//! Status events and the sink they are written to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, JobRequest, Result};

/// Kind of status event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Event,
    Error,
    Complete,
}

/// What a caller wants to report. Merged with the job's descriptive fields
/// by [`StatusEvent::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub event_type: EventType,
    pub message: String,
    pub failure: Option<FailureInfo>,
}

/// Error details captured from an [`Error`].
#[derive(Debug, Clone, PartialEq)]
pub struct FailureInfo {
    pub message: String,
    pub output: Option<String>,
}

impl StatusInfo {
    /// A plain progress event.
    pub fn event(message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Event,
            message: message.into(),
            failure: None,
        }
    }

    /// A terminal, successful event.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Complete,
            message: message.into(),
            failure: None,
        }
    }

    /// An event describing `error`.
    pub fn error(error: &Error) -> Self {
        Self {
            event_type: EventType::Event,
            message: String::new(),
            failure: Some(FailureInfo {
                message: error.to_string(),
                output: error.output().map(str::to_string),
            }),
        }
    }
}

/// Descriptive fields attached to every event of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFields {
    pub name: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    pub locale: Option<String>,
    pub build_type: String,
}

impl From<&JobRequest> for JobFields {
    fn from(request: &JobRequest) -> Self {
        Self {
            name: request.name.clone(),
            env: request.env.clone(),
            version: request.version.clone(),
            locale: request.locale.clone(),
            build_type: request.build_type_or_default(),
        }
    }
}

/// A status event as written to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub event_type: EventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub build_type: String,
    /// Milliseconds since the timer this event closes was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<f64>,
    /// Build tool output for error events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StatusEvent {
    /// Merge `info` with the job's fields.
    ///
    /// A failure turns the event into an `error` event whose message is the
    /// error message and whose details are the error output.
    pub fn new(info: StatusInfo, fields: &JobFields, timing: Option<f64>) -> Self {
        let (event_type, message, details) = match info.failure {
            Some(failure) => (EventType::Error, failure.message, failure.output),
            None => (info.event_type, info.message, None),
        };

        Self {
            event_type,
            message,
            name: fields.name.clone(),
            env: fields.env.clone(),
            version: fields.version.clone(),
            locale: fields.locale.clone(),
            build_type: fields.build_type.clone(),
            timing,
            details,
        }
    }
}

/// One job's ordered stream of status events.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Append an event.
    async fn write(&mut self, event: StatusEvent) -> Result<()>;

    /// Append a final event and close the stream.
    async fn end(&mut self, event: StatusEvent) -> Result<()>;

    /// Whether the stream has been closed.
    fn is_ended(&self) -> bool;
}

/// Transport that hands out a fresh [`StatusSink`] per job.
pub trait StatusChannel: Send + Sync {
    fn open(&self) -> Box<dyn StatusSink>;
}
