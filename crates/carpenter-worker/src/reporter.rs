//! Per-job status reporting with timers.

use carpenter_core::status::{JobFields, StatusEvent, StatusInfo, StatusSink};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::error;

#[derive(Debug, Clone, Copy)]
enum Action {
    Write,
    End,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Write => f.write_str("write to"),
            Action::End => f.write_str("end"),
        }
    }
}

/// Emits status events for one job.
///
/// Reporting never fails the job: without a sink every call is a no-op, and
/// a closed or failing sink is logged and ignored.
pub struct StatusReporter {
    fields: JobFields,
    sink: Option<Box<dyn StatusSink>>,
    timers: HashMap<String, Instant>,
}

impl StatusReporter {
    pub fn new(fields: JobFields, sink: Option<Box<dyn StatusSink>>) -> Self {
        Self {
            fields,
            sink,
            timers: HashMap::new(),
        }
    }

    /// Whether events go anywhere.
    #[cfg(test)]
    fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    #[cfg(test)]
    fn has_timer(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    /// Start the timer `key`, emitting `info` right away if given.
    pub async fn timer_start(&mut self, key: &str, info: Option<StatusInfo>) {
        self.timers.insert(key.to_string(), Instant::now());
        if let Some(info) = info {
            self.write(None, info).await;
        }
    }

    /// Emit an event, closing the timer `key` if given.
    pub async fn write(&mut self, key: Option<&str>, info: StatusInfo) {
        self.act(Action::Write, key, info).await;
    }

    /// Emit a final event and close the sink.
    pub async fn end(&mut self, key: Option<&str>, info: StatusInfo) {
        self.act(Action::End, key, info).await;
    }

    /// Elapsed milliseconds for `key`, consuming the timer.
    fn take_timing(&mut self, key: Option<&str>) -> Option<f64> {
        let start = self.timers.remove(key?)?;
        Some(start.elapsed().as_secs_f64() * 1000.0)
    }

    async fn act(&mut self, action: Action, key: Option<&str>, info: StatusInfo) {
        let timing = self.take_timing(key);
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let event = StatusEvent::new(info, &self.fields, timing);
        if sink.is_ended() {
            error!(
                event_type = ?event.event_type,
                message = %event.message,
                "Unable to {} status stream",
                action
            );
            return;
        }

        let result = match action {
            Action::Write => sink.write(event).await,
            Action::End => sink.end(event).await,
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to {} status stream", action);
        }
    }
}
