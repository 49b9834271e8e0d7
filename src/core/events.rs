// ─── Progress & log sinks ───
// Injected capabilities used by the installer workflow. Both are called
// synchronously from inside the download/extract call stack and must not
// block or panic.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

/// Payload emitted to the frontend while an engine is being installed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Overall { step: String, progress: f64 },
    #[serde(rename_all = "camelCase")]
    Download {
        file: String,
        progress: f64,
        downloaded_size: u64,
        total_size: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Extract { file: String, progress: f64 },
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Discards progress events.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Forwards log lines to `tracing`.
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, message: &str) {
        info!(target: "yomiage_lib::engine", "{}", message);
    }
}

/// Bundles the two sinks for one workflow invocation.
#[derive(Clone)]
pub struct Reporter {
    progress: Arc<dyn ProgressSink>,
    log: Arc<dyn LogSink>,
}

impl Reporter {
    pub fn new(progress: Arc<dyn ProgressSink>, log: Arc<dyn LogSink>) -> Self {
        Self { progress, log }
    }

    /// Logs through tracing and drops progress.
    pub fn tracing() -> Self {
        Self::new(Arc::new(NoProgress), Arc::new(TracingLog))
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.log.log(message.as_ref());
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.progress.on_progress(event);
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::tracing()
    }
}
