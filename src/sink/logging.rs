//! Logging and in-memory sinks

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::line_protocol::encode_snapshot;
use super::{Ack, ReportSink, SinkResult};
use crate::snapshot::Snapshot;

/// Logging-based sink.
///
/// Writes the encoded payload to the tracing system. Useful for development
/// and as a stand-in when no database is available.
#[derive(Debug, Clone)]
pub struct LoggingSink {
    name: String,
    /// Whether to log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingSink {
    /// Create a sink that logs at debug level
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info_level: false,
        }
    }

    /// Create a sink that logs at info level
    pub fn info_level(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info_level: true,
        }
    }
}

impl Default for LoggingSink {
    fn default() -> Self {
        Self::new("logging")
    }
}

#[async_trait]
impl ReportSink for LoggingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, snapshot: &Snapshot) -> SinkResult<Ack> {
        let payload = encode_snapshot(snapshot);
        let ack = Ack {
            lines: payload.lines,
            bytes: payload.body.len(),
        };

        if self.info_level {
            info!(sink = %self.name, lines = ack.lines, payload = %payload.body, "Metrics report");
        } else {
            debug!(sink = %self.name, lines = ack.lines, payload = %payload.body, "Metrics report");
        }

        Ok(ack)
    }
}

/// In-memory sink for testing.
///
/// Keeps every delivered snapshot for later inspection.
#[derive(Debug, Default)]
pub struct InMemorySink {
    snapshots: RwLock<Vec<Snapshot>>,
}

impl InMemorySink {
    /// Create a new in-memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All delivered snapshots
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.read().clone()
    }

    /// Number of delivered snapshots
    pub fn count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Most recent snapshot
    pub fn last(&self) -> Option<Snapshot> {
        self.snapshots.read().last().cloned()
    }

    /// Clear collected snapshots
    pub fn clear(&self) {
        self.snapshots.write().clear();
    }
}

#[async_trait]
impl ReportSink for InMemorySink {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn send(&self, snapshot: &Snapshot) -> SinkResult<Ack> {
        let payload = encode_snapshot(snapshot);
        self.snapshots.write().push(snapshot.clone());
        Ok(Ack {
            lines: payload.lines,
            bytes: payload.body.len(),
        })
    }
}
