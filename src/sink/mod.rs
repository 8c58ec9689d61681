//! Report Sinks
//!
//! Destinations that receive serialized snapshots. The closed set of built-in
//! sinks covers InfluxDB over HTTP, logging and in-memory collection;
//! [`FnSink`] is the open extension point.
//!
//! # Usage
//!
//! ```ignore
//! use appmetrics_reporter::sink::{InfluxDbSink, ReportSink};
//!
//! let sink = InfluxDbSink::new(settings, Duration::from_secs(3))?;
//! let ack = sink.send(&snapshot).await?;
//! ```

mod func;
mod influxdb;
pub mod line_protocol;
mod logging;

pub use func::FnSink;
pub use influxdb::InfluxDbSink;
pub use logging::{InMemorySink, LoggingSink};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SinkError;
use crate::snapshot::Snapshot;

/// Result of a send attempt
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Acknowledgement of a delivered snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Ack {
    /// Lines written
    pub lines: usize,
    /// Payload size in bytes
    pub bytes: usize,
}

/// Destination for snapshots.
///
/// A sink performs exactly one delivery attempt per call; retries and
/// backoff belong to the delivery policy wrapping it.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Serialize and deliver a snapshot
    async fn send(&self, snapshot: &Snapshot) -> SinkResult<Ack>;
}
