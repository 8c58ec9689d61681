//! InfluxDB Sink
//!
//! Writes line protocol to the InfluxDB 1.x `/write` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, instrument};

use super::line_protocol::encode_snapshot;
use super::{Ack, ReportSink, SinkResult};
use crate::config::InfluxDbSettings;
use crate::error::{Error, Result, SinkError};
use crate::snapshot::Snapshot;

/// Sink posting snapshots to an InfluxDB database
pub struct InfluxDbSink {
    name: String,
    settings: InfluxDbSettings,
    write_url: Url,
    client: Client,
}

impl InfluxDbSink {
    /// Create a new sink; `timeout` bounds each HTTP request
    pub fn new(settings: InfluxDbSettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let write_url = settings.write_url()?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("influxdb:{}", settings.database),
            settings,
            write_url,
            client,
        })
    }

    /// Target settings
    pub fn settings(&self) -> &InfluxDbSettings {
        &self.settings
    }

    /// URL points are written to
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Check if InfluxDB is reachable
    #[instrument(skip(self), fields(sink = %self.name))]
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/ping", self.settings.endpoint.trim_end_matches('/'));

        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Sink(SinkError::Transient(format!(
                "Ping failed: {}",
                response.status()
            ))))
        }
    }
}

impl std::fmt::Debug for InfluxDbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxDbSink")
            .field("name", &self.name)
            .field("write_url", &self.write_url.as_str())
            .finish()
    }
}

#[async_trait]
impl ReportSink for InfluxDbSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, snapshot), fields(sink = %self.name))]
    async fn send(&self, snapshot: &Snapshot) -> SinkResult<Ack> {
        let payload = encode_snapshot(snapshot);
        if payload.is_empty() {
            debug!("Nothing to report");
            return Ok(Ack::default());
        }

        let ack = Ack {
            lines: payload.lines,
            bytes: payload.body.len(),
        };

        let response = self
            .client
            .post(self.write_url.clone())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(payload.body)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %body, "InfluxDB rejected write");
            return Err(err);
        }

        debug!(lines = ack.lines, bytes = ack.bytes, "Wrote points");
        Ok(ack)
    }
}

/// Map a response status to a failure, `None` on success
pub(crate) fn classify_status(status: StatusCode) -> Option<SinkError> {
    if status.is_success() {
        return None;
    }

    let message = format!("InfluxDB responded {}", status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Some(SinkError::Transient(message))
    } else {
        Some(SinkError::Permanent(message))
    }
}

fn classify_error(error: reqwest::Error) -> SinkError {
    if error.is_builder() {
        SinkError::Permanent(error.to_string())
    } else {
        // Connect failures, timeouts and broken bodies are worth retrying
        SinkError::Transient(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MetricRegistry, Tags};
    use crate::filter::MetricFilter;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::NO_CONTENT), None);
        assert_eq!(classify_status(StatusCode::OK), None);

        assert_matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(SinkError::Transient(_))
        );
        assert_matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(SinkError::Transient(_))
        );
        assert_matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            Some(SinkError::Transient(_))
        );
        assert_matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(SinkError::Permanent(_))
        );
        assert_matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(SinkError::Permanent(_))
        );
        assert_matches!(
            classify_status(StatusCode::NOT_FOUND),
            Some(SinkError::Permanent(_))
        );
    }

    #[test]
    fn test_sink_creation() {
        let sink = InfluxDbSink::new(
            InfluxDbSettings::new("appmetricsapi", "http://127.0.0.1:8086"),
            Duration::from_secs(3),
        )
        .unwrap();

        assert_eq!(sink.name(), "influxdb:appmetricsapi");
        assert_eq!(
            sink.write_url().as_str(),
            "http://127.0.0.1:8086/write?db=appmetricsapi&precision=ns"
        );
        assert!(format!("{:?}", sink).contains("InfluxDbSink"));
    }

    #[test]
    fn test_sink_rejects_invalid_settings() {
        let result = InfluxDbSink::new(
            InfluxDbSettings::new("", "http://127.0.0.1:8086"),
            Duration::from_secs(3),
        );
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_snapshot_sends_nothing() {
        // Unroutable endpoint: any request would fail
        let sink = InfluxDbSink::new(
            InfluxDbSettings::new("db", "http://127.0.0.1:1"),
            Duration::from_millis(200),
        )
        .unwrap();

        let snapshot = Snapshot::capture(&MetricRegistry::new(), &MetricFilter::All);
        let ack = sink.send(&snapshot).await.unwrap();
        assert_eq!(ack, Ack::default());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let sink = InfluxDbSink::new(
            InfluxDbSettings::new("db", "http://127.0.0.1:1"),
            Duration::from_secs(2),
        )
        .unwrap();

        let registry = MetricRegistry::new();
        registry.counter("requests", Tags::new()).unwrap().inc();
        let snapshot = Snapshot::capture(&registry, &MetricFilter::All);

        let err = sink.send(&snapshot).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let sink = InfluxDbSink::new(
            InfluxDbSettings::new("db", "http://127.0.0.1:1"),
            Duration::from_secs(2),
        )
        .unwrap();

        assert_matches!(sink.health_check().await, Err(Error::Http(_)));
    }
}
