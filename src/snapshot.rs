//! Snapshots
//!
//! Immutable point-in-time copy of filtered registry state, optionally
//! enriched with environment information and health check results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::filter::MetricFilter;
use crate::health::{HealthCheckRegistry, HealthCheckResult};
use crate::registry::{MetricRegistry, MetricSample, Tags};

/// Fixed process metadata attached to reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub host: String,
    pub app_name: String,
    pub version: String,
    pub os: String,
    pub pid: u32,
}

impl EnvironmentInfo {
    /// Describe the running process
    pub fn detect(app_name: impl Into<String>) -> Self {
        Self {
            host: detect_host(),
            app_name: app_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            pid: std::process::id(),
        }
    }

    /// Tags added to every reported line
    pub fn tags(&self) -> Tags {
        Tags::new()
            .with("app", self.app_name.as_str())
            .with("server", self.host.as_str())
            .with("version", self.version.as_str())
    }
}

fn detect_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Filtered metric state for one report cycle
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub environment: Option<EnvironmentInfo>,
    pub metrics: Vec<MetricSample>,
    pub health: Vec<HealthCheckResult>,
}

impl Snapshot {
    /// Snapshot holding only metrics
    pub fn new(timestamp: DateTime<Utc>, metrics: Vec<MetricSample>) -> Self {
        Self {
            timestamp,
            environment: None,
            metrics,
            health: Vec::new(),
        }
    }

    /// Read the registry through `filter` at the current time
    pub fn capture(registry: &MetricRegistry, filter: &MetricFilter) -> Self {
        Self::new(Utc::now(), registry.snapshot(filter))
    }

    /// Attach environment information
    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Evaluate and attach health checks
    pub fn with_health(mut self, health: &HealthCheckRegistry) -> Self {
        self.health = health.evaluate_all();
        self
    }

    /// Whether there is nothing to report
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.health.is_empty() && self.environment.is_none()
    }

    /// Tags common to every line
    pub fn global_tags(&self) -> Tags {
        self.environment
            .as_ref()
            .map(EnvironmentInfo::tags)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthOutcome;

    #[test]
    fn test_environment_detect() {
        let env = EnvironmentInfo::detect("sample-api");

        assert_eq!(env.app_name, "sample-api");
        assert!(!env.host.is_empty());
        assert_eq!(env.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(env.pid, std::process::id());

        let tags = env.tags();
        assert_eq!(tags.get("app"), Some("sample-api"));
        assert!(tags.contains_key("server"));
    }

    #[test]
    fn test_capture() {
        let registry = MetricRegistry::new();
        registry.counter("requests", Tags::new()).unwrap().add(5);

        let health = HealthCheckRegistry::new();
        health.register("always", || HealthOutcome::Healthy);

        let snapshot = Snapshot::capture(&registry, &MetricFilter::All)
            .with_environment(EnvironmentInfo::detect("test"))
            .with_health(&health);

        assert_eq!(snapshot.metrics.len(), 1);
        assert_eq!(snapshot.health.len(), 1);
        assert!(snapshot.environment.is_some());
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.global_tags().get("app"), Some("test"));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let registry = MetricRegistry::new();
        let counter = registry.counter("requests", Tags::new()).unwrap();
        counter.add(1);

        let snapshot = Snapshot::capture(&registry, &MetricFilter::All);
        counter.add(100);

        assert_eq!(
            snapshot.metrics[0].value,
            crate::registry::MetricValue::Counter { count: 1 }
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::capture(&MetricRegistry::new(), &MetricFilter::All);
        assert!(snapshot.is_empty());
        assert!(snapshot.global_tags().is_empty());
    }
}
