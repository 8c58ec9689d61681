//! Reporting configuration
//!
//! Explicit configuration passed at construction. The binary fills these from
//! CLI arguments and environment variables.

use std::time::Duration;

use reqwest::Url;
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Delivery Policy
// =============================================================================

/// Timeout and backoff rules applied to every send attempt of a report job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicyConfig {
    /// Consecutive transient failures before delivery backs off
    pub failures_before_backoff: u32,

    /// How long delivery stays suspended once backing off
    pub backoff_period: Duration,

    /// Upper bound for a single send attempt
    pub timeout: Duration,
}

impl Default for DeliveryPolicyConfig {
    fn default() -> Self {
        Self {
            failures_before_backoff: 3,
            backoff_period: Duration::from_secs(30),
            timeout: Duration::from_secs(3),
        }
    }
}

impl DeliveryPolicyConfig {
    /// Validate the policy on its own
    pub fn validate(&self) -> Result<()> {
        if self.failures_before_backoff == 0 {
            return Err(Error::Config(
                "failures_before_backoff must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// InfluxDB
// =============================================================================

/// Target InfluxDB instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxDbSettings {
    /// Base URI, e.g. `http://127.0.0.1:8086`
    pub endpoint: String,

    /// Database receiving the points
    pub database: String,
}

impl Default for InfluxDbSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086".to_string(),
            database: "appmetricsapi".to_string(),
        }
    }
}

impl InfluxDbSettings {
    /// Create settings for a database at the given endpoint
    pub fn new(database: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
        }
    }

    /// Full write URL for this database
    pub fn write_url(&self) -> Result<Url> {
        let base = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", self.endpoint, e)))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Endpoint must be http or https: {}",
                self.endpoint
            )));
        }

        let url = format!(
            "{}/write?db={}&precision=ns",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.database)
        );

        Url::parse(&url).map_err(|e| Error::Config(format!("Invalid write URL: {}", e)))
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".to_string()));
        }
        self.write_url().map(|_| ())
    }
}

// =============================================================================
// Reporting
// =============================================================================

/// Full reporting configuration for one InfluxDB report job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingConfig {
    /// Delivery policy
    pub policy: DeliveryPolicyConfig,

    /// InfluxDB target
    pub influx: InfluxDbSettings,

    /// Time between report cycles
    pub report_interval: Duration,

    /// Application name used in environment tags
    pub app_name: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicyConfig::default(),
            influx: InfluxDbSettings::default(),
            report_interval: Duration::from_secs(5),
            app_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl ReportingConfig {
    /// Whether a single attempt can outlive the report interval
    pub fn timeout_exceeds_interval(&self) -> bool {
        self.policy.timeout >= self.report_interval
    }

    /// Validate the configuration.
    ///
    /// A timeout that is not shorter than the report interval is accepted
    /// with a warning: ticks will be skipped while a send is in flight.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.influx.validate()?;

        if self.report_interval.is_zero() {
            return Err(Error::Config(
                "report_interval must be greater than zero".to_string(),
            ));
        }

        if self.timeout_exceeds_interval() {
            warn!(
                timeout = ?self.policy.timeout,
                report_interval = ?self.report_interval,
                "Send timeout is not shorter than the report interval"
            );
        }

        Ok(())
    }
}
