//! AppMetrics Reporter - Periodic Metrics Reporting Pipeline
//!
//! Application code records counters, gauges, meters, histograms and timers
//! into a shared in-memory registry. Independent report jobs periodically take
//! filtered snapshots, fold in health check results and environment
//! information, and ship them as line protocol to a sink such as InfluxDB.
//!
//! # Architecture
//!
//! ```text
//! writers ─▶ MetricRegistry ─▶ ReportScheduler (one loop per job)
//!                                  │ tick
//!                                  ▼
//!                 Snapshot(filter) + health + environment
//!                                  │
//!                                  ▼
//!                 DeliveryPolicy (timeout, backoff, half-open probe)
//!                                  │
//!                                  ▼
//!                 ReportSink (InfluxDB, logging, in-memory, closure)
//! ```
//!
//! Delivery problems never reach metric writers: recording is synchronous and
//! infallible once an instrument handle is held.
//!
//! # Modules
//!
//! - [`config`] - Delivery policy and sink settings
//! - [`error`] - Error types
//! - [`filter`] - Metric filter algebra
//! - [`health`] - Health check registry and process memory checks
//! - [`policy`] - Timeout and circuit-breaking delivery
//! - [`registry`] - Instruments keyed by name, tags and kind
//! - [`scheduler`] - Report jobs and their timer loops
//! - [`server`] - Observability HTTP endpoint
//! - [`sink`] - Report destinations and line protocol encoding
//! - [`snapshot`] - Point-in-time report contents
//! - [`workload`] - Synthetic request recorder

pub mod config;
pub mod error;
pub mod filter;
pub mod health;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod sink;
pub mod snapshot;
pub mod workload;

// Re-export commonly used types
pub use config::{DeliveryPolicyConfig, InfluxDbSettings, ReportingConfig};
pub use error::{Error, Result, SinkError};
pub use filter::MetricFilter;
pub use health::{HealthCheckRegistry, HealthOutcome, HealthStatus};
pub use policy::{CircuitState, DeliveryOutcome, DeliveryPolicy};
pub use registry::{MetricId, MetricKind, MetricRegistry, Tags};
pub use scheduler::{ReportJob, ReportScheduler};
pub use sink::{Ack, ReportSink};
pub use snapshot::{EnvironmentInfo, Snapshot};
