//! Health Checks
//!
//! Named, graded checks evaluated synchronously at snapshot time and folded
//! into every report that asks for them.
//!
//! Evaluation applies no timeout. A check that can block must bound itself;
//! the registry runs checks inline on the reporting task.

mod memory;

pub use memory::{ProcessMemory, ProcessMemoryKind};

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but operational
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    /// Numeric value emitted on the wire
    pub fn score(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// What a check function returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Health check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Check name
    pub name: String,
    /// Status
    pub status: HealthStatus,
    /// Reason for a non-healthy status
    pub message: Option<String>,
    /// Duration of check
    pub duration_ms: u64,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    /// Create a degraded result
    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// Build from a check outcome
    pub fn from_outcome(name: impl Into<String>, outcome: HealthOutcome) -> Self {
        match outcome {
            HealthOutcome::Healthy => Self::healthy(name),
            HealthOutcome::Degraded(reason) => Self::degraded(name, reason),
            HealthOutcome::Unhealthy(reason) => Self::unhealthy(name, reason),
        }
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: HealthStatus,
    /// Individual check results
    pub checks: Vec<HealthCheckResult>,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

impl HealthResponse {
    /// Create a new health response; the overall status is the worst check
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        Self {
            status: overall_status(&checks),
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Worst status among results, `Healthy` when empty
pub fn overall_status(results: &[HealthCheckResult]) -> HealthStatus {
    results
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

type CheckFn = dyn Fn() -> HealthOutcome + Send + Sync;

/// Registry of named health checks
pub struct HealthCheckRegistry {
    checks: RwLock<BTreeMap<String, Arc<CheckFn>>>,
    start_time: Instant,
}

impl HealthCheckRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Register a check, replacing any check with the same name
    pub fn register<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> HealthOutcome + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(check = %name, "Registered health check");
        self.checks.write().insert(name, Arc::new(check));
    }

    /// Register a process memory check with a megabyte threshold
    pub fn register_process_memory(
        &self,
        name: impl Into<String>,
        kind: ProcessMemoryKind,
        threshold_mb: u64,
    ) {
        self.register(name, move || memory::check_process_memory(kind, threshold_mb));
    }

    /// Remove a check
    pub fn unregister(&self, name: &str) -> bool {
        self.checks.write().remove(name).is_some()
    }

    /// Registered check names, sorted
    pub fn names(&self) -> Vec<String> {
        self.checks.read().keys().cloned().collect()
    }

    /// Number of registered checks
    pub fn len(&self) -> usize {
        self.checks.read().len()
    }

    /// Whether no checks are registered
    pub fn is_empty(&self) -> bool {
        self.checks.read().is_empty()
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Run every check, sorted by name. A panicking check is reported as
    /// unhealthy.
    pub fn evaluate_all(&self) -> Vec<HealthCheckResult> {
        // Clone out so checks run without holding the lock
        let checks: Vec<(String, Arc<CheckFn>)> = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        checks
            .into_iter()
            .map(|(name, check)| {
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| check())).unwrap_or_else(|_| {
                    warn!(check = %name, "Health check panicked");
                    HealthOutcome::Unhealthy("health check panicked".to_string())
                });
                HealthCheckResult::from_outcome(name, outcome).with_duration(started.elapsed())
            })
            .collect()
    }

    /// Evaluate and wrap into a response
    pub fn check_all(&self) -> HealthResponse {
        HealthResponse::new(self.evaluate_all(), self.uptime())
    }
}

impl Default for HealthCheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthCheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckRegistry")
            .field("checks", &self.names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
