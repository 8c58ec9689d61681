//! Delivery Policy
//!
//! Circuit-breaking wrapper around a sink: each attempt is bounded by a
//! timeout, and consecutive transient failures suspend delivery for a
//! backoff period.
//!
//! ```text
//!            N transient failures              backoff elapsed
//!   Closed ─────────────────────────▶ Open ─────────────────────▶ HalfOpen
//!     ▲                                 ▲                            │
//!     │                                 └──────── probe fails ───────┤
//!     └──────────────────────────── probe succeeds ──────────────────┘
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::DeliveryPolicyConfig;
use crate::error::SinkError;
use crate::sink::{Ack, ReportSink};
use crate::snapshot::Snapshot;

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Every cycle attempts delivery
    Closed,
    /// Backing off; cycles are skipped
    Open,
    /// Next cycle is a probe
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// What happened to one report cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sink accepted the snapshot
    Delivered(Ack),
    /// Backing off, no attempt made
    Skipped,
    /// Attempt made and failed
    Failed(SinkError),
}

impl DeliveryOutcome {
    /// Whether the sink was invoked
    pub fn attempted(&self) -> bool {
        !matches!(self, DeliveryOutcome::Skipped)
    }
}

#[derive(Debug)]
struct PolicyState {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Timeout, backoff and circuit-breaking rules for one report job
#[derive(Debug)]
pub struct DeliveryPolicy {
    config: DeliveryPolicyConfig,
    state: Mutex<PolicyState>,
}

impl DeliveryPolicy {
    /// Create a closed policy
    pub fn new(config: DeliveryPolicyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PolicyState {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Policy configuration
    pub fn config(&self) -> &DeliveryPolicyConfig {
        &self.config
    }

    /// Current circuit state as last recorded
    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    /// Transient failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Run one report cycle against `sink`
    pub async fn deliver(&self, sink: &dyn ReportSink, snapshot: &Snapshot) -> DeliveryOutcome {
        if !self.try_acquire() {
            debug!(sink = sink.name(), "Delivery backing off, cycle skipped");
            return DeliveryOutcome::Skipped;
        }

        let result = match timeout(self.config.timeout, sink.send(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.config.timeout)),
        };

        match result {
            Ok(ack) => {
                self.record_success(sink.name());
                DeliveryOutcome::Delivered(ack)
            }
            Err(err) => {
                self.record_failure(sink.name(), &err);
                DeliveryOutcome::Failed(err)
            }
        }
    }

    /// Decide whether this cycle may attempt a send, moving Open to HalfOpen
    /// once the backoff period has elapsed
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or(self.config.backoff_period);
                if elapsed >= self.config.backoff_period {
                    state.circuit = CircuitState::HalfOpen;
                    info!("Backoff elapsed, probing sink");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, sink: &str) {
        let mut state = self.state.lock();
        if state.circuit != CircuitState::Closed {
            info!(
                sink,
                previous_failures = state.consecutive_failures,
                "Delivery recovered, circuit closed"
            );
        }
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn record_failure(&self, sink: &str, err: &SinkError) {
        if !err.is_transient() {
            error!(sink, error = %err, "Report dropped after permanent failure");
            return;
        }

        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let open = match state.circuit {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                state.consecutive_failures >= self.config.failures_before_backoff
            }
            CircuitState::Open => false,
        };

        if open {
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            warn!(
                sink,
                failures = state.consecutive_failures,
                backoff = ?self.config.backoff_period,
                error = %err,
                "Delivery backing off after consecutive failures"
            );
        } else {
            warn!(
                sink,
                failures = state.consecutive_failures,
                error = %err,
                "Report delivery failed"
            );
        }
    }
}
