//! Synthetic Workload
//!
//! Stands in for an application serving requests: every interval it
//! simulates one request per route and records the result into the
//! registry, so the reporters always have something to ship.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::registry::{Counter, Gauge, Meter, MetricRegistry, Tags, Timer};

/// A simulated endpoint and the status it always answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub status: u16,
}

/// Routes exercised on every iteration
pub const ROUTES: [Route; 4] = [
    Route { path: "api/values", status: 200 },
    Route { path: "api/bad", status: 400 },
    Route { path: "api/unauth", status: 401 },
    Route { path: "api/error", status: 500 },
];

struct RouteInstruments {
    route: Route,
    requests: Arc<Counter>,
    duration: Arc<Timer>,
    errors: Option<Arc<Counter>>,
}

/// Records simulated requests into a registry
pub struct Workload {
    routes: Vec<RouteInstruments>,
    throughput: Arc<Meter>,
    active: Arc<Gauge>,
    iteration: u64,
}

impl Workload {
    /// Register the workload's instruments
    pub fn new(registry: &MetricRegistry) -> Result<Self> {
        let routes = ROUTES
            .iter()
            .map(|route| {
                let status = route.status.to_string();
                let tags = Tags::new()
                    .with("route", route.path)
                    .with("http_status", status.as_str());

                Ok(RouteInstruments {
                    route: *route,
                    requests: registry.counter("http_requests", tags.clone())?,
                    duration: registry.timer("http_request_duration", Tags::new().with("route", route.path))?,
                    errors: if route.status >= 400 {
                        Some(registry.counter("http_errors", tags)?)
                    } else {
                        None
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            routes,
            throughput: registry.meter("http_throughput", Tags::new())?,
            active: registry.gauge("http_active_requests", Tags::new())?,
            iteration: 0,
        })
    }

    /// Simulate one request per route
    pub fn record_iteration(&mut self) {
        self.iteration += 1;
        for instruments in &self.routes {
            self.active.inc();
            instruments
                .duration
                .record(simulated_latency(instruments.route, self.iteration));
            instruments.requests.inc();
            if let Some(errors) = &instruments.errors {
                errors.inc();
            }
            self.throughput.mark();
            self.active.dec();
        }
    }

    /// Iterations recorded so far
    pub fn iterations(&self) -> u64 {
        self.iteration
    }

    /// Record an iteration every `period` until `shutdown` is cancelled
    #[instrument(skip_all, fields(period = ?period))]
    pub async fn run(mut self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Synthetic workload started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.record_iteration(),
            }
        }

        debug!(iterations = self.iteration, "Synthetic workload stopped");
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("routes", &self.routes.len())
            .field("iteration", &self.iteration)
            .finish()
    }
}

/// Latency varying per route and iteration without a random source
fn simulated_latency(route: Route, iteration: u64) -> Duration {
    let base = match route.status {
        200 => 20,
        500 => 120,
        _ => 5,
    };
    Duration::from_millis(base + (iteration * 7 + route.path.len() as u64) % 25)
}
