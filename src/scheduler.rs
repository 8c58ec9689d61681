//! Report Scheduler
//!
//! Drives one independent timer loop per report job. Each tick captures a
//! fresh snapshot and hands it to the job's delivery policy.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       ReportScheduler                          │
//! │  ┌────────────┐   ┌────────────┐         ┌────────────┐        │
//! │  │ job loop A │   │ job loop B │   ...   │ job loop N │        │
//! │  └─────┬──────┘   └─────┬──────┘         └─────┬──────┘        │
//! │        │ tick           │ tick                 │ tick          │
//! │        ▼                ▼                      ▼               │
//! │  snapshot(filter) + health + environment ─▶ DeliveryPolicy     │
//! │                                               └─▶ ReportSink   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A tick that arrives while the job's previous send is still running is
//! skipped. Cancelling the shutdown token stops every loop; an in-flight
//! send finishes or times out, and no new tick starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::DeliveryPolicyConfig;
use crate::error::{Error, Result};
use crate::filter::MetricFilter;
use crate::health::HealthCheckRegistry;
use crate::policy::{DeliveryOutcome, DeliveryPolicy};
use crate::registry::MetricRegistry;
use crate::sink::ReportSink;
use crate::snapshot::{EnvironmentInfo, Snapshot};

// =============================================================================
// Job Statistics
// =============================================================================

/// Per-job counters
#[derive(Debug, Default)]
pub struct JobStats {
    ticks: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped_backoff: AtomicU64,
    skipped_in_flight: AtomicU64,
}

/// Copy of [`JobStats`] at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobStatsSnapshot {
    pub ticks: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub skipped_backoff: u64,
    pub skipped_in_flight: u64,
}

impl JobStats {
    fn record(&self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered(_) => {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Failed(_) => {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Skipped => {
                self.skipped_backoff.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Read all counters
    pub fn snapshot(&self) -> JobStatsSnapshot {
        JobStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_backoff: self.skipped_backoff.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Report Job
// =============================================================================

/// One sink reported on its own interval through its own filter and policy
pub struct ReportJob {
    name: String,
    sink: Arc<dyn ReportSink>,
    filter: MetricFilter,
    interval: Duration,
    policy: DeliveryPolicy,
    include_health: bool,
    include_environment: bool,
    stats: JobStats,
}

impl ReportJob {
    /// Create a job reporting every metric, with health checks and
    /// environment information
    pub fn new(
        sink: Arc<dyn ReportSink>,
        interval: Duration,
        policy: DeliveryPolicyConfig,
    ) -> Self {
        Self {
            name: sink.name().to_string(),
            sink,
            filter: MetricFilter::All,
            interval,
            policy: DeliveryPolicy::new(policy),
            include_health: true,
            include_environment: true,
            stats: JobStats::default(),
        }
    }

    /// Restrict reported metrics
    pub fn with_filter(mut self, filter: MetricFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Include health check results in each snapshot
    pub fn with_health_checks(mut self, enabled: bool) -> Self {
        self.include_health = enabled;
        self
    }

    /// Include environment information in each snapshot
    pub fn with_environment_info(mut self, enabled: bool) -> Self {
        self.include_environment = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn filter(&self) -> &MetricFilter {
        &self.filter
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> JobStatsSnapshot {
        self.stats.snapshot()
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config(format!(
                "report job '{}' has a zero interval",
                self.name
            )));
        }
        self.policy.config().validate()
    }
}

impl std::fmt::Debug for ReportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportJob")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("filter", &self.filter)
            .field("include_health", &self.include_health)
            .field("include_environment", &self.include_environment)
            .finish()
    }
}

// =============================================================================
// Report Context
// =============================================================================

/// State shared by all job loops, read-only with respect to the registry
#[derive(Debug)]
struct ReportContext {
    registry: Arc<MetricRegistry>,
    health: Arc<HealthCheckRegistry>,
    environment: EnvironmentInfo,
}

impl ReportContext {
    fn build_snapshot(&self, job: &ReportJob) -> Snapshot {
        let mut snapshot = Snapshot::capture(&self.registry, &job.filter);
        if job.include_environment {
            snapshot = snapshot.with_environment(self.environment.clone());
        }
        if job.include_health {
            snapshot = snapshot.with_health(&self.health);
        }
        snapshot
    }

    async fn report(&self, job: &ReportJob) -> DeliveryOutcome {
        let snapshot = self.build_snapshot(job);
        let outcome = job.policy.deliver(job.sink.as_ref(), &snapshot).await;
        job.stats.record(&outcome);

        if let DeliveryOutcome::Delivered(ack) = &outcome {
            debug!(job = %job.name, lines = ack.lines, bytes = ack.bytes, "Report delivered");
        }
        outcome
    }
}

// =============================================================================
// Report Scheduler
// =============================================================================

/// Runs report jobs against a shared registry
pub struct ReportScheduler {
    context: Arc<ReportContext>,
    jobs: Vec<Arc<ReportJob>>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReportScheduler {
    /// Create a scheduler with no jobs
    pub fn new(
        registry: Arc<MetricRegistry>,
        health: Arc<HealthCheckRegistry>,
        environment: EnvironmentInfo,
    ) -> Self {
        Self {
            context: Arc::new(ReportContext {
                registry,
                health,
                environment,
            }),
            jobs: Vec::new(),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Stop when `token` is cancelled instead of an internal token
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Add a job; takes effect on the next `start`
    pub fn add_job(&mut self, job: ReportJob) -> Result<Arc<ReportJob>> {
        job.validate()?;
        let job = Arc::new(job);
        self.jobs.push(Arc::clone(&job));
        Ok(job)
    }

    /// Configured jobs
    pub fn jobs(&self) -> &[Arc<ReportJob>] {
        &self.jobs
    }

    /// Token whose cancellation stops the scheduler
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn one loop per job
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            debug!("Scheduler already shut down, not starting");
            return;
        }

        let mut handles = self.handles.lock();
        for job in &self.jobs {
            info!(job = %job.name, interval = ?job.interval, "Starting report job");
            handles.push(tokio::spawn(run_job(
                Arc::clone(&self.context),
                Arc::clone(job),
                self.shutdown.clone(),
            )));
        }
    }

    /// Run a single report cycle for `job` immediately
    pub async fn run_once(&self, job: &ReportJob) -> DeliveryOutcome {
        self.context.report(job).await
    }

    /// Cancel every loop and wait for in-flight sends to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Report job task failed: {}", e);
            }
        }
        info!("Report scheduler stopped");
    }
}

impl std::fmt::Debug for ReportScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportScheduler")
            .field("jobs", &self.jobs)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

#[instrument(skip_all, fields(job = %job.name))]
async fn run_job(context: Arc<ReportContext>, job: Arc<ReportJob>, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + job.interval, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        job.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if in_flight.as_ref().is_some_and(|send| !send.is_finished()) {
            job.stats.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
            debug!("Previous send still in flight, tick skipped");
            continue;
        }

        let context = Arc::clone(&context);
        let job = Arc::clone(&job);
        in_flight = Some(tokio::spawn(async move {
            context.report(&job).await;
        }));
    }

    // Bounded by the policy timeout
    if let Some(send) = in_flight {
        if let Err(e) = send.await {
            error!("Report send task failed: {}", e);
        }
    }
    info!("Report job stopped");
}
