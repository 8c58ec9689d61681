//! AppMetrics Reporter
//!
//! Runs a synthetic request workload against the metric registry and reports
//! it to InfluxDB on a fixed interval, with process memory health checks and
//! an observability endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      AppMetrics Reporter                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│   Registry   │───▶│  Scheduler   │──▶ InfluxDB
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             └──────────▶ Health server          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use appmetrics_reporter::config::{DeliveryPolicyConfig, InfluxDbSettings, ReportingConfig};
use appmetrics_reporter::error::{Error, Result};
use appmetrics_reporter::filter::MetricFilter;
use appmetrics_reporter::health::{HealthCheckRegistry, ProcessMemoryKind};
use appmetrics_reporter::registry::MetricRegistry;
use appmetrics_reporter::scheduler::{ReportJob, ReportScheduler};
use appmetrics_reporter::server::{ObservabilityServer, ServerState};
use appmetrics_reporter::sink::{InfluxDbSink, LoggingSink};
use appmetrics_reporter::snapshot::EnvironmentInfo;
use appmetrics_reporter::workload::Workload;

// =============================================================================
// CLI Arguments
// =============================================================================

/// AppMetrics Reporter - periodic metrics reporting to InfluxDB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// InfluxDB base URL
    #[arg(long, env = "INFLUX_ENDPOINT", default_value = "http://127.0.0.1:8086")]
    influx_endpoint: String,

    /// InfluxDB database name
    #[arg(long, env = "INFLUX_DATABASE", default_value = "appmetricsapi")]
    influx_database: String,

    /// Seconds between report cycles
    #[arg(long, env = "REPORT_INTERVAL_SECS", default_value = "5")]
    report_interval_secs: u64,

    /// Consecutive transient failures before backing off
    #[arg(long, env = "FAILURES_BEFORE_BACKOFF", default_value = "3")]
    failures_before_backoff: u32,

    /// Backoff period in seconds
    #[arg(long, env = "BACKOFF_PERIOD_SECS", default_value = "30")]
    backoff_period_secs: u64,

    /// Per-attempt send timeout in seconds
    #[arg(long, env = "TIMEOUT_SECS", default_value = "3")]
    timeout_secs: u64,

    /// Application name reported in environment tags
    #[arg(long, env = "APP_NAME", default_value = "appmetrics-reporter")]
    app_name: String,

    /// Only report metrics carrying this tag (`key=value`)
    #[arg(long, env = "REPORT_TAG_FILTER")]
    report_tag_filter: Option<String>,

    /// Also log every report at info level
    #[arg(long, env = "LOG_REPORTS")]
    log_reports: bool,

    /// Run one last report cycle per job on shutdown
    #[arg(long, env = "FLUSH_ON_SHUTDOWN")]
    flush_on_shutdown: bool,

    /// Private memory threshold in megabytes
    #[arg(long, env = "PRIVATE_MEMORY_MB", default_value = "200")]
    private_memory_mb: u64,

    /// Virtual memory threshold in megabytes
    #[arg(long, env = "VIRTUAL_MEMORY_MB", default_value = "4096")]
    virtual_memory_mb: u64,

    /// Working set threshold in megabytes
    #[arg(long, env = "WORKING_SET_MB", default_value = "200")]
    working_set_mb: u64,

    /// Synthetic workload period in milliseconds (0 disables it)
    #[arg(long, env = "WORKLOAD_INTERVAL_MS", default_value = "200")]
    workload_interval_ms: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn reporting_config(&self) -> ReportingConfig {
        ReportingConfig {
            policy: DeliveryPolicyConfig {
                failures_before_backoff: self.failures_before_backoff,
                backoff_period: Duration::from_secs(self.backoff_period_secs),
                timeout: Duration::from_secs(self.timeout_secs),
            },
            influx: InfluxDbSettings::new(&self.influx_database, &self.influx_endpoint),
            report_interval: Duration::from_secs(self.report_interval_secs),
            app_name: self.app_name.clone(),
        }
    }

    fn report_filter(&self) -> Result<MetricFilter> {
        let Some(raw) = &self.report_tag_filter else {
            return Ok(MetricFilter::All);
        };
        match raw.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(MetricFilter::tag_equals(key, value)),
            _ => Err(Error::Config(format!(
                "report tag filter '{}' must look like key=value",
                raw
            ))),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.reporting_config();
    config.validate()?;
    let filter = args.report_filter()?;

    info!("Starting AppMetrics Reporter");
    info!("  InfluxDB: {} (database {})", config.influx.endpoint, config.influx.database);
    info!("  Report interval: {:?}", config.report_interval);
    info!(
        "  Delivery policy: {} failures, {:?} backoff, {:?} timeout",
        config.policy.failures_before_backoff, config.policy.backoff_period, config.policy.timeout
    );
    info!("  Filter: {:?}", filter);

    let registry = MetricRegistry::shared();
    let environment = EnvironmentInfo::detect(&config.app_name);

    // Health checks
    let health = Arc::new(HealthCheckRegistry::new());
    health.register_process_memory(
        "Private Memory Size",
        ProcessMemoryKind::PrivateMemory,
        args.private_memory_mb,
    );
    health.register_process_memory(
        "Virtual Memory Size",
        ProcessMemoryKind::VirtualMemory,
        args.virtual_memory_mb,
    );
    health.register_process_memory("Working Set", ProcessMemoryKind::WorkingSet, args.working_set_mb);

    // Sinks
    let influx = InfluxDbSink::new(config.influx.clone(), config.policy.timeout)?;
    if let Err(e) = influx.health_check().await {
        warn!("InfluxDB health check failed: {}", e);
        warn!("Continuing anyway - reports will back off until it is reachable");
    } else {
        info!("InfluxDB connection healthy");
    }

    let shutdown = CancellationToken::new();
    let mut scheduler = ReportScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&health),
        environment.clone(),
    )
    .with_shutdown(shutdown.clone());

    scheduler.add_job(
        ReportJob::new(Arc::new(influx), config.report_interval, config.policy.clone())
            .with_filter(filter.clone())
            .with_health_checks(true)
            .with_environment_info(true),
    )?;

    if args.log_reports {
        scheduler.add_job(
            ReportJob::new(
                Arc::new(LoggingSink::info_level("console")),
                config.report_interval,
                config.policy.clone(),
            )
            .with_filter(filter),
        )?;
    }

    // Start health server
    let server = ObservabilityServer::bind(
        &args.health_addr,
        ServerState {
            registry: Arc::clone(&registry),
            health: Arc::clone(&health),
            environment,
        },
    )
    .await?;
    let server_handle = tokio::spawn(server.serve(shutdown.clone()));

    // Start synthetic workload
    let workload_handle = if args.workload_interval_ms > 0 {
        let workload = Workload::new(&registry)?;
        Some(tokio::spawn(workload.run(
            Duration::from_millis(args.workload_interval_ms),
            shutdown.clone(),
        )))
    } else {
        info!("Synthetic workload disabled");
        None
    };

    scheduler.start();

    wait_for_shutdown(tokio::signal::ctrl_c(), &shutdown).await;
    scheduler.shutdown().await;

    if args.flush_on_shutdown {
        for job in scheduler.jobs() {
            let outcome = scheduler.run_once(job).await;
            info!(job = job.name(), ?outcome, "Final flush");
        }
    }

    if let Some(handle) = workload_handle {
        if let Err(e) = handle.await {
            error!("Workload task failed: {}", e);
        }
    }

    match server_handle.await {
        Ok(Err(e)) => error!("Health server error: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    for job in scheduler.jobs() {
        info!(job = job.name(), stats = ?job.stats(), "Report job summary");
    }

    info!("Reporter shutdown complete");
    Ok(())
}

/// Wait for `signal`, then cancel `shutdown`. A failed signal listener still
/// leads to a graceful stop.
async fn wait_for_shutdown<F>(signal: F, shutdown: &CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal, stopping: {}", e),
    }
    shutdown.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
