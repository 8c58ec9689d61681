//! Instruments
//!
//! Counters, gauges and meters are lock-free atomics. Histograms and timers
//! hold a small per-instrument lock around their running summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::identity::MetricKind;

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by n
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric holding an `f64`
#[derive(Debug)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Default for Gauge {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set value
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Add a (possibly negative) delta
    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.add(1.0);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.add(-1.0);
    }

    /// Get current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Meter: event count plus mean rate since creation
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    created: Instant,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            created: Instant::now(),
        }
    }
}

impl Meter {
    /// Create a new meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one event
    pub fn mark(&self) {
        self.mark_n(1);
    }

    /// Mark n events
    pub fn mark_n(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Total events
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Events per second since creation
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.created.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

/// Point-in-time summary of a distribution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl HistogramSummary {
    /// Mean of recorded values, zero when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

/// Histogram metric
#[derive(Debug, Default)]
pub struct Histogram {
    summary: Mutex<HistogramSummary>,
}

impl Histogram {
    /// Create a new histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value; non-finite values are ignored
    pub fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }

        let mut summary = self.summary.lock();
        if summary.count == 0 {
            summary.min = value;
            summary.max = value;
        } else {
            summary.min = summary.min.min(value);
            summary.max = summary.max.max(value);
        }
        summary.count += 1;
        summary.sum += value;
        summary.last = value;
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.summary.lock().count
    }

    /// Copy of the current summary
    pub fn summary(&self) -> HistogramSummary {
        *self.summary.lock()
    }
}

/// Timer: histogram of durations in milliseconds
#[derive(Debug, Default)]
pub struct Timer {
    histogram: Histogram,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duration
    pub fn record(&self, duration: Duration) {
        self.histogram.record(duration.as_secs_f64() * 1000.0);
    }

    /// Start timing; the elapsed time is recorded when the guard drops
    pub fn start(self: &Arc<Self>) -> TimerGuard {
        TimerGuard {
            timer: Arc::clone(self),
            started: Instant::now(),
        }
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.histogram.count()
    }

    /// Summary in milliseconds
    pub fn summary(&self) -> HistogramSummary {
        self.histogram.summary()
    }
}

/// Records elapsed time into a [`Timer`] on drop
pub struct TimerGuard {
    timer: Arc<Timer>,
    started: Instant,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

/// Value read from an instrument at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricValue {
    Counter { count: u64 },
    Gauge { value: f64 },
    Meter { count: u64, mean_rate: f64 },
    Histogram(HistogramSummary),
    Timer(HistogramSummary),
}

/// Shared handle to a registered instrument
#[derive(Debug, Clone)]
pub enum Instrument {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Meter(Arc<Meter>),
    Histogram(Arc<Histogram>),
    Timer(Arc<Timer>),
}

impl Instrument {
    /// Fresh instrument of the given kind
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Instrument::Counter(Arc::new(Counter::new())),
            MetricKind::Gauge => Instrument::Gauge(Arc::new(Gauge::new())),
            MetricKind::Meter => Instrument::Meter(Arc::new(Meter::new())),
            MetricKind::Histogram => Instrument::Histogram(Arc::new(Histogram::new())),
            MetricKind::Timer => Instrument::Timer(Arc::new(Timer::new())),
        }
    }

    /// Kind of this instrument
    pub fn kind(&self) -> MetricKind {
        match self {
            Instrument::Counter(_) => MetricKind::Counter,
            Instrument::Gauge(_) => MetricKind::Gauge,
            Instrument::Meter(_) => MetricKind::Meter,
            Instrument::Histogram(_) => MetricKind::Histogram,
            Instrument::Timer(_) => MetricKind::Timer,
        }
    }

    /// Read the current value
    pub fn value(&self) -> MetricValue {
        match self {
            Instrument::Counter(c) => MetricValue::Counter { count: c.get() },
            Instrument::Gauge(g) => MetricValue::Gauge { value: g.get() },
            Instrument::Meter(m) => MetricValue::Meter {
                count: m.count(),
                mean_rate: m.mean_rate(),
            },
            Instrument::Histogram(h) => MetricValue::Histogram(h.summary()),
            Instrument::Timer(t) => MetricValue::Timer(t.summary()),
        }
    }

    /// Whether two handles point at the same instrument
    pub fn same_as(&self, other: &Instrument) -> bool {
        match (self, other) {
            (Instrument::Counter(a), Instrument::Counter(b)) => Arc::ptr_eq(a, b),
            (Instrument::Gauge(a), Instrument::Gauge(b)) => Arc::ptr_eq(a, b),
            (Instrument::Meter(a), Instrument::Meter(b)) => Arc::ptr_eq(a, b),
            (Instrument::Histogram(a), Instrument::Histogram(b)) => Arc::ptr_eq(a, b),
            (Instrument::Timer(a), Instrument::Timer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Concrete instrument types held by an [`Instrument`]
pub trait InstrumentType: Sized {
    /// Kind registered for this type
    const KIND: MetricKind;

    /// Typed handle, `None` when `instrument` holds another kind
    fn downcast(instrument: &Instrument) -> Option<Arc<Self>>;
}

macro_rules! instrument_type {
    ($($variant:ident),* $(,)?) => {
        $(
            impl InstrumentType for $variant {
                const KIND: MetricKind = MetricKind::$variant;

                fn downcast(instrument: &Instrument) -> Option<Arc<Self>> {
                    match instrument {
                        Instrument::$variant(inner) => Some(Arc::clone(inner)),
                        _ => None,
                    }
                }
            }
        )*
    };
}

instrument_type!(Counter, Gauge, Meter, Histogram, Timer);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        assert_eq!(gauge.get(), 0.0);

        gauge.set(100.5);
        assert_eq!(gauge.get(), 100.5);

        gauge.inc();
        assert_eq!(gauge.get(), 101.5);

        gauge.add(-2.0);
        assert_eq!(gauge.get(), 99.5);

        gauge.set(-3.25);
        assert_eq!(gauge.get(), -3.25);
    }

    #[test]
    fn test_meter() {
        let meter = Meter::new();
        meter.mark();
        meter.mark_n(4);

        assert_eq!(meter.count(), 5);
        std::thread::sleep(Duration::from_millis(10));
        assert!(meter.mean_rate() > 0.0);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new();
        assert_eq!(histogram.summary().mean(), 0.0);

        histogram.record(5.0);
        histogram.record(15.0);
        histogram.record(-2.0);
        histogram.record(f64::NAN);

        let summary = histogram.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 18.0);
        assert_eq!(summary.min, -2.0);
        assert_eq!(summary.max, 15.0);
        assert_eq!(summary.last, -2.0);
        assert_eq!(summary.mean(), 6.0);
    }

    #[test]
    fn test_timer_records_milliseconds() {
        let timer = Arc::new(Timer::new());
        timer.record(Duration::from_millis(250));

        let summary = timer.summary();
        assert_eq!(summary.count, 1);
        assert!((summary.max - 250.0).abs() < 1e-9);

        {
            let _guard = timer.start();
        }
        assert_eq!(timer.count(), 2);
    }

    #[test]
    fn test_instrument_kind_roundtrip() {
        for kind in MetricKind::ALL {
            assert_eq!(Instrument::new(kind).kind(), kind);
        }
    }

    #[test]
    fn test_downcast_matches_kind_only() {
        for kind in MetricKind::ALL {
            let instrument = Instrument::new(kind);
            assert_eq!(Counter::downcast(&instrument).is_some(), kind == Counter::KIND);
            assert_eq!(Gauge::downcast(&instrument).is_some(), kind == Gauge::KIND);
            assert_eq!(Meter::downcast(&instrument).is_some(), kind == Meter::KIND);
            assert_eq!(Histogram::downcast(&instrument).is_some(), kind == Histogram::KIND);
            assert_eq!(Timer::downcast(&instrument).is_some(), kind == Timer::KIND);
        }
    }

    #[test]
    fn test_same_as() {
        let a = Instrument::new(MetricKind::Counter);
        let b = a.clone();
        let c = Instrument::new(MetricKind::Counter);

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(!a.same_as(&Instrument::new(MetricKind::Gauge)));
    }

    #[test]
    fn test_value_serializes_with_type_tag() {
        let json = serde_json::to_string(&MetricValue::Counter { count: 7 }).unwrap();
        assert_eq!(json, r#"{"type":"counter","count":7}"#);
    }
}
