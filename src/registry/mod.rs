//! Metric Registry
//!
//! In-memory store of named, tagged instruments shared by every application
//! thread and every report job.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MetricRegistry                          │
//! │  DashMap<MetricId, Instrument>  (sharded, fine-grained locks) │
//! ├──────────────────────────────────────────────────────────────┤
//! │  writers ──▶ Arc<Counter|Gauge|Meter>     (atomics)           │
//! │  writers ──▶ Arc<Histogram|Timer>         (per-instrument lock)│
//! │  report jobs ──▶ snapshot(filter)         (copy-on-read)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod identity;
mod instruments;

pub use identity::{MetricId, MetricKind, Tags};
pub use instruments::{
    Counter, Gauge, Histogram, HistogramSummary, Instrument, InstrumentType, Meter, MetricValue,
    Timer, TimerGuard,
};

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::MetricFilter;

/// One metric read at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub id: MetricId,
    pub value: MetricValue,
}

/// Registry of instruments keyed by identity
#[derive(Debug, Default)]
pub struct MetricRegistry {
    instruments: DashMap<MetricId, Instrument>,
}

impl MetricRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared registry
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register an instrument, returning the existing one if the identity is
    /// already present
    pub fn register(&self, id: MetricId) -> Result<Instrument> {
        id.validate()?;

        if let Some(existing) = self.instruments.get(&id) {
            return Ok(existing.value().clone());
        }

        debug!(metric = %id, "Registering instrument");
        let kind = id.kind();
        let entry = self
            .instruments
            .entry(id)
            .or_insert_with(|| Instrument::new(kind));
        Ok(entry.value().clone())
    }

    /// Get or create an instrument of type `T`
    pub fn instrument<T: InstrumentType>(&self, name: &str, tags: Tags) -> Result<Arc<T>> {
        let instrument = self.register(MetricId::new(name, tags, T::KIND))?;
        // The kind is part of the key, so the stored variant is always `T`
        T::downcast(&instrument).ok_or_else(|| {
            Error::Internal(format!("instrument '{}' is not a {}", name, T::KIND))
        })
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str, tags: Tags) -> Result<Arc<Counter>> {
        self.instrument(name, tags)
    }

    /// Get or create a gauge
    pub fn gauge(&self, name: &str, tags: Tags) -> Result<Arc<Gauge>> {
        self.instrument(name, tags)
    }

    /// Get or create a meter
    pub fn meter(&self, name: &str, tags: Tags) -> Result<Arc<Meter>> {
        self.instrument(name, tags)
    }

    /// Get or create a histogram
    pub fn histogram(&self, name: &str, tags: Tags) -> Result<Arc<Histogram>> {
        self.instrument(name, tags)
    }

    /// Get or create a timer
    pub fn timer(&self, name: &str, tags: Tags) -> Result<Arc<Timer>> {
        self.instrument(name, tags)
    }

    /// Look up an instrument without registering it
    pub fn get(&self, id: &MetricId) -> Option<Instrument> {
        self.instruments.get(id).map(|entry| entry.value().clone())
    }

    /// Remove an instrument. Outstanding handles keep working but are no
    /// longer reported.
    pub fn remove(&self, id: &MetricId) -> Option<Instrument> {
        self.instruments.remove(id).map(|(_, instrument)| instrument)
    }

    /// Remove all instruments
    pub fn clear(&self) {
        self.instruments.clear();
    }

    /// Number of registered instruments
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Read every instrument matching `filter`, sorted by identity.
    ///
    /// Each shard is read-locked only while its entries are copied out;
    /// instrument values are read through atomics or their own lock.
    pub fn snapshot(&self, filter: &MetricFilter) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = self
            .instruments
            .iter()
            .filter(|entry| filter.matches(entry.key()))
            .map(|entry| MetricSample {
                id: entry.key().clone(),
                value: entry.value().value(),
            })
            .collect();

        samples.sort_by(|a, b| a.id.cmp(&b.id));
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_register_is_idempotent() {
        let registry = MetricRegistry::new();
        let id = MetricId::new("requests", Tags::from([("route", "values")]), MetricKind::Counter);

        let first = registry.register(id.clone()).unwrap();
        let second = registry.register(id).unwrap();

        assert!(first.same_as(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_counter_returned() {
        let registry = MetricRegistry::new();

        let c1 = registry.counter("test", Tags::new()).unwrap();
        let c2 = registry.counter("test", Tags::new()).unwrap();

        c1.inc();
        assert_eq!(c2.get(), 1);
    }

    #[test]
    fn test_kind_is_part_of_identity() {
        let registry = MetricRegistry::new();

        registry.counter("requests", Tags::new()).unwrap();
        registry.meter("requests", Tags::new()).unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_tags_are_part_of_identity() {
        let registry = MetricRegistry::new();

        let ok = registry.counter("requests", Tags::from([("status", "200")])).unwrap();
        let err = registry.counter("requests", Tags::from([("status", "500")])).unwrap();
        ok.add(3);
        err.inc();

        assert_eq!(registry.len(), 2);
        assert_eq!(ok.get(), 3);
        assert_eq!(err.get(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = MetricRegistry::new();

        assert_matches!(
            registry.counter("", Tags::new()),
            Err(Error::InvalidIdentity(_))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_line_break_in_tag_rejected() {
        let registry = MetricRegistry::new();

        assert_matches!(
            registry.counter("requests", Tags::from([("route", "api/values\nevil")])),
            Err(Error::InvalidIdentity(_))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_filters_and_sorts() {
        let registry = MetricRegistry::new();
        registry.counter("zeta", Tags::new()).unwrap().add(2);
        registry.gauge("alpha", Tags::new()).unwrap().set(1.5);
        registry.counter("internal_only", Tags::new()).unwrap();

        let filter = MetricFilter::name_contains("internal").not();
        let samples = registry.snapshot(&filter);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].id.name(), "alpha");
        assert_eq!(samples[0].value, MetricValue::Gauge { value: 1.5 });
        assert_eq!(samples[1].id.name(), "zeta");
        assert_eq!(samples[1].value, MetricValue::Counter { count: 2 });
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = MetricRegistry::new();
        let id = MetricId::untagged("gone", MetricKind::Gauge);
        registry.register(id.clone()).unwrap();
        registry.counter("kept", Tags::new()).unwrap();

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = MetricRegistry::shared();
        let threads = 8;
        let per_thread = 10_000 / threads;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        registry
                            .counter("hits", Tags::from([("route", "values")]))
                            .unwrap()
                            .inc();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let samples = registry.snapshot(&MetricFilter::All);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, MetricValue::Counter { count: 10_000 });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_repeated_registration_yields_one_instrument(
            name in "[a-z]{1,8}",
            repeats in 1usize..20,
            kind_index in 0usize..5,
        ) {
            let registry = MetricRegistry::new();
            let id = MetricId::new(name, Tags::new(), MetricKind::ALL[kind_index]);

            let first = registry.register(id.clone()).unwrap();
            for _ in 0..repeats {
                let again = registry.register(id.clone()).unwrap();
                prop_assert!(first.same_as(&again));
            }
            prop_assert_eq!(registry.len(), 1);
        }
    }
}
