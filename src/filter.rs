//! Metric Filters
//!
//! Pure predicates over a metric identity, composable with AND/OR/NOT.
//!
//! ```ignore
//! let filter = MetricFilter::tag_equals("reporter", "influxdb")
//!     & !MetricFilter::kind(MetricKind::Histogram);
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use crate::registry::{MetricId, MetricKind};

type PredicateFn = dyn Fn(&MetricId) -> bool + Send + Sync;

/// Predicate deciding whether a metric is included in a report
#[derive(Clone, Default)]
pub enum MetricFilter {
    /// Matches everything
    #[default]
    All,
    /// Matches nothing
    None,
    /// Name contains the substring
    NameContains(String),
    /// Name starts with the prefix
    NameStartsWith(String),
    /// Tag key is present
    HasTag(String),
    /// Tag key is present with the given value
    TagEquals(String, String),
    /// Instrument kind
    Kind(MetricKind),
    And(Box<MetricFilter>, Box<MetricFilter>),
    Or(Box<MetricFilter>, Box<MetricFilter>),
    Not(Box<MetricFilter>),
    /// Caller-supplied predicate
    Predicate(Arc<PredicateFn>),
}

impl MetricFilter {
    pub fn name_contains(needle: impl Into<String>) -> Self {
        MetricFilter::NameContains(needle.into())
    }

    pub fn name_starts_with(prefix: impl Into<String>) -> Self {
        MetricFilter::NameStartsWith(prefix.into())
    }

    pub fn has_tag(key: impl Into<String>) -> Self {
        MetricFilter::HasTag(key.into())
    }

    pub fn tag_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        MetricFilter::TagEquals(key.into(), value.into())
    }

    pub fn kind(kind: MetricKind) -> Self {
        MetricFilter::Kind(kind)
    }

    /// Wrap an arbitrary predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&MetricId) -> bool + Send + Sync + 'static,
    {
        MetricFilter::Predicate(Arc::new(f))
    }

    pub fn and(self, other: MetricFilter) -> Self {
        MetricFilter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: MetricFilter) -> Self {
        MetricFilter::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        MetricFilter::Not(Box::new(self))
    }

    /// Evaluate against an identity
    pub fn matches(&self, id: &MetricId) -> bool {
        match self {
            MetricFilter::All => true,
            MetricFilter::None => false,
            MetricFilter::NameContains(needle) => id.name().contains(needle.as_str()),
            MetricFilter::NameStartsWith(prefix) => id.name().starts_with(prefix.as_str()),
            MetricFilter::HasTag(key) => id.tags().contains_key(key),
            MetricFilter::TagEquals(key, value) => id.tags().get(key) == Some(value.as_str()),
            MetricFilter::Kind(kind) => id.kind() == *kind,
            MetricFilter::And(a, b) => a.matches(id) && b.matches(id),
            MetricFilter::Or(a, b) => a.matches(id) || b.matches(id),
            MetricFilter::Not(inner) => !inner.matches(id),
            MetricFilter::Predicate(f) => f(id),
        }
    }
}

impl fmt::Debug for MetricFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricFilter::All => write!(f, "All"),
            MetricFilter::None => write!(f, "None"),
            MetricFilter::NameContains(s) => write!(f, "NameContains({:?})", s),
            MetricFilter::NameStartsWith(s) => write!(f, "NameStartsWith({:?})", s),
            MetricFilter::HasTag(k) => write!(f, "HasTag({:?})", k),
            MetricFilter::TagEquals(k, v) => write!(f, "TagEquals({:?}, {:?})", k, v),
            MetricFilter::Kind(kind) => write!(f, "Kind({})", kind),
            MetricFilter::And(a, b) => write!(f, "({:?} AND {:?})", a, b),
            MetricFilter::Or(a, b) => write!(f, "({:?} OR {:?})", a, b),
            MetricFilter::Not(inner) => write!(f, "NOT {:?}", inner),
            MetricFilter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl BitAnd for MetricFilter {
    type Output = MetricFilter;

    fn bitand(self, rhs: MetricFilter) -> MetricFilter {
        self.and(rhs)
    }
}

impl BitOr for MetricFilter {
    type Output = MetricFilter;

    fn bitor(self, rhs: MetricFilter) -> MetricFilter {
        self.or(rhs)
    }
}

impl Not for MetricFilter {
    type Output = MetricFilter;

    fn not(self) -> MetricFilter {
        MetricFilter::Not(Box::new(self))
    }
}
