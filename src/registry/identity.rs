//! Metric Identity
//!
//! A metric is identified by its name, an ordered set of tags and its kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic integer
    Counter,
    /// Arbitrary numeric value
    Gauge,
    /// Duration distribution
    Timer,
    /// Value distribution
    Histogram,
    /// Event count with rate
    Meter,
}

impl MetricKind {
    /// All kinds
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Counter,
        MetricKind::Gauge,
        MetricKind::Timer,
        MetricKind::Histogram,
        MetricKind::Meter,
    ];

    /// Lowercase name, used as the `mtype` tag on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Timer => "timer",
            MetricKind::Histogram => "histogram",
            MetricKind::Meter => "meter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered key/value tag set.
///
/// Keys are kept sorted; inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a tag
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` into a copy of `self`; keys in `self` win
    pub fn merged_with(&self, other: &Tags) -> Tags {
        let mut merged = other.clone();
        for (k, v) in self.iter() {
            merged.insert(k, v);
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Tags {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Unique identity of an instrument in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    name: String,
    tags: Tags,
    kind: MetricKind,
}

impl MetricId {
    /// Create a new identity (validated on registration)
    pub fn new(name: impl Into<String>, tags: Tags, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            tags,
            kind,
        }
    }

    /// Untagged identity
    pub fn untagged(name: impl Into<String>, kind: MetricKind) -> Self {
        Self::new(name, Tags::new(), kind)
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Kind
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Reject empty names, empty tag keys and control characters, which
    /// cannot be written as a single line
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidIdentity(
                "metric name must not be empty".to_string(),
            ));
        }
        if has_control(&self.name) {
            return Err(Error::InvalidIdentity(format!(
                "metric name {:?} contains control characters",
                self.name
            )));
        }
        for (key, value) in self.tags.iter() {
            if key.trim().is_empty() {
                return Err(Error::InvalidIdentity(format!(
                    "metric '{}' has an empty tag key (value '{}')",
                    self.name, value
                )));
            }
            if has_control(key) || has_control(value) {
                return Err(Error::InvalidIdentity(format!(
                    "metric '{}' tag {:?}={:?} contains control characters",
                    self.name, key, value
                )));
            }
        }
        Ok(())
    }
}

fn has_control(s: &str) -> bool {
    s.chars().any(char::is_control)
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in self.tags.iter() {
            write!(f, ",{}={}", k, v)?;
        }
        write!(f, " ({})", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_tags_are_ordered() {
        let tags = Tags::new().with("route", "values").with("method", "GET");
        let keys: Vec<_> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["method", "route"]);
    }

    #[test]
    fn test_tag_insertion_order_does_not_affect_identity() {
        let a = MetricId::new(
            "requests",
            Tags::from([("a", "1"), ("b", "2")]),
            MetricKind::Counter,
        );
        let b = MetricId::new(
            "requests",
            Tags::from([("b", "2"), ("a", "1")]),
            MetricKind::Counter,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_key_keeps_last_value() {
        let tags = Tags::new().with("status", "200").with("status", "500");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("status"), Some("500"));
    }

    #[test]
    fn test_merged_with_prefers_self() {
        let metric = Tags::from([("app", "override"), ("route", "values")]);
        let env = Tags::from([("app", "sample"), ("host", "web-1")]);

        let merged = metric.merged_with(&env);
        assert_eq!(merged.get("app"), Some("override"));
        assert_eq!(merged.get("host"), Some("web-1"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_validate() {
        assert!(MetricId::untagged("ok", MetricKind::Gauge).validate().is_ok());
        assert_matches!(
            MetricId::untagged("", MetricKind::Gauge).validate(),
            Err(Error::InvalidIdentity(_))
        );
        assert_matches!(
            MetricId::untagged("   ", MetricKind::Gauge).validate(),
            Err(Error::InvalidIdentity(_))
        );
        assert_matches!(
            MetricId::new("x", Tags::from([("", "v")]), MetricKind::Gauge).validate(),
            Err(Error::InvalidIdentity(_))
        );
    }

    #[test]
    fn test_validate_rejects_line_breaks() {
        assert_matches!(
            MetricId::untagged("requests\nevil", MetricKind::Counter).validate(),
            Err(Error::InvalidIdentity(_))
        );
        assert_matches!(
            MetricId::new("requests", Tags::from([("route", "api/values\nevil")]), MetricKind::Counter)
                .validate(),
            Err(Error::InvalidIdentity(_))
        );
        assert_matches!(
            MetricId::new("requests", Tags::from([("ro\rute", "values")]), MetricKind::Counter)
                .validate(),
            Err(Error::InvalidIdentity(_))
        );
        assert!(MetricId::new("requests", Tags::from([("route", "a\\b")]), MetricKind::Counter)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_display() {
        let id = MetricId::new("requests", Tags::from([("route", "values")]), MetricKind::Counter);
        assert_eq!(id.to_string(), "requests,route=values (counter)");
    }
}
