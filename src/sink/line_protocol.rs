//! Line protocol encoding
//!
//! One line per metric, health check and environment record:
//!
//! ```text
//! measurement,tag1=v1,tag2=v2 field1=1i,field2=0.5 1700000000000000000
//! ```

use std::fmt::Write;

use crate::health::HealthCheckResult;
use crate::registry::{HistogramSummary, MetricSample, MetricValue, Tags};
use crate::snapshot::{EnvironmentInfo, Snapshot};

/// Encoded request body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinePayload {
    pub body: String,
    pub lines: usize,
}

impl LinePayload {
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }
}

enum FieldValue<'a> {
    Int(u64),
    Float(f64),
    Str(&'a str),
}

/// Encode a whole snapshot
pub fn encode_snapshot(snapshot: &Snapshot) -> LinePayload {
    let timestamp = snapshot.timestamp.timestamp_nanos_opt().unwrap_or_default();
    let global = snapshot.global_tags();
    let mut payload = LinePayload::default();

    for sample in &snapshot.metrics {
        push_metric(&mut payload, sample, &global, timestamp);
    }

    for check in &snapshot.health {
        push_health(&mut payload, check, &global, timestamp);
    }

    if let Some(env) = &snapshot.environment {
        push_environment(&mut payload, env, &global, timestamp);
    }

    payload
}

fn push_metric(payload: &mut LinePayload, sample: &MetricSample, global: &Tags, ts: i64) {
    let tags = sample
        .id
        .tags()
        .clone()
        .with("mtype", sample.id.kind().as_str())
        .merged_with(global);

    let fields = match &sample.value {
        MetricValue::Counter { count } => vec![("value", FieldValue::Int(*count))],
        MetricValue::Gauge { value } => vec![("value", FieldValue::Float(*value))],
        MetricValue::Meter { count, mean_rate } => vec![
            ("count", FieldValue::Int(*count)),
            ("mean_rate", FieldValue::Float(*mean_rate)),
        ],
        MetricValue::Histogram(summary) | MetricValue::Timer(summary) => summary_fields(summary),
    };

    push_line(payload, sample.id.name(), &tags, &fields, ts);
}

fn summary_fields(summary: &HistogramSummary) -> Vec<(&'static str, FieldValue<'static>)> {
    let mut fields = vec![("count", FieldValue::Int(summary.count))];
    if summary.count > 0 {
        fields.extend([
            ("sum", FieldValue::Float(summary.sum)),
            ("min", FieldValue::Float(summary.min)),
            ("max", FieldValue::Float(summary.max)),
            ("mean", FieldValue::Float(summary.mean())),
            ("last", FieldValue::Float(summary.last)),
        ]);
    }
    fields
}

fn push_health(payload: &mut LinePayload, check: &HealthCheckResult, global: &Tags, ts: i64) {
    let tags = Tags::new()
        .with("check", check.name.as_str())
        .with("mtype", "health")
        .merged_with(global);

    let status = check.status.to_string();
    let mut fields = vec![
        ("status", FieldValue::Str(&status)),
        ("healthy", FieldValue::Float(check.status.score())),
    ];
    if let Some(message) = &check.message {
        fields.push(("message", FieldValue::Str(message)));
    }

    push_line(payload, "health", &tags, &fields, ts);
}

fn push_environment(payload: &mut LinePayload, env: &EnvironmentInfo, global: &Tags, ts: i64) {
    let tags = Tags::new().with("mtype", "environment").merged_with(global);
    let fields = vec![
        ("os", FieldValue::Str(&env.os)),
        ("pid", FieldValue::Int(u64::from(env.pid))),
    ];

    push_line(payload, "environment", &tags, &fields, ts);
}

fn push_line(
    payload: &mut LinePayload,
    measurement: &str,
    tags: &Tags,
    fields: &[(&str, FieldValue<'_>)],
    ts: i64,
) {
    let mut encoded_fields = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let value = match value {
            FieldValue::Int(v) => format!("{}i", v),
            // Non-finite floats are not representable on the wire
            FieldValue::Float(v) if !v.is_finite() => continue,
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Str(s) => format!("\"{}\"", escape_string(s)),
        };
        encoded_fields.push(format!("{}={}", escape_key(key), value));
    }

    if encoded_fields.is_empty() {
        return;
    }

    let line = &mut payload.body;
    line.push_str(&escape_measurement(measurement));
    for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
        let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
    }
    line.push(' ');
    line.push_str(&encoded_fields.join(","));
    let _ = writeln!(line, " {}", ts);
    payload.lines += 1;
}

fn escape_measurement(s: &str) -> String {
    let escaped = replace_control(s).replace(',', "\\,").replace(' ', "\\ ");
    double_trailing_backslash(escaped)
}

/// Escaping for tag keys, tag values and field keys
fn escape_key(s: &str) -> String {
    let escaped = replace_control(s)
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ");
    double_trailing_backslash(escaped)
}

fn escape_string(s: &str) -> String {
    replace_control(s)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

/// Line protocol has no escape for line breaks; one record must stay on one line
fn replace_control(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// A trailing `\` would escape the separator that follows
fn double_trailing_backslash(mut s: String) -> String {
    let trailing = s.len() - s.trim_end_matches('\\').len();
    if trailing % 2 == 1 {
        s.push('\\');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthCheckResult;
    use crate::registry::{MetricId, MetricKind};
    use chrono::{TimeZone, Utc};

    fn ts() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn sample(name: &str, tags: Tags, value: MetricValue) -> MetricSample {
        let kind = match value {
            MetricValue::Counter { .. } => MetricKind::Counter,
            MetricValue::Gauge { .. } => MetricKind::Gauge,
            MetricValue::Meter { .. } => MetricKind::Meter,
            MetricValue::Histogram(_) => MetricKind::Histogram,
            MetricValue::Timer(_) => MetricKind::Timer,
        };
        MetricSample {
            id: MetricId::new(name, tags, kind),
            value,
        }
    }

    #[test]
    fn test_counter_line() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "http_requests",
                Tags::from([("route", "values")]),
                MetricValue::Counter { count: 42 },
            )],
        );

        let payload = encode_snapshot(&snapshot);
        assert_eq!(payload.lines, 1);
        assert_eq!(
            payload.body,
            "http_requests,mtype=counter,route=values value=42i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_gauge_and_meter_lines() {
        let snapshot = Snapshot::new(
            ts(),
            vec![
                sample("active", Tags::new(), MetricValue::Gauge { value: 2.5 }),
                sample(
                    "throughput",
                    Tags::new(),
                    MetricValue::Meter {
                        count: 10,
                        mean_rate: 0.5,
                    },
                ),
            ],
        );

        let body = encode_snapshot(&snapshot).body;
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines[0], "active,mtype=gauge value=2.5 1700000000000000000");
        assert_eq!(
            lines[1],
            "throughput,mtype=meter count=10i,mean_rate=0.5 1700000000000000000"
        );
    }

    #[test]
    fn test_timer_line() {
        let summary = HistogramSummary {
            count: 2,
            sum: 30.0,
            min: 10.0,
            max: 20.0,
            last: 20.0,
        };
        let snapshot = Snapshot::new(
            ts(),
            vec![sample("latency", Tags::new(), MetricValue::Timer(summary))],
        );

        assert_eq!(
            encode_snapshot(&snapshot).body,
            "latency,mtype=timer count=2i,sum=30,min=10,max=20,mean=15,last=20 1700000000000000000\n"
        );
    }

    #[test]
    fn test_empty_histogram_emits_count_only() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "sizes",
                Tags::new(),
                MetricValue::Histogram(HistogramSummary::default()),
            )],
        );

        assert_eq!(
            encode_snapshot(&snapshot).body,
            "sizes,mtype=histogram count=0i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_escaping() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "request count,total",
                Tags::from([("path", "/api/a=b"), ("client id", "x,y")]),
                MetricValue::Counter { count: 1 },
            )],
        );

        assert_eq!(
            encode_snapshot(&snapshot).body,
            "request\\ count\\,total,client\\ id=x\\,y,mtype=counter,path=/api/a\\=b value=1i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_line_breaks_never_split_a_record() {
        let mut snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "requests",
                Tags::from([("route", "api/values\nevil")]),
                MetricValue::Counter { count: 1 },
            )],
        );
        snapshot.health = vec![HealthCheckResult::unhealthy("db", "line one\r\nline two")];

        let payload = encode_snapshot(&snapshot);

        assert_eq!(payload.lines, 2);
        assert_eq!(payload.body.lines().count(), payload.lines);
        assert!(payload.body.contains("route=api/values\\ evil"));
        assert!(payload.body.contains("message=\"line one  line two\""));
    }

    #[test]
    fn test_trailing_backslash_doubled() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "paths\\",
                Tags::from([("dir", "C:\\")]),
                MetricValue::Counter { count: 1 },
            )],
        );

        assert_eq!(
            encode_snapshot(&snapshot).body,
            "paths\\\\,dir=C:\\\\,mtype=counter value=1i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_non_finite_gauge_dropped() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample("broken", Tags::new(), MetricValue::Gauge { value: f64::NAN })],
        );

        assert!(encode_snapshot(&snapshot).is_empty());
    }

    #[test]
    fn test_empty_tag_value_skipped() {
        let snapshot = Snapshot::new(
            ts(),
            vec![sample(
                "x",
                Tags::from([("blank", "")]),
                MetricValue::Counter { count: 1 },
            )],
        );

        assert_eq!(
            encode_snapshot(&snapshot).body,
            "x,mtype=counter value=1i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_health_and_environment_lines() {
        let mut snapshot = Snapshot::new(ts(), vec![]).with_environment(EnvironmentInfo {
            host: "web-1".into(),
            app_name: "sample".into(),
            version: "1.0".into(),
            os: "linux".into(),
            pid: 7,
        });
        snapshot.health = vec![
            HealthCheckResult::healthy("Working Set"),
            HealthCheckResult::unhealthy("db", "said \"no\""),
        ];

        let payload = encode_snapshot(&snapshot);
        let lines: Vec<_> = payload.body.lines().collect();

        assert_eq!(payload.lines, 3);
        assert_eq!(
            lines[0],
            "health,app=sample,check=Working\\ Set,mtype=health,server=web-1,version=1.0 status=\"Healthy\",healthy=1 1700000000000000000"
        );
        assert_eq!(
            lines[1],
            "health,app=sample,check=db,mtype=health,server=web-1,version=1.0 status=\"Unhealthy\",healthy=0,message=\"said \\\"no\\\"\" 1700000000000000000"
        );
        assert_eq!(
            lines[2],
            "environment,app=sample,mtype=environment,server=web-1,version=1.0 os=\"linux\",pid=7i 1700000000000000000"
        );
    }
}
