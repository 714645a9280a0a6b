//! Metric records and the accumulator side channel.
//!
//! Collectors push [`Metric`]s and transient errors into an
//! [`Accumulator`]. Records render as InfluxDB line protocol (what a
//! telegraf `execd` input expects on stdout) or as JSON.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::Error;

// ============================================================================
// Field Values
// ============================================================================

/// Value of a metric field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl fmt::Display for FieldValue {
    /// Line protocol rendering of the value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}i"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(v) => {
                f.write_char('"')?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            }
        }
    }
}

// ============================================================================
// Metric
// ============================================================================

/// One measurement record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Add a field only when the backend supplied a value.
    pub fn field_opt<V: Into<FieldValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn get_field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Render as one line of InfluxDB line protocol. Empty tag values are
    /// omitted, as the protocol does not allow them.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.name, &[',', ' ']);
        for (k, v) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(&escape(k, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(v, &[',', '=', ' ']));
        }
        let mut sep = ' ';
        for (k, v) in &self.fields {
            line.push(sep);
            line.push_str(&escape(k, &[',', '=', ' ']));
            line.push('=');
            let _ = write!(line, "{v}");
            sep = ',';
        }
        let _ = write!(
            line,
            " {}",
            self.timestamp.timestamp_nanos_opt().unwrap_or_default()
        );
        line
    }

    /// Render as a telegraf-style JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Timestamp precision for a polling interval: whole seconds for intervals
/// of a second or more, finer for shorter ones.
pub fn precision_for(interval: Duration) -> Duration {
    if interval >= Duration::from_secs(1) {
        Duration::from_secs(1)
    } else if interval >= Duration::from_millis(1) {
        Duration::from_millis(1)
    } else if interval >= Duration::from_micros(1) {
        Duration::from_micros(1)
    } else {
        Duration::from_nanos(1)
    }
}

// ============================================================================
// Accumulator
// ============================================================================

/// Collects the records and transient errors of one gather cycle.
#[derive(Debug, Default)]
pub struct Accumulator {
    metrics: Vec<Metric>,
    errors: Vec<Error>,
    precision: Option<TimeDelta>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round record timestamps down to `precision`.
    pub fn set_precision(&mut self, precision: Duration) {
        self.precision = TimeDelta::from_std(precision).ok();
    }

    pub fn add_metric(&mut self, mut metric: Metric) {
        if let Some(precision) = self.precision {
            if let Ok(ts) = metric.timestamp.duration_trunc(precision) {
                metric.timestamp = ts;
            }
        }
        self.metrics.push(metric);
    }

    /// Record a transient error; it is logged and kept for the report.
    pub fn add_error(&mut self, err: Error) {
        warn!(error = %err, "vcstat collection error");
        self.errors.push(err);
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Records with the given measurement name.
    pub fn measurements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Metric> + 'a {
        self.metrics.iter().filter(move |m| m.name == name)
    }

    pub fn into_parts(self) -> (Vec<Metric>, Vec<Error>) {
        (self.metrics, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_line_protocol() {
        let m = Metric::new("vcstat_host_hba")
            .tag("vcenter", "vc.local")
            .tag("clustername", "")
            .tag("device", "vmhba 0")
            .field("link_state", "link-up")
            .field("link_state_code", 0i64)
            .with_timestamp(ts());
        assert_eq!(
            m.to_line_protocol(),
            "vcstat_host_hba,device=vmhba\\ 0,vcenter=vc.local link_state=\"link-up\",link_state_code=0i 1700000000000000000"
        );
    }

    #[test]
    fn test_unknown_fields_are_omitted() {
        let m = Metric::new("vcstat_datastore")
            .field_opt("capacity", Some(10i64))
            .field_opt::<bool>("accessible", None)
            .with_timestamp(ts());
        assert_eq!(m.get_field("capacity"), Some(&FieldValue::Int(10)));
        assert!(m.get_field("accessible").is_none());
        assert_eq!(m.to_line_protocol(), "vcstat_datastore capacity=10i 1700000000000000000");
    }

    #[test]
    fn test_field_rendering() {
        assert_eq!(FieldValue::from(true).to_string(), "true");
        assert_eq!(FieldValue::from(1.5).to_string(), "1.5");
        assert_eq!(FieldValue::from("a\"b").to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn test_json_rendering() {
        let m = Metric::new("internal_vcstat")
            .tag("vcenter", "vc.local")
            .field("sessions_created", 1i64)
            .with_timestamp(ts());
        assert_eq!(
            m.to_json().unwrap(),
            r#"{"name":"internal_vcstat","tags":{"vcenter":"vc.local"},"fields":{"sessions_created":1},"timestamp":1700000000}"#
        );
    }

    #[test]
    fn test_precision_truncates_timestamps() {
        let mut acc = Accumulator::new();
        acc.set_precision(precision_for(Duration::from_secs(60)));
        let ts = Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap();
        acc.add_metric(Metric::new("m").field("v", 1i64).with_timestamp(ts));
        assert_eq!(acc.metrics()[0].timestamp.timestamp_subsec_nanos(), 0);
        assert_eq!(precision_for(Duration::from_millis(10)), Duration::from_millis(1));
    }

    #[test]
    fn test_accumulator_keeps_errors() {
        let mut acc = Accumulator::new();
        acc.add_error(Error::Query("one".into()));
        acc.add_metric(Metric::new("a"));
        acc.add_metric(Metric::new("b"));
        assert_eq!(acc.errors().len(), 1);
        assert_eq!(acc.measurements("a").count(), 1);
        let (metrics, errors) = acc.into_parts();
        assert_eq!((metrics.len(), errors.len()), (2, 1));
    }
}
