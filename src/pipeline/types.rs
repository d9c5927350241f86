//! Core data structures shared across the pipeline
//!
//! - `DomainRecord` - decoded, immutable event scoped to one entity key
//! - `Alert` - one-shot notification produced by a detector
//! - `KeySummary` / `Leaderboard` - periodic digests for the alert sink

use super::aggregates::{AggregateState, RankMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single named value carried by a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            FieldValue::Number(_) => None,
        }
    }
}

/// Canonical decoded event
///
/// Produced by a `RecordDecoder`, never mutated afterwards. Windows and alerts
/// share the same allocation through `Arc<DomainRecord>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Entity the record belongs to (player, ticker symbol, sensor id)
    pub entity_key: String,

    /// Event time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Named numeric/text values
    pub fields: BTreeMap<String, FieldValue>,
}

impl DomainRecord {
    pub fn new(entity_key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_key: entity_key.into(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_number(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), FieldValue::Number(value));
        self
    }

    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldValue::Text(value.into()));
        self
    }

    /// Numeric value of `field`, if present and numeric
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_number)
    }

    /// Text value of `field`, if present and textual
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }

    /// Iterate over numeric fields only
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_number().map(|v| (name.as_str(), v)))
    }
}

/// Alert categories, one per detector family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "PLATEAU")]
    Plateau,
    #[serde(rename = "THRESHOLD_BURST")]
    ThresholdBurst,
    #[serde(rename = "COMPOUND")]
    Compound,
    #[serde(rename = "VOLUME_SPIKE")]
    VolumeSpike,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Plateau => "PLATEAU",
            AlertKind::ThresholdBurst => "THRESHOLD_BURST",
            AlertKind::Compound => "COMPOUND",
            AlertKind::VolumeSpike => "VOLUME_SPIKE",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a field over the duration window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    InsufficientData,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered an alert: the newest record alone, or the whole window
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", content = "records", rename_all = "snake_case")]
pub enum AlertContext {
    Record(Arc<DomainRecord>),
    Window(Vec<Arc<DomainRecord>>),
}

/// One-shot notification emitted by a detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,

    /// Name of the detector that fired (e.g. "triple_double")
    pub detector: String,

    pub entity_key: String,
    pub context: AlertContext,

    /// Detector-specific measurement (spread, percent change, ratio, ...)
    pub metric: f64,

    /// Event time of the triggering record
    pub timestamp: DateTime<Utc>,

    /// Human-readable description for display sinks
    pub message: String,

    /// Trend label of the duration window at evaluation time
    pub trend: Option<Trend>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        detector: impl Into<String>,
        entity_key: impl Into<String>,
        context: AlertContext,
        metric: f64,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            detector: detector.into(),
            entity_key: entity_key.into(),
            context,
            metric,
            timestamp,
            message: message.into(),
            trend: None,
        }
    }
}

/// Periodic per-key digest (every N records for a key)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySummary {
    pub entity_key: String,
    pub aggregate: AggregateState,
    pub trend: Trend,
    pub latest: Arc<DomainRecord>,
}

/// Ranked view over all tracked keys
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaderboard {
    pub title: String,
    pub metric: RankMetric,
    pub field: String,
    pub entries: Vec<(String, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_accessors() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap();
        let record = DomainRecord::new("AAPL", ts)
            .with_number("price", 175.25)
            .with_text("exchange", "NASDAQ");

        assert_eq!(record.number("price"), Some(175.25));
        assert_eq!(record.number("exchange"), None);
        assert_eq!(record.text("exchange"), Some("NASDAQ"));
        assert_eq!(record.numeric_fields().count(), 1);
    }

    #[test]
    fn test_alert_serializes_with_context_scope() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let record = Arc::new(DomainRecord::new("LeBron James", ts).with_number("points", 31.0));
        let alert = Alert::new(
            AlertKind::Compound,
            "triple_double",
            "LeBron James",
            AlertContext::Record(record),
            3.0,
            ts,
            "TRIPLE_DOUBLE",
        );

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "COMPOUND");
        assert_eq!(json["context"]["scope"], "record");
        assert_eq!(json["context"]["records"]["fields"]["points"], 31.0);
        assert!(json["trend"].is_null());
    }
}
