//! Signal detection with configurable thresholds
//!
//! Each detector reads one window (count- or duration-bounded) plus the key's
//! cumulative aggregate and returns at most one alert. A detector that cannot
//! evaluate returns `InsufficientData`, which the engine treats as "no alert".

use super::aggregates::AggregateState;
use super::types::{Alert, AlertContext, AlertKind, Trend};
use super::windows::{WindowKind, WindowView};
use std::sync::Arc;
use thiserror::Error;

/// Detector could not evaluate (partial window, missing field, zero baseline)
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{detector}: insufficient data ({reason})")]
pub struct InsufficientData {
    pub detector: String,
    pub reason: String,
}

impl InsufficientData {
    fn new(detector: &str, reason: impl Into<String>) -> Self {
        Self {
            detector: detector.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Evaluation = Result<Option<Alert>, InsufficientData>;

/// A rule evaluated on every ingest for the record's key
pub trait Detector: Send + Sync {
    /// Unique name, also used as the alert counter key in `AggregateState`
    fn name(&self) -> &str;

    fn kind(&self) -> AlertKind;

    /// Window this detector reads
    fn window(&self) -> WindowKind;

    fn evaluate(&self, window: &WindowView<'_>, aggregate: &AggregateState) -> Evaluation;
}

fn newest_value(name: &str, window: &WindowView<'_>, field: &str) -> Result<f64, InsufficientData> {
    window
        .newest()
        .and_then(|record| record.number(field))
        .ok_or_else(|| InsufficientData::new(name, format!("newest record has no '{}'", field)))
}

/// Fires when a full count window of `field` stays within `threshold`
///
/// Spread is `max - min`; the condition is `spread <= threshold`.
pub struct PlateauDetector {
    name: String,
    field: String,
    threshold: f64,
}

impl PlateauDetector {
    pub fn new(name: impl Into<String>, field: impl Into<String>, threshold: f64) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            threshold,
        }
    }
}

impl Detector for PlateauDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlertKind {
        AlertKind::Plateau
    }

    fn window(&self) -> WindowKind {
        WindowKind::Recent
    }

    fn evaluate(&self, window: &WindowView<'_>, _aggregate: &AggregateState) -> Evaluation {
        if !window.is_full() {
            return Err(InsufficientData::new(
                &self.name,
                format!("window holds {} of {}", window.len(), window.policy()),
            ));
        }

        let values = window.values(&self.field).ok_or_else(|| {
            InsufficientData::new(&self.name, format!("window member missing '{}'", self.field))
        })?;

        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let spread = max - min;

        if spread > self.threshold {
            return Ok(None);
        }

        let newest = match window.newest() {
            Some(record) => record,
            None => return Err(InsufficientData::new(&self.name, "empty window")),
        };
        let latest = values.last().copied().unwrap_or_default();

        Ok(Some(Alert::new(
            self.kind(),
            &self.name,
            window.entity_key(),
            AlertContext::Window(window.snapshot()),
            spread,
            newest.timestamp,
            format!(
                "{}: {} {} held within {:.2} over last {} readings (latest {:.2})",
                self.name.to_uppercase(),
                window.entity_key(),
                self.field,
                spread,
                values.len(),
                latest
            ),
        )))
    }
}

/// Fires on a single large value or a large move versus the previous record
///
/// - absolute: `current >= absolute`
/// - relative: `|(current - previous) / previous| * 100 >= relative_pct`,
///   skipped when `previous == 0`
pub struct BurstDetector {
    name: String,
    field: String,
    absolute: Option<f64>,
    relative_pct: Option<f64>,
}

impl BurstDetector {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        absolute: Option<f64>,
        relative_pct: Option<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            absolute,
            relative_pct,
        }
    }

    fn percent_change(&self, window: &WindowView<'_>, current: f64) -> Result<f64, InsufficientData> {
        let previous = window
            .previous()
            .and_then(|record| record.number(&self.field))
            .ok_or_else(|| InsufficientData::new(&self.name, "no previous value"))?;

        if previous == 0.0 {
            return Err(InsufficientData::new(&self.name, "previous value is zero"));
        }

        Ok((current - previous) / previous * 100.0)
    }
}

impl Detector for BurstDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlertKind {
        AlertKind::ThresholdBurst
    }

    fn window(&self) -> WindowKind {
        WindowKind::Recent
    }

    fn evaluate(&self, window: &WindowView<'_>, _aggregate: &AggregateState) -> Evaluation {
        let current = newest_value(&self.name, window, &self.field)?;
        let newest = match window.newest() {
            Some(record) => Arc::clone(record),
            None => return Err(InsufficientData::new(&self.name, "empty window")),
        };

        if let Some(absolute) = self.absolute {
            if current >= absolute {
                let message = format!(
                    "{}: {} {} reached {} (threshold {})",
                    self.name.to_uppercase(),
                    window.entity_key(),
                    self.field,
                    current,
                    absolute
                );
                let timestamp = newest.timestamp;
                return Ok(Some(Alert::new(
                    self.kind(),
                    &self.name,
                    window.entity_key(),
                    AlertContext::Record(newest),
                    current,
                    timestamp,
                    message,
                )));
            }
        }

        let Some(relative_pct) = self.relative_pct else {
            return Ok(None);
        };

        let change_pct = self.percent_change(window, current)?;
        if change_pct.abs() < relative_pct {
            return Ok(None);
        }

        let direction = if change_pct > 0.0 { "UP" } else { "DOWN" };
        let message = format!(
            "{}: {} moved {} {:.2}% to {:.2}",
            self.name.to_uppercase(),
            window.entity_key(),
            direction,
            change_pct.abs(),
            current
        );
        let timestamp = newest.timestamp;
        Ok(Some(Alert::new(
            self.kind(),
            &self.name,
            window.entity_key(),
            AlertContext::Record(newest),
            change_pct,
            timestamp,
            message,
        )))
    }
}

/// Fires when at least `min_categories` of `fields` each reach `field_min`
/// within the newest record
pub struct CompoundDetector {
    name: String,
    fields: Vec<String>,
    field_min: f64,
    min_categories: usize,
}

impl CompoundDetector {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<String>,
        field_min: f64,
        min_categories: usize,
    ) -> Self {
        Self {
            name: name.into(),
            fields,
            field_min,
            min_categories,
        }
    }
}

impl Detector for CompoundDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlertKind {
        AlertKind::Compound
    }

    fn window(&self) -> WindowKind {
        WindowKind::Recent
    }

    fn evaluate(&self, window: &WindowView<'_>, _aggregate: &AggregateState) -> Evaluation {
        let newest = window
            .newest()
            .ok_or_else(|| InsufficientData::new(&self.name, "empty window"))?;

        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = newest.number(field).ok_or_else(|| {
                InsufficientData::new(&self.name, format!("record missing '{}'", field))
            })?;
            values.push((field.as_str(), value));
        }

        let met = values.iter().filter(|(_, value)| *value >= self.field_min).count();
        if met < self.min_categories {
            return Ok(None);
        }

        let breakdown = values
            .iter()
            .map(|(field, value)| format!("{} {}", value, field))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Some(Alert::new(
            self.kind(),
            &self.name,
            window.entity_key(),
            AlertContext::Record(Arc::clone(newest)),
            met as f64,
            newest.timestamp,
            format!("{}: {} {}", self.name.to_uppercase(), window.entity_key(), breakdown),
        )))
    }
}

/// Fires when the newest value exceeds the trailing average by `spike_ratio`
///
/// The trailing average excludes the newest record. The condition is
/// `newest > average * (1 + spike_ratio)`, so any positive value spikes over a
/// zero baseline. The metric is `newest / average` (infinite over zero).
pub struct SpikeDetector {
    name: String,
    field: String,
    spike_ratio: f64,
}

impl SpikeDetector {
    pub fn new(name: impl Into<String>, field: impl Into<String>, spike_ratio: f64) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            spike_ratio,
        }
    }
}

impl Detector for SpikeDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlertKind {
        AlertKind::VolumeSpike
    }

    fn window(&self) -> WindowKind {
        WindowKind::Horizon
    }

    fn evaluate(&self, window: &WindowView<'_>, _aggregate: &AggregateState) -> Evaluation {
        if window.len() < 2 {
            return Err(InsufficientData::new(
                &self.name,
                format!("need 2 members, have {}", window.len()),
            ));
        }

        let values = window.values(&self.field).ok_or_else(|| {
            InsufficientData::new(&self.name, format!("window member missing '{}'", self.field))
        })?;
        let (current, prior) = match values.split_last() {
            Some((current, prior)) => (*current, prior),
            None => return Err(InsufficientData::new(&self.name, "empty window")),
        };

        let average = prior.iter().sum::<f64>() / prior.len() as f64;
        let threshold = average * (1.0 + self.spike_ratio);
        if current <= threshold {
            return Ok(None);
        }

        let ratio = if average > 0.0 {
            current / average
        } else {
            f64::INFINITY
        };

        let newest = match window.newest() {
            Some(record) => record,
            None => return Err(InsufficientData::new(&self.name, "empty window")),
        };

        Ok(Some(Alert::new(
            self.kind(),
            &self.name,
            window.entity_key(),
            AlertContext::Window(window.snapshot()),
            ratio,
            newest.timestamp,
            format!(
                "{}: {} {} {:.0} vs trailing average {:.0} ({:.2}x)",
                self.name.to_uppercase(),
                window.entity_key(),
                self.field,
                current,
                average,
                ratio
            ),
        )))
    }
}

/// Labels the duration window's trajectory; never alerts on its own
///
/// Compares first and last values: percent change above `threshold_pct` is
/// rising, below `-threshold_pct` falling, otherwise stable.
#[derive(Debug, Clone)]
pub struct TrendClassifier {
    field: String,
    threshold_pct: f64,
    min_members: usize,
}

impl TrendClassifier {
    pub fn new(field: impl Into<String>, threshold_pct: f64, min_members: usize) -> Self {
        Self {
            field: field.into(),
            threshold_pct,
            min_members: min_members.max(2),
        }
    }

    pub fn classify(&self, window: &WindowView<'_>) -> Trend {
        if window.len() < self.min_members {
            return Trend::InsufficientData;
        }

        let first = window.oldest().and_then(|record| record.number(&self.field));
        let last = window.newest().and_then(|record| record.number(&self.field));

        match (first, last) {
            (Some(first), Some(last)) if first != 0.0 => {
                let change_pct = (last - first) / first * 100.0;
                if change_pct > self.threshold_pct {
                    Trend::Rising
                } else if change_pct < -self.threshold_pct {
                    Trend::Falling
                } else {
                    Trend::Stable
                }
            }
            _ => Trend::InsufficientData,
        }
    }
}
