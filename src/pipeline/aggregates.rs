//! Cumulative per-key statistics that outlive the sliding windows
//!
//! Updates are O(1) per numeric field. Averages, ranges and rates are derived
//! at query time from running sums and counts, never stored.

use super::types::DomainRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Running statistics for one numeric field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl FieldStats {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
    }

    /// `sum / count`, computed on demand
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn range(&self) -> Option<f64> {
        (self.count > 0).then(|| self.max - self.min)
    }

    /// Combine with stats gathered elsewhere; `last` follows `other` when `other_is_newer`
    fn merge(&mut self, other: &FieldStats, other_is_newer: bool) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.sum += other.sum;
        if other_is_newer {
            self.last = other.last;
        }
    }
}

/// Per-key cumulative summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateState {
    pub entity_key: String,

    /// Records seen for this key (duplicates included)
    pub count: u64,

    pub fields: BTreeMap<String, FieldStats>,

    /// Alerts fired per detector name
    pub alerts: BTreeMap<String, u64>,

    /// Earliest and latest event time seen
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Wall clock of the last update (drives retention)
    pub last_active: DateTime<Utc>,
}

impl AggregateState {
    fn new(entity_key: String, first_seen: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            entity_key,
            count: 0,
            fields: BTreeMap::new(),
            alerts: BTreeMap::new(),
            first_seen,
            last_seen: first_seen,
            last_active: now,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.get(name)
    }

    pub fn running_sum(&self, field: &str) -> Option<f64> {
        self.field(field).map(|stats| stats.sum)
    }

    pub fn average(&self, field: &str) -> Option<f64> {
        self.field(field).and_then(FieldStats::average)
    }

    pub fn min(&self, field: &str) -> Option<f64> {
        self.field(field).map(|stats| stats.min)
    }

    pub fn max(&self, field: &str) -> Option<f64> {
        self.field(field).map(|stats| stats.max)
    }

    pub fn last(&self, field: &str) -> Option<f64> {
        self.field(field).map(|stats| stats.last)
    }

    pub fn alert_count(&self, detector: &str) -> u64 {
        self.alerts.get(detector).copied().unwrap_or(0)
    }

    /// Records per minute of event time between first and last sighting
    ///
    /// `None` until the key spans a non-zero interval.
    pub fn rate_per_minute(&self) -> Option<f64> {
        let span_secs = (self.last_seen - self.first_seen).num_milliseconds() as f64 / 1000.0;
        (span_secs > 0.0).then(|| self.count as f64 / (span_secs / 60.0))
    }

    /// Fold another partial state for the same key into this one
    pub fn merge(&mut self, other: &AggregateState) {
        let other_is_newer = other.last_seen >= self.last_seen;

        self.count += other.count;
        for (name, stats) in &other.fields {
            self.fields
                .entry(name.clone())
                .or_default()
                .merge(stats, other_is_newer);
        }
        for (detector, count) in &other.alerts {
            *self.alerts.entry(detector.clone()).or_insert(0) += count;
        }
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.last_active = self.last_active.max(other.last_active);
    }
}

/// Value a leaderboard ranks keys by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    /// `sum / count` of a numeric field
    Average,
    /// Running sum of a numeric field
    Total,
    /// Maximum observed value of a numeric field
    Max,
    /// Most recent value of a numeric field
    Last,
    /// Number of alerts from the detector named by `field`
    Alerts,
}

impl RankMetric {
    pub fn value(&self, state: &AggregateState, field: &str) -> Option<f64> {
        match self {
            RankMetric::Average => state.average(field),
            RankMetric::Total => state.running_sum(field),
            RankMetric::Max => state.max(field),
            RankMetric::Last => state.last(field),
            RankMetric::Alerts => Some(state.alert_count(field) as f64),
        }
    }
}

/// Descending by value, ties broken by key ascending
fn ranking_order(a: &(String, f64), b: &(String, f64)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Merge partial rankings (e.g. one per worker partition) into a single top-k
pub fn merge_rankings<I>(partials: I, top_k: usize) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = Vec<(String, f64)>>,
{
    let mut merged: Vec<(String, f64)> = partials.into_iter().flatten().collect();
    merged.sort_by(ranking_order);
    merged.truncate(top_k);
    merged
}

/// Keyed store of `AggregateState`
#[derive(Debug, Default)]
pub struct AggregateTracker {
    states: HashMap<String, AggregateState>,
}

impl AggregateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `record` into its key's state
    pub fn update(&mut self, record: &DomainRecord, now: DateTime<Utc>) -> &AggregateState {
        self.update_keyed(&record.entity_key, record, now)
    }

    /// Fold `record` into the state of `key` instead of its entity key
    ///
    /// Used for secondary groupings such as a player's team.
    pub fn update_keyed(&mut self, key: &str, record: &DomainRecord, now: DateTime<Utc>) -> &AggregateState {
        let state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| AggregateState::new(key.to_string(), record.timestamp, now));

        state.count += 1;
        state.first_seen = state.first_seen.min(record.timestamp);
        state.last_seen = state.last_seen.max(record.timestamp);
        state.last_active = now;

        for (name, value) in record.numeric_fields() {
            match state.fields.get_mut(name) {
                Some(stats) => stats.observe(value),
                None => {
                    let mut stats = FieldStats::default();
                    stats.observe(value);
                    state.fields.insert(name.to_string(), stats);
                }
            }
        }

        state
    }

    /// Count an alert from `detector` against `entity_key`
    pub fn record_alert(&mut self, entity_key: &str, detector: &str) {
        if let Some(state) = self.states.get_mut(entity_key) {
            *state.alerts.entry(detector.to_string()).or_insert(0) += 1;
        }
    }

    /// Merge a partial state (e.g. from another partition) into this tracker
    pub fn absorb(&mut self, state: &AggregateState) {
        match self.states.get_mut(&state.entity_key) {
            Some(existing) => existing.merge(state),
            None => {
                self.states.insert(state.entity_key.clone(), state.clone());
            }
        }
    }

    pub fn get(&self, entity_key: &str) -> Option<&AggregateState> {
        self.states.get(entity_key)
    }

    /// Owned copy of a key's state
    pub fn snapshot(&self, entity_key: &str) -> Option<AggregateState> {
        self.states.get(entity_key).cloned()
    }

    /// Top `top_k` keys by average of `field`
    pub fn rank(&self, field: &str, top_k: usize) -> Vec<(String, f64)> {
        self.rank_by(RankMetric::Average, field, top_k)
    }

    /// Top `top_k` keys by `metric` over `field`
    ///
    /// Keys without a value for the metric are skipped. Computed on demand.
    pub fn rank_by(&self, metric: RankMetric, field: &str, top_k: usize) -> Vec<(String, f64)> {
        let candidates: Vec<(String, f64)> = self
            .states
            .values()
            .filter_map(|state| {
                metric
                    .value(state, field)
                    .map(|value| (state.entity_key.clone(), value))
            })
            .collect();
        merge_rankings([candidates], top_k)
    }

    /// Drop state for keys not updated since `cutoff`
    pub fn evict_inactive(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| state.last_active >= cutoff);
        before - self.states.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    pub fn states(&self) -> impl Iterator<Item = &AggregateState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
