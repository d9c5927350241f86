//! Pipeline Engine - per-record orchestration for one partition of keys
//!
//! This module provides the `PipelineEngine` struct that orchestrates:
//! 1. Payload decoding (decode failures never touch state)
//! 2. Window maintenance (count window + duration window per key)
//! 3. Cumulative aggregate updates
//! 4. Detector evaluation, trend labelling and periodic key summaries
//!
//! ## Architecture
//!
//! ```text
//! payload
//!     ↓
//! PipelineEngine::process_payload()
//!     ↓
//! RecordDecoder::decode()  ──(DecodeError)──> caller logs + counts
//!     ↓
//! WindowStore (recent, horizon) + AggregateTracker::update() (+ group tracker)
//!     ↓
//! TrendClassifier + Vec<Box<dyn Detector>>
//!     ↓
//! Outcome { alerts, trend, summary }
//! ```
//!
//! The engine is synchronous and single-owner; the ingestion runtime runs one
//! engine per worker partition.

use super::aggregates::{AggregateState, AggregateTracker, RankMetric};
use super::config::PipelineConfig;
use super::decoder::{DecodeError, RecordDecoder};
use super::detectors::{Detector, TrendClassifier};
use super::profile::{RankQuery, RankScope};
use super::types::{Alert, DomainRecord, KeySummary, Leaderboard, Trend};
use super::windows::{WindowKind, WindowPolicy, WindowStore, WindowView};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Result of pushing one record through the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Alerts in detector registration order
    pub alerts: Vec<Alert>,

    /// Trend of the key's duration window after this record
    pub trend: Trend,

    /// Present every `summary_every` records for the key
    pub summary: Option<KeySummary>,
}

/// Stateful analytics for a set of entity keys
pub struct PipelineEngine {
    decoder: Arc<dyn RecordDecoder>,

    /// Count-bounded windows (plateau, burst, compound)
    recent: WindowStore,

    /// Duration-bounded windows (trend, volume spike)
    horizon: WindowStore,

    aggregates: AggregateTracker,

    /// Secondary aggregates keyed by the profile's group field (e.g. team)
    groups: AggregateTracker,
    group_field: Option<&'static str>,

    /// Evaluated in order on every ingest, no short-circuit
    detectors: Vec<Box<dyn Detector>>,

    trend: TrendClassifier,

    summary_every: u64,

    rankings: Vec<RankQuery>,
    top_k: usize,

    /// Wall clock for retention (mockable in tests)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl PipelineEngine {
    /// Create an engine for the configured profile using the system clock
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new_with_timestamp_fn(config, Box::new(Utc::now))
    }

    /// Create an engine with a custom wall clock
    ///
    /// Used for testing retention with deterministic time.
    pub fn new_with_timestamp_fn(
        config: &PipelineConfig,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let profile = config.profile;

        Self {
            decoder: profile.decoder(config.format),
            recent: WindowStore::new(WindowPolicy::Count(config.window_size)),
            horizon: WindowStore::new(WindowPolicy::Duration(config.window_duration())),
            aggregates: AggregateTracker::new(),
            groups: AggregateTracker::new(),
            group_field: profile.group_field(),
            detectors: profile.detectors(config),
            trend: profile.trend(config),
            summary_every: config.summary_every,
            rankings: profile.rankings(),
            top_k: config.rank_top_k,
            now_fn,
        }
    }

    /// Append a detector after the profile's own
    pub fn register_detector(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Decode without touching any state
    pub fn decode(&self, payload: &str) -> Result<DomainRecord, DecodeError> {
        log::trace!("📥 payload: {}", payload);
        self.decoder.decode(payload, (self.now_fn)())
    }

    /// Decode `payload` and process it
    ///
    /// A decode failure is returned before any window or aggregate changes.
    pub fn process_payload(&mut self, payload: &str) -> Result<Outcome, DecodeError> {
        let record = self.decode(payload)?;
        Ok(self.process_record(record))
    }

    /// Push a decoded record through windows, aggregates and detectors
    pub fn process_record(&mut self, record: DomainRecord) -> Outcome {
        let now = (self.now_fn)();
        let record = Arc::new(record);
        let entity_key = record.entity_key.clone();

        let recent = self.recent.ingest(Arc::clone(&record), now);
        let horizon = self.horizon.ingest(Arc::clone(&record), now);
        let aggregate = self.aggregates.update(&record, now);

        let trend = self.trend.classify(&horizon);

        let mut alerts = Vec::new();
        for detector in &self.detectors {
            let view = match detector.window() {
                WindowKind::Recent => &recent,
                WindowKind::Horizon => &horizon,
            };
            if !view.accepted() {
                log::debug!(
                    "⏭️  {}: record for {} arrived behind the {} window",
                    detector.name(),
                    entity_key,
                    view.policy()
                );
                continue;
            }

            match detector.evaluate(view, aggregate) {
                Ok(Some(mut alert)) => {
                    alert.trend = Some(trend);
                    alerts.push(alert);
                }
                Ok(None) => {}
                Err(insufficient) => log::debug!("{}", insufficient),
            }
        }

        let group = self
            .group_field
            .and_then(|field| record.text(field))
            .map(str::to_string);
        if let Some(group) = &group {
            self.groups.update_keyed(group, &record, now);
        }

        for alert in &alerts {
            self.aggregates.record_alert(&alert.entity_key, &alert.detector);
            if let Some(group) = &group {
                self.groups.record_alert(group, &alert.detector);
            }
        }

        let summary = if self.summary_due(&entity_key) {
            self.aggregates
                .snapshot(&entity_key)
                .map(|aggregate| KeySummary {
                    entity_key: entity_key.clone(),
                    aggregate,
                    trend,
                    latest: Arc::clone(&record),
                })
        } else {
            None
        };

        Outcome {
            alerts,
            trend,
            summary,
        }
    }

    fn summary_due(&self, entity_key: &str) -> bool {
        self.summary_every > 0
            && self
                .aggregates
                .get(entity_key)
                .is_some_and(|state| state.count % self.summary_every == 0)
    }

    /// Owned copy of a key's aggregate
    pub fn snapshot(&self, entity_key: &str) -> Option<AggregateState> {
        self.aggregates.snapshot(entity_key)
    }

    /// Top `top_k` keys by average of `field`
    pub fn rank(&self, field: &str, top_k: usize) -> Vec<(String, f64)> {
        self.aggregates.rank(field, top_k)
    }

    pub fn rank_by(&self, metric: RankMetric, field: &str, top_k: usize) -> Vec<(String, f64)> {
        self.aggregates.rank_by(metric, field, top_k)
    }

    /// Leaderboard queries of the profile
    pub fn rankings(&self) -> &[RankQuery] {
        &self.rankings
    }

    /// Owned copy of a group's aggregate (partial when the group spans partitions)
    pub fn group_snapshot(&self, group: &str) -> Option<AggregateState> {
        self.groups.snapshot(group)
    }

    /// Partial group aggregates held by this engine
    pub fn group_states(&self) -> impl Iterator<Item = &AggregateState> {
        self.groups.states()
    }

    /// Evaluate every leaderboard query over this engine's keys
    pub fn leaderboards(&self) -> Vec<Leaderboard> {
        self.rankings
            .iter()
            .map(|query| {
                let tracker = match query.scope {
                    RankScope::Entity => &self.aggregates,
                    RankScope::Group => &self.groups,
                };
                Leaderboard {
                    title: query.title.clone(),
                    metric: query.metric,
                    field: query.field.clone(),
                    entries: tracker.rank_by(query.metric, &query.field, self.top_k),
                }
            })
            .collect()
    }

    /// Drop windows and aggregates of keys idle for longer than `retention`
    ///
    /// Returns the number of keys whose aggregate was removed.
    pub fn evict_inactive(&mut self, retention: Duration) -> usize {
        let cutoff = (self.now_fn)() - retention;

        self.recent.evict_inactive(cutoff);
        self.horizon.evict_inactive(cutoff);
        let evicted = self.aggregates.evict_inactive(cutoff);
        self.groups.evict_inactive(cutoff);

        if evicted > 0 {
            log::debug!("🧹 Evicted {} inactive keys (cutoff {})", evicted, cutoff);
        }
        evicted
    }

    /// Keys with live state
    pub fn active_keys(&self) -> Vec<String> {
        self.aggregates.keys().cloned().collect()
    }

    pub fn key_count(&self) -> usize {
        self.aggregates.len()
    }

    /// Read-only view of one of a key's windows
    pub fn window(&self, kind: WindowKind, entity_key: &str) -> Option<WindowView<'_>> {
        match kind {
            WindowKind::Recent => self.recent.view(entity_key),
            WindowKind::Horizon => self.horizon.view(entity_key),
        }
    }
}
