//! Rolling window trait definitions and implementations
//!
//! Two eviction disciplines are provided:
//! - `CountWindow` keeps the last N records (stability / burst detection)
//! - `DurationWindow` keeps records within the last T of event time
//!   (trend / volume detection)
//!
//! `WindowStore` owns one window per entity key for a single discipline.

use super::types::DomainRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Trait for a single per-key rolling window
///
/// Members are kept in arrival order, oldest first. Eviction is FIFO.
pub trait RollingWindow: Send {
    /// Insert a record and evict whatever falls outside the bound.
    ///
    /// Returns `false` if the record itself was rejected (already outside the bound).
    fn insert(&mut self, record: Arc<DomainRecord>) -> bool;

    /// Current members, oldest first
    fn members(&self) -> &VecDeque<Arc<DomainRecord>>;

    /// Whether the window covers its whole bound
    fn is_full(&self) -> bool;

    fn len(&self) -> usize {
        self.members().len()
    }

    fn is_empty(&self) -> bool {
        self.members().is_empty()
    }
}

/// Eviction discipline of a `WindowStore`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Keep the most recent N records
    Count(usize),
    /// Keep records within the last T of event time
    Duration(Duration),
}

impl WindowPolicy {
    fn build(&self) -> Box<dyn RollingWindow> {
        match *self {
            WindowPolicy::Count(capacity) => Box::new(CountWindow::new(capacity)),
            WindowPolicy::Duration(horizon) => Box::new(DurationWindow::new(horizon)),
        }
    }
}

impl fmt::Display for WindowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowPolicy::Count(capacity) => write!(f, "last {} records", capacity),
            WindowPolicy::Duration(horizon) => write!(f, "last {}s", horizon.num_seconds()),
        }
    }
}

/// Which of the engine's two stores a detector reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// Fixed-count store
    Recent,
    /// Fixed-duration store
    Horizon,
}

/// Fixed-count sliding window
#[derive(Debug, Clone)]
pub struct CountWindow {
    records: VecDeque<Arc<DomainRecord>>,
    capacity: usize,
}

impl CountWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }
}

impl RollingWindow for CountWindow {
    fn insert(&mut self, record: Arc<DomainRecord>) -> bool {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        true
    }

    fn members(&self) -> &VecDeque<Arc<DomainRecord>> {
        &self.records
    }

    fn is_full(&self) -> bool {
        self.records.len() == self.capacity
    }
}

/// Fixed-duration sliding window keyed on event time
///
/// The watermark is the newest event timestamp seen. Every member older than
/// `watermark - horizon` is evicted, including late arrivals stored behind
/// newer records.
#[derive(Debug, Clone)]
pub struct DurationWindow {
    records: VecDeque<Arc<DomainRecord>>,
    horizon: Duration,
    watermark: Option<DateTime<Utc>>,
    saturated: bool,
    /// Some member arrived behind the watermark, so members are not time-sorted
    unordered: bool,
}

impl DurationWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            records: VecDeque::with_capacity(64),
            horizon,
            watermark: None,
            saturated: false,
            unordered: false,
        }
    }
}

impl RollingWindow for DurationWindow {
    fn insert(&mut self, record: Arc<DomainRecord>) -> bool {
        let watermark = match self.watermark {
            Some(current) if current >= record.timestamp => current,
            _ => record.timestamp,
        };
        self.watermark = Some(watermark);
        let cutoff = watermark - self.horizon;

        // Late record that would never qualify
        let accepted = record.timestamp >= cutoff;
        if accepted {
            if record.timestamp < watermark {
                self.unordered = true;
            }
            self.records.push_back(record);
        }

        let before = self.records.len();
        if self.unordered {
            // Late members can sit behind newer ones
            self.records.retain(|member| member.timestamp >= cutoff);
        } else {
            while self.records.front().is_some_and(|front| front.timestamp < cutoff) {
                self.records.pop_front();
            }
        }
        if self.records.len() < before {
            self.saturated = true;
        }
        if self.records.is_empty() {
            self.unordered = false;
        }

        accepted
    }

    fn members(&self) -> &VecDeque<Arc<DomainRecord>> {
        &self.records
    }

    fn is_full(&self) -> bool {
        self.saturated
    }
}

/// Read-only view of one key's window right after an ingest
#[derive(Clone, Copy)]
pub struct WindowView<'a> {
    entity_key: &'a str,
    members: &'a VecDeque<Arc<DomainRecord>>,
    policy: WindowPolicy,
    full: bool,
    accepted: bool,
}

impl<'a> WindowView<'a> {
    pub fn entity_key(&self) -> &'a str {
        self.entity_key
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether the record just ingested made it into the window
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Most recent member
    pub fn newest(&self) -> Option<&'a Arc<DomainRecord>> {
        self.members.back()
    }

    /// Member just before the newest one
    pub fn previous(&self) -> Option<&'a Arc<DomainRecord>> {
        self.members.len().checked_sub(2).and_then(|idx| self.members.get(idx))
    }

    /// Oldest member
    pub fn oldest(&self) -> Option<&'a Arc<DomainRecord>> {
        self.members.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Arc<DomainRecord>> + 'a {
        self.members.iter()
    }

    /// Values of `field` across all members, oldest first
    ///
    /// Returns `None` if any member lacks the field.
    pub fn values(&self, field: &str) -> Option<Vec<f64>> {
        self.members.iter().map(|record| record.number(field)).collect()
    }

    /// Owned copy of the members for attaching to an alert
    pub fn snapshot(&self) -> Vec<Arc<DomainRecord>> {
        self.members.iter().cloned().collect()
    }
}

impl fmt::Debug for WindowView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowView")
            .field("entity_key", &self.entity_key)
            .field("policy", &self.policy)
            .field("len", &self.members.len())
            .field("full", &self.full)
            .finish()
    }
}

struct KeyWindow {
    entity_key: String,
    window: Box<dyn RollingWindow>,
    accepted: bool,
    last_active: DateTime<Utc>,
}

impl KeyWindow {
    fn view(&self, policy: WindowPolicy) -> WindowView<'_> {
        WindowView {
            entity_key: &self.entity_key,
            members: self.window.members(),
            policy,
            full: self.window.is_full(),
            accepted: self.accepted,
        }
    }
}

/// Per-key windows sharing one eviction discipline
pub struct WindowStore {
    policy: WindowPolicy,
    windows: HashMap<String, KeyWindow>,
}

impl WindowStore {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Insert `record` into its key's window and return the resulting view
    ///
    /// The window is created on first sighting of the key. `now` is the wall
    /// clock used for inactive-key retention.
    pub fn ingest(&mut self, record: Arc<DomainRecord>, now: DateTime<Utc>) -> WindowView<'_> {
        let policy = self.policy;
        let entry = self
            .windows
            .entry(record.entity_key.clone())
            .or_insert_with(|| KeyWindow {
                entity_key: record.entity_key.clone(),
                window: policy.build(),
                accepted: false,
                last_active: now,
            });

        entry.accepted = entry.window.insert(record);
        entry.last_active = now;
        entry.view(policy)
    }

    /// Current view of a key's window without mutating it
    pub fn view(&self, entity_key: &str) -> Option<WindowView<'_>> {
        self.windows
            .get(entity_key)
            .map(|entry| entry.view(self.policy))
    }

    /// Drop windows for keys not seen since `cutoff`
    ///
    /// Returns the number of keys removed.
    pub fn evict_inactive(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| entry.last_active >= cutoff);
        before - self.windows.len()
    }

    pub fn contains(&self, entity_key: &str) -> bool {
        self.windows.contains_key(entity_key)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reading(key: &str, secs: i64, value: f64) -> Arc<DomainRecord> {
        Arc::new(DomainRecord::new(key, at(secs)).with_number("value", value))
    }

    #[test]
    fn test_count_window_fifo_eviction() {
        let mut store = WindowStore::new(WindowPolicy::Count(3));

        for i in 0..10 {
            let view = store.ingest(reading("k", i, i as f64), at(i));
            assert!(view.len() <= 3);
            assert!(view.accepted());
        }

        let view = store.view("k").unwrap();
        assert!(view.is_full());
        assert_eq!(view.values("value"), Some(vec![7.0, 8.0, 9.0]));
        assert_eq!(view.newest().unwrap().number("value"), Some(9.0));
        assert_eq!(view.previous().unwrap().number("value"), Some(8.0));
    }

    #[test]
    fn test_count_window_partial_is_not_full() {
        let mut store = WindowStore::new(WindowPolicy::Count(5));

        for i in 0..3 {
            store.ingest(reading("k", i, 1.0), at(i));
        }

        let view = store.view("k").unwrap();
        assert_eq!(view.len(), 3);
        assert!(!view.is_full());
    }

    #[test]
    fn test_duration_window_evicts_outside_horizon() {
        let mut store = WindowStore::new(WindowPolicy::Duration(Duration::seconds(60)));

        store.ingest(reading("k", 0, 1.0), at(0));
        store.ingest(reading("k", 30, 2.0), at(30));
        let view = store.ingest(reading("k", 60, 3.0), at(60));
        // Boundary member at exactly now - T is kept
        assert_eq!(view.len(), 3);
        assert!(!view.is_full());

        let view = store.ingest(reading("k", 61, 4.0), at(61));
        assert_eq!(view.values("value"), Some(vec![2.0, 3.0, 4.0]));
        assert!(view.is_full());
    }

    #[test]
    fn test_duration_window_rejects_stale_late_record() {
        let mut store = WindowStore::new(WindowPolicy::Duration(Duration::seconds(60)));

        store.ingest(reading("k", 100, 1.0), at(100));
        let view = store.ingest(reading("k", 10, 2.0), at(101));

        assert!(!view.accepted());
        assert_eq!(view.len(), 1);
        assert_eq!(view.newest().unwrap().number("value"), Some(1.0));

        // A late record still inside the horizon is kept in arrival order
        let view = store.ingest(reading("k", 80, 3.0), at(102));
        assert!(view.accepted());
        assert_eq!(view.values("value"), Some(vec![1.0, 3.0]));
    }

    #[test]
    fn test_duration_window_evicts_aged_late_member() {
        let mut store = WindowStore::new(WindowPolicy::Duration(Duration::seconds(60)));

        store.ingest(reading("k", 100, 1.0), at(100));
        // Late but inside the horizon (cutoff 40), stored behind t=100
        assert!(store.ingest(reading("k", 50, 2.0), at(101)).accepted());

        // Cutoff moves to 55; the t=50 member must go even though t=100 is in front
        let view = store.ingest(reading("k", 115, 3.0), at(102));
        assert_eq!(view.values("value"), Some(vec![1.0, 3.0]));
        assert!(view.is_full());

        let now = view.newest().unwrap().timestamp;
        assert!(view
            .iter()
            .all(|m| m.timestamp >= now - Duration::seconds(60) && m.timestamp <= now));
    }

    #[test]
    fn test_fifo_law_over_random_sequences() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let horizon = Duration::seconds(30);

        for _ in 0..200 {
            let capacity = rng.gen_range(1..8);
            let mut count = CountWindow::new(capacity);
            let mut duration = DurationWindow::new(horizon);
            let mut inserted: Vec<Arc<DomainRecord>> = Vec::new();
            let mut accepted: Vec<Arc<DomainRecord>> = Vec::new();
            let mut clock = 0i64;

            for i in 0..rng.gen_range(1..60) {
                // Mostly forward, sometimes late by up to 45s
                clock += rng.gen_range(0..6);
                let secs = if rng.gen_bool(0.2) {
                    clock - rng.gen_range(0..45)
                } else {
                    clock
                };
                let record = reading("k", secs, i as f64);

                count.insert(Arc::clone(&record));
                if duration.insert(Arc::clone(&record)) {
                    accepted.push(Arc::clone(&record));
                }
                inserted.push(record);

                // Count window: exactly the last `capacity` arrivals, in order
                let start = inserted.len().saturating_sub(capacity);
                let expected: Vec<f64> = inserted[start..]
                    .iter()
                    .filter_map(|r| r.number("value"))
                    .collect();
                let actual: Vec<f64> = count.members().iter().filter_map(|r| r.number("value")).collect();
                assert_eq!(actual, expected);

                // Duration window: accepted arrivals still within [watermark - T, watermark], in order
                let watermark = inserted.iter().map(|r| r.timestamp).max().unwrap();
                let expected: Vec<f64> = accepted
                    .iter()
                    .filter(|r| r.timestamp >= watermark - horizon)
                    .filter_map(|r| r.number("value"))
                    .collect();
                let actual: Vec<f64> = duration.members().iter().filter_map(|r| r.number("value")).collect();
                assert_eq!(actual, expected);
                assert!(duration.members().iter().all(|r| r.timestamp <= watermark));
            }
        }
    }

    #[test]
    fn test_keys_are_isolated() {
        let mut store = WindowStore::new(WindowPolicy::Count(2));

        store.ingest(reading("a", 0, 1.0), at(0));
        store.ingest(reading("b", 0, 10.0), at(0));
        store.ingest(reading("a", 1, 2.0), at(1));

        assert_eq!(store.len(), 2);
        assert_eq!(store.view("a").unwrap().values("value"), Some(vec![1.0, 2.0]));
        assert_eq!(store.view("b").unwrap().values("value"), Some(vec![10.0]));
    }

    #[test]
    fn test_values_none_when_field_missing() {
        let mut store = WindowStore::new(WindowPolicy::Count(3));

        store.ingest(reading("k", 0, 1.0), at(0));
        store.ingest(Arc::new(DomainRecord::new("k", at(1))), at(1));

        assert_eq!(store.view("k").unwrap().values("value"), None);
    }

    #[test]
    fn test_evict_inactive_keys() {
        let mut store = WindowStore::new(WindowPolicy::Count(3));

        store.ingest(reading("stale", 0, 1.0), at(0));
        store.ingest(reading("fresh", 500, 1.0), at(500));

        let removed = store.evict_inactive(at(100));

        assert_eq!(removed, 1);
        assert!(!store.contains("stale"));
        assert!(store.contains("fresh"));
    }
}
