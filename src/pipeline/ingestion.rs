//! Pipeline ingestion - partitioned async consumer over a message source
//!
//! ```text
//! MessageSource ──> dispatcher (decode + route) ──mpsc──> worker[0..N]
//!                        │                                   │
//!                        │ DecodeError: warn + count          │ PipelineEngine (one per partition)
//!                        ▼                                   ▼
//!                 housekeeping tick                       AlertSink
//!          (retention sweep, leaderboards)
//! ```
//!
//! A key always hashes to the same partition, and each partition is fed by a
//! single FIFO channel, so records of one key are processed in arrival order.
//! Shutdown stops intake, lets workers drain their channels, then closes the
//! source.

use super::aggregates::{merge_rankings, AggregateState, AggregateTracker};
use super::config::PipelineConfig;
use super::decoder::RecordDecoder;
use super::engine::{Outcome, PipelineEngine};
use super::profile::RankScope;
use super::router::KeyRouter;
use super::sink::AlertSink;
use super::source::{Message, MessageSource};
use super::types::{DomainRecord, Leaderboard};
use super::windows::WindowKind;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Counters reported when the runtime stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    /// Messages pulled from the source
    pub received: u64,

    /// Records processed by workers
    pub processed: u64,

    /// Payloads dropped by the decoder
    pub rejected: u64,

    pub source_errors: u64,
    pub alerts: u64,
    pub summaries: u64,

    /// Keys dropped by retention sweeps
    pub evicted_keys: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    processed: u64,
    alerts: u64,
    summaries: u64,
}

/// Owns one engine per worker partition and drives them from a source
pub struct IngestionRuntime {
    config: PipelineConfig,
    router: KeyRouter,
    decoder: Arc<dyn RecordDecoder>,
    partitions: Vec<Arc<Mutex<PipelineEngine>>>,
    sink: Arc<dyn AlertSink>,
}

impl IngestionRuntime {
    pub fn new(config: PipelineConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self::with_engines(config, sink, PipelineEngine::from_config)
    }

    /// Build each partition's engine with `make_engine` (custom clocks, extra detectors)
    pub fn with_engines(
        config: PipelineConfig,
        sink: Arc<dyn AlertSink>,
        make_engine: impl Fn(&PipelineConfig) -> PipelineEngine,
    ) -> Self {
        let router = KeyRouter::new(config.workers);
        let partitions = (0..router.partitions())
            .map(|_| Arc::new(Mutex::new(make_engine(&config))))
            .collect();

        Self {
            decoder: config.profile.decoder(config.format),
            router,
            partitions,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    fn engine_for(&self, entity_key: &str) -> &Arc<Mutex<PipelineEngine>> {
        &self.partitions[self.router.partition(entity_key)]
    }

    /// Owned copy of a key's aggregate from whichever partition owns it
    pub fn snapshot(&self, entity_key: &str) -> Option<AggregateState> {
        self.engine_for(entity_key).lock().snapshot(entity_key)
    }

    /// Members of one of a key's windows, oldest first
    pub fn window_members(&self, kind: WindowKind, entity_key: &str) -> Option<Vec<Arc<DomainRecord>>> {
        self.engine_for(entity_key)
            .lock()
            .window(kind, entity_key)
            .map(|view| view.snapshot())
    }

    /// Group aggregates merged across partitions
    ///
    /// Members of one group can hash to different partitions, so each
    /// partition only holds a partial state.
    fn merged_groups(&self) -> AggregateTracker {
        let mut merged = AggregateTracker::new();
        for partition in &self.partitions {
            let engine = partition.lock();
            for state in engine.group_states() {
                merged.absorb(state);
            }
        }
        merged
    }

    /// A group's aggregate (e.g. a team) combined from every partition
    pub fn group_snapshot(&self, group: &str) -> Option<AggregateState> {
        self.merged_groups().snapshot(group)
    }

    /// Keys tracked across all partitions
    pub fn key_count(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().key_count()).sum()
    }

    /// Profile leaderboards merged over all partitions
    pub fn leaderboards(&self) -> Vec<Leaderboard> {
        let top_k = self.config.rank_top_k;
        let rankings = self.config.profile.rankings();
        let groups = rankings
            .iter()
            .any(|query| query.scope == RankScope::Group)
            .then(|| self.merged_groups());

        rankings
            .into_iter()
            .map(|query| {
                let entries = match (query.scope, &groups) {
                    (RankScope::Group, Some(groups)) => {
                        groups.rank_by(query.metric, &query.field, top_k)
                    }
                    _ => {
                        // Entity keys live in exactly one partition
                        let partials: Vec<Vec<(String, f64)>> = self
                            .partitions
                            .iter()
                            .map(|p| p.lock().rank_by(query.metric, &query.field, top_k))
                            .collect();
                        merge_rankings(partials, top_k)
                    }
                };

                Leaderboard {
                    entries,
                    title: query.title,
                    metric: query.metric,
                    field: query.field,
                }
            })
            .collect()
    }

    /// Drop keys idle past the configured retention in every partition
    pub fn evict_inactive(&self) -> usize {
        let Some(retention) = self.config.retention() else {
            return 0;
        };

        self.partitions
            .iter()
            .map(|p| p.lock().evict_inactive(retention))
            .sum()
    }

    fn publish_leaderboards(&self) {
        for leaderboard in self.leaderboards() {
            if let Err(e) = self.sink.leaderboard(&leaderboard) {
                log::error!("❌ Failed to publish leaderboard '{}': {}", leaderboard.title, e);
            }
        }
    }

    /// Consume `source` until it is exhausted or `shutdown` is cancelled
    ///
    /// Main loop:
    /// 1. Pull a message, decode it, route it to its partition's worker
    /// 2. On every housekeeping tick: retention sweep + leaderboards
    /// 3. On exit: drain workers, close the source, final leaderboards, flush sink
    pub async fn run(
        &self,
        source: &mut dyn MessageSource,
        shutdown: CancellationToken,
    ) -> IngestionStats {
        log::info!("🚀 Starting ingestion");
        log::info!("   ├─ Profile: {}", self.config.profile);
        log::info!("   ├─ Source: {} ({})", source.source_type(), self.decoder.format());
        log::info!("   ├─ Sink: {}", self.sink.sink_type());
        log::info!("   ├─ Workers: {}", self.partitions.len());
        log::info!(
            "   └─ Housekeeping interval: {}ms",
            self.config.housekeeping_interval_ms
        );

        let mut stats = IngestionStats::default();
        let (senders, workers) = self.spawn_workers();

        let period = self.config.housekeeping_interval();
        let mut housekeeping = interval_at(tokio::time::Instant::now() + period, period);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut window_count = 0u64;
        let mut last_log_time = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    log::info!("🛑 Shutdown requested, stopping intake");
                    break;
                }

                message = source.next_message() => match message {
                    Some(Ok(message)) => {
                        stats.received += 1;
                        window_count += 1;
                        self.dispatch(message, &senders, &mut stats).await;

                        if last_log_time.elapsed() >= THROUGHPUT_LOG_INTERVAL {
                            let rate = window_count as f64 / last_log_time.elapsed().as_secs_f64();
                            log::info!(
                                "📊 Ingestion rate: {:.1} msgs/sec (total: {}, rejected: {})",
                                rate,
                                stats.received,
                                stats.rejected
                            );
                            last_log_time = Instant::now();
                            window_count = 0;
                        }
                    }
                    Some(Err(e)) => {
                        stats.source_errors += 1;
                        log::warn!("⚠️  {} source error: {}", source.source_type(), e);
                    }
                    None => {
                        log::info!("📭 {} source exhausted", source.source_type());
                        break;
                    }
                },

                _ = housekeeping.tick() => {
                    let evicted = self.evict_inactive();
                    if evicted > 0 {
                        stats.evicted_keys += evicted as u64;
                        log::info!("🧹 Evicted {} inactive keys", evicted);
                    }
                    self.publish_leaderboards();
                    log::debug!("🔑 Tracking {} keys", self.key_count());
                }
            }
        }

        // Closing the channels lets workers finish what is already queued
        drop(senders);
        for (id, worker) in workers.into_iter().enumerate() {
            match worker.await {
                Ok(worker_stats) => {
                    stats.processed += worker_stats.processed;
                    stats.alerts += worker_stats.alerts;
                    stats.summaries += worker_stats.summaries;
                }
                Err(e) => log::error!("❌ Worker {} failed: {}", id, e),
            }
        }

        if let Err(e) = source.close().await {
            log::error!("❌ Failed to close {} source: {}", source.source_type(), e);
        }

        self.publish_leaderboards();
        if let Err(e) = self.sink.flush() {
            log::error!("❌ Failed to flush {} sink: {}", self.sink.sink_type(), e);
        }

        log::info!("✅ Ingestion stopped");
        log::info!("   ├─ Received: {}", stats.received);
        log::info!("   ├─ Processed: {}", stats.processed);
        log::info!("   ├─ Rejected: {}", stats.rejected);
        log::info!("   ├─ Source errors: {}", stats.source_errors);
        log::info!("   └─ Alerts: {}", stats.alerts);

        stats
    }

    fn spawn_workers(&self) -> (Vec<mpsc::Sender<DomainRecord>>, Vec<JoinHandle<WorkerStats>>) {
        let mut senders = Vec::with_capacity(self.partitions.len());
        let mut workers = Vec::with_capacity(self.partitions.len());

        for (id, engine) in self.partitions.iter().enumerate() {
            let (tx, rx) = mpsc::channel(self.config.channel_buffer);
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                id,
                Arc::clone(engine),
                rx,
                Arc::clone(&self.sink),
            )));
        }

        (senders, workers)
    }

    async fn dispatch(
        &self,
        message: Message,
        senders: &[mpsc::Sender<DomainRecord>],
        stats: &mut IngestionStats,
    ) {
        log::trace!("📥 [{}] {}", message.offset, message.payload);

        let record = match self.decoder.decode(&message.payload, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                stats.rejected += 1;
                log::warn!("⚠️  Rejected message at offset {}: {}", message.offset, e);
                return;
            }
        };

        let partition = self.router.partition_of(&record);
        if senders[partition].send(record).await.is_err() {
            log::error!("❌ Worker {} is gone, dropping message at offset {}", partition, message.offset);
        }
    }
}

async fn run_worker(
    id: usize,
    engine: Arc<Mutex<PipelineEngine>>,
    mut rx: mpsc::Receiver<DomainRecord>,
    sink: Arc<dyn AlertSink>,
) -> WorkerStats {
    log::debug!("👷 Worker {} started", id);
    let mut stats = WorkerStats::default();

    while let Some(record) = rx.recv().await {
        let outcome = engine.lock().process_record(record);
        stats.processed += 1;
        deliver(sink.as_ref(), &outcome, &mut stats);
    }

    log::debug!("👷 Worker {} drained ({} records)", id, stats.processed);
    stats
}

fn deliver(sink: &dyn AlertSink, outcome: &Outcome, stats: &mut WorkerStats) {
    for alert in &outcome.alerts {
        stats.alerts += 1;
        if let Err(e) = sink.emit(alert) {
            log::error!("❌ Failed to emit {} alert for {}: {}", alert.kind, alert.entity_key, e);
        }
    }

    if let Some(summary) = &outcome.summary {
        stats.summaries += 1;
        if let Err(e) = sink.summary(summary) {
            log::error!("❌ Failed to emit summary for {}: {}", summary.entity_key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::profile::Profile;
    use crate::pipeline::sink::RecordingSink;
    use crate::pipeline::source::ChannelSource;
    use chrono::{DateTime, TimeZone};

    fn tick(symbol: &str, second: u32, price: f64, volume: f64) -> String {
        format!(
            r#"{{"timestamp": "2025-01-15T10:30:{:02}Z", "symbol": "{}", "price": {}, "volume": {}}}"#,
            second, symbol, price, volume
        )
    }

    fn market_config(workers: usize) -> PipelineConfig {
        PipelineConfig {
            profile: Profile::Market,
            workers,
            channel_buffer: 16,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_processes_until_source_exhausted() {
        let sink = Arc::new(RecordingSink::new());
        let runtime = IngestionRuntime::new(market_config(4), sink.clone());
        let (tx, mut source) = ChannelSource::channel(64);

        for second in 0..5 {
            for symbol in ["AAPL", "MSFT", "GOOGL", "TSLA"] {
                tx.send(tick(symbol, second, 100.0, 1000.0)).await.unwrap();
            }
        }
        tx.send("not json".to_string()).await.unwrap();
        drop(tx);

        let stats = runtime.run(&mut source, CancellationToken::new()).await;

        assert_eq!(stats.received, 21);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.processed, 20);
        assert_eq!(runtime.key_count(), 4);
        assert_eq!(runtime.snapshot("TSLA").unwrap().count, 5);
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_runtime_preserves_per_key_order() {
        let runtime = IngestionRuntime::new(market_config(3), Arc::new(RecordingSink::new()));
        let (tx, mut source) = ChannelSource::channel(128);

        for second in 0..30 {
            for symbol in ["AAPL", "MSFT", "NVDA", "AMZN"] {
                tx.send(tick(symbol, second, 100.0 + second as f64 * 0.01, 500.0))
                    .await
                    .unwrap();
            }
        }
        drop(tx);

        runtime.run(&mut source, CancellationToken::new()).await;

        for symbol in ["AAPL", "MSFT", "NVDA", "AMZN"] {
            let members = runtime.window_members(WindowKind::Horizon, symbol).unwrap();
            assert_eq!(members.len(), 30);
            assert!(members.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }

    #[tokio::test]
    async fn test_runtime_delivers_alerts_and_final_leaderboards() {
        let sink = Arc::new(RecordingSink::new());
        let runtime = IngestionRuntime::new(market_config(2), sink.clone());
        let (tx, mut source) = ChannelSource::channel(16);

        tx.send(tick("TSLA", 0, 250.0, 1000.0)).await.unwrap();
        tx.send(tick("TSLA", 1, 260.0, 1000.0)).await.unwrap();
        tx.send(tick("AAPL", 1, 175.0, 5000.0)).await.unwrap();
        drop(tx);

        let stats = runtime.run(&mut source, CancellationToken::new()).await;

        assert_eq!(stats.alerts, 1);
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity_key, "TSLA");

        let boards = sink.leaderboards();
        let volume = boards.iter().find(|b| b.title == "Volume Leaders").unwrap();
        assert_eq!(
            volume.entries,
            vec![("AAPL".to_string(), 5000.0), ("TSLA".to_string(), 2000.0)]
        );
    }

    #[tokio::test]
    async fn test_team_totals_merge_across_partitions() {
        let config = PipelineConfig {
            profile: Profile::Performance,
            workers: 4,
            ..PipelineConfig::default()
        };
        let sink = Arc::new(RecordingSink::new());
        let runtime = IngestionRuntime::new(config, sink.clone());
        let (tx, mut source) = ChannelSource::channel(32);

        let games = [
            ("Jayson Tatum", "Celtics", 22),
            ("Jaylen Brown", "Celtics", 18),
            ("Derrick White", "Celtics", 15),
            ("Jrue Holiday", "Celtics", 12),
            ("Nikola Jokic", "Nuggets", 29),
            ("Jamal Murray", "Nuggets", 21),
        ];
        for (player, team, points) in games {
            tx.send(format!(
                r#"{{"player": "{}", "team": "{}", "points": {}, "assists": 3, "rebounds": 4}}"#,
                player, team, points
            ))
            .await
            .unwrap();
        }
        drop(tx);

        runtime.run(&mut source, CancellationToken::new()).await;

        let celtics = runtime.group_snapshot("Celtics").unwrap();
        assert_eq!(celtics.count, 4);
        assert_eq!(celtics.running_sum("points"), Some(67.0));

        let boards = sink.leaderboards();
        let team_points = boards.iter().find(|b| b.title == "Team Points").unwrap();
        assert_eq!(
            team_points.entries,
            vec![("Celtics".to_string(), 67.0), ("Nuggets".to_string(), 50.0)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_runtime_closes_source() {
        let runtime = IngestionRuntime::new(market_config(1), Arc::new(RecordingSink::new()));
        let (tx, mut source) = ChannelSource::channel(16);
        tx.send(tick("AAPL", 0, 175.0, 1000.0)).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = runtime.run(&mut source, shutdown).await;

        assert_eq!(stats.received, 0);
        assert!(source.is_closed());
        assert!(tx.send(tick("AAPL", 1, 175.0, 1000.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_evict_inactive_uses_retention() {
        let clock = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()));
        let config = PipelineConfig {
            retention_secs: Some(60),
            ..market_config(2)
        };
        let engine_clock = Arc::clone(&clock);
        let runtime = IngestionRuntime::with_engines(config, Arc::new(RecordingSink::new()), |config| {
            let clock = Arc::clone(&engine_clock);
            PipelineEngine::new_with_timestamp_fn(config, Box::new(move || -> DateTime<Utc> { *clock.lock() }))
        });

        let (tx, mut source) = ChannelSource::channel(16);
        tx.send(tick("IDLE", 0, 10.0, 1.0)).await.unwrap();
        drop(tx);
        runtime.run(&mut source, CancellationToken::new()).await;
        assert_eq!(runtime.key_count(), 1);

        *clock.lock() += chrono::Duration::seconds(61);
        assert_eq!(runtime.evict_inactive(), 1);
        assert_eq!(runtime.key_count(), 0);
    }
}
