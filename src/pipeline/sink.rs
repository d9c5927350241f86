//! Alert sinks - where alerts, key summaries and leaderboards go
//!
//! - `LogSink` renders everything through the `log` facade
//! - `JsonlAlertWriter` appends one JSON object per alert to a file
//! - `FanoutSink` forwards to several sinks
//! - `RecordingSink` keeps everything in memory (tests, embedding)

use super::types::{Alert, AlertKind, KeySummary, Leaderboard};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for pipeline output
///
/// Failures are reported to the caller, which logs them and keeps consuming.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert) -> Result<(), SinkError>;

    fn summary(&self, _summary: &KeySummary) -> Result<(), SinkError> {
        Ok(())
    }

    fn leaderboard(&self, _leaderboard: &Leaderboard) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}

fn alert_icon(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Plateau => "⏸️",
        AlertKind::ThresholdBurst => "🚨",
        AlertKind::Compound => "🌟",
        AlertKind::VolumeSpike => "📊",
    }
}

/// Renders output at `info` level
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl AlertSink for LogSink {
    fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        match alert.trend {
            Some(trend) => log::info!(
                "{} {} [{}] (trend: {})",
                alert_icon(alert.kind),
                alert.message,
                alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                trend
            ),
            None => log::info!(
                "{} {} [{}]",
                alert_icon(alert.kind),
                alert.message,
                alert.timestamp.format("%Y-%m-%d %H:%M:%S")
            ),
        }
        Ok(())
    }

    fn summary(&self, summary: &KeySummary) -> Result<(), SinkError> {
        let state = &summary.aggregate;

        log::info!("=== {} ANALYSIS ===", summary.entity_key.to_uppercase());
        log::info!("   Records: {}", state.count);
        for (name, stats) in &state.fields {
            log::info!(
                "   {}: avg {:.2} | min {:.2} | max {:.2} | range {:.2} | last {:.2}",
                name,
                stats.average().unwrap_or_default(),
                stats.min,
                stats.max,
                stats.range().unwrap_or_default(),
                stats.last
            );
        }
        if let Some(rate) = state.rate_per_minute() {
            log::info!("   Rate: {:.2} records/min", rate);
        }
        for (detector, count) in &state.alerts {
            log::info!("   {}: {}", detector, count);
        }
        log::info!("   Trend: {}", summary.trend);
        Ok(())
    }

    fn leaderboard(&self, leaderboard: &Leaderboard) -> Result<(), SinkError> {
        if leaderboard.entries.is_empty() {
            return Ok(());
        }

        log::info!("🏆 === {} ===", leaderboard.title.to_uppercase());
        for (rank, (key, value)) in leaderboard.entries.iter().enumerate() {
            log::info!("   {}. {}: {:.2}", rank + 1, key, value);
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "Log"
    }
}

struct JsonlState {
    writer: BufWriter<File>,
    last_flush: Instant,
}

/// Appends alerts as JSON lines
///
/// Buffered; flushed every 5 seconds, on `flush()` and on drop.
pub struct JsonlAlertWriter {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlAlertWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        log::info!("📝 Writing alerts to: {}", path.display());

        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                writer: BufWriter::new(file),
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSink for JsonlAlertWriter {
    fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        let json = serde_json::to_string(alert)?;
        let mut state = self.state.lock();
        writeln!(state.writer, "{}", json)?;

        if state.last_flush.elapsed() > FLUSH_INTERVAL {
            state.writer.flush()?;
            state.last_flush = Instant::now();
        }

        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.last_flush = Instant::now();
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}

impl Drop for JsonlAlertWriter {
    fn drop(&mut self) {
        let _ = self.state.get_mut().writer.flush();
    }
}

/// Forwards everything to each inner sink
///
/// A failing sink is logged and does not stop delivery to the others.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&self, what: &str, op: impl Fn(&dyn AlertSink) -> Result<(), SinkError>) {
        for sink in &self.sinks {
            if let Err(e) = op(sink.as_ref()) {
                log::error!("❌ {} sink failed to write {}: {}", sink.sink_type(), what, e);
            }
        }
    }
}

impl AlertSink for FanoutSink {
    fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        self.each("alert", |sink| sink.emit(alert));
        Ok(())
    }

    fn summary(&self, summary: &KeySummary) -> Result<(), SinkError> {
        self.each("summary", |sink| sink.summary(summary));
        Ok(())
    }

    fn leaderboard(&self, leaderboard: &Leaderboard) -> Result<(), SinkError> {
        self.each("leaderboard", |sink| sink.leaderboard(leaderboard));
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.each("flush", |sink| sink.flush());
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "Fanout"
    }
}

/// Keeps every alert, summary and leaderboard in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    summaries: Mutex<Vec<KeySummary>>,
    leaderboards: Mutex<Vec<Leaderboard>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn summaries(&self) -> Vec<KeySummary> {
        self.summaries.lock().clone()
    }

    pub fn leaderboards(&self) -> Vec<Leaderboard> {
        self.leaderboards.lock().clone()
    }
}

impl AlertSink for RecordingSink {
    fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn summary(&self, summary: &KeySummary) -> Result<(), SinkError> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }

    fn leaderboard(&self, leaderboard: &Leaderboard) -> Result<(), SinkError> {
        self.leaderboards.lock().push(leaderboard.clone());
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "Recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AlertContext, DomainRecord};
    use chrono::{TimeZone, Utc};
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    fn make_alert(key: &str, metric: f64) -> Alert {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap();
        let record = Arc::new(DomainRecord::new(key, ts).with_number("price", 101.0));
        Alert::new(
            AlertKind::ThresholdBurst,
            "price_move",
            key,
            AlertContext::Record(record),
            metric,
            ts,
            format!("PRICE_MOVE: {} moved UP {:.2}% to 101.00", key, metric),
        )
    }

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn emit(&self, _alert: &Alert) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn sink_type(&self) -> &'static str {
            "Failing"
        }
    }

    #[test]
    fn test_jsonl_writer_one_object_per_alert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");

        let writer = JsonlAlertWriter::new(&path).unwrap();
        writer.emit(&make_alert("AAPL", 2.5)).unwrap();
        writer.emit(&make_alert("MSFT", -3.1)).unwrap();
        writer.flush().unwrap();

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["kind"], "THRESHOLD_BURST");
        assert_eq!(first["detector"], "price_move");
        assert_eq!(first["entity_key"], "AAPL");
        assert_eq!(first["context"]["scope"], "record");

        let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second["metric"], -3.1);
    }

    #[test]
    fn test_jsonl_writer_flushes_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");

        {
            let writer = JsonlAlertWriter::new(&path).unwrap();
            writer.emit(&make_alert("NVDA", 4.0)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_jsonl_writer_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");

        for key in ["A", "B"] {
            let writer = JsonlAlertWriter::new(&path).unwrap();
            writer.emit(&make_alert(key, 2.0)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_fanout_survives_failing_sink() {
        let recording = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new(vec![
            Arc::new(FailingSink),
            recording.clone() as Arc<dyn AlertSink>,
        ]);

        assert!(fanout.emit(&make_alert("AAPL", 2.5)).is_ok());
        assert_eq!(recording.alerts().len(), 1);
    }

    #[test]
    fn test_log_sink_accepts_everything() {
        let sink = LogSink::new();
        let leaderboard = Leaderboard {
            title: "Volume Leaders".into(),
            metric: crate::pipeline::aggregates::RankMetric::Total,
            field: "volume".into(),
            entries: vec![("AAPL".into(), 1_500_000.0)],
        };

        assert!(sink.emit(&make_alert("AAPL", 2.5)).is_ok());
        assert!(sink.leaderboard(&leaderboard).is_ok());
        assert_eq!(sink.sink_type(), "Log");
    }
}
