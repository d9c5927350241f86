//! # Per-Entity Streaming Analytics
//!
//! In-memory sliding-window analytics over an unbounded stream of
//! timestamped records:
//! - Decodes raw payloads into typed records (malformed input is dropped)
//! - Routes each record to its entity key (player, symbol, sensor)
//! - Maintains a count window and a duration window per key
//! - Tracks cumulative aggregates that outlive the windows
//! - Runs detectors on every ingest and emits alerts
//!
//! ## Architecture
//!
//! ```text
//! MessageSource
//!     ↓
//! RecordDecoder ──> KeyRouter ──> worker partition
//!                                     ↓
//!                               PipelineEngine
//!                    ┌────────────────┼────────────────┐
//!               WindowStore     AggregateTracker    Detectors
//!                    └────────────────┼────────────────┘
//!                                     ↓
//!                                 AlertSink
//! ```
//!
//! State lives only as long as the process (or the retention horizon). No
//! analytics are persisted; alerts are emitted once and not retained.
//!
//! ## Module Organization
//!
//! - `types` - Records, alerts, summaries, leaderboards
//! - `windows` - Rolling window trait, count/duration windows, per-key store
//! - `aggregates` - Cumulative per-key statistics and ranking
//! - `detectors` - Detector trait, built-in detectors, trend classifier
//! - `decoder` - Schema-driven JSON and delimited decoders
//! - `router` - Entity key routing and partition hashing
//! - `profile` - Domain presets (performance, market, smoker)
//! - `config` - Environment configuration
//! - `engine` - Per-partition orchestration
//! - `source` - Message source trait and implementations
//! - `sink` - Alert sink trait and implementations
//! - `ingestion` - Partitioned async runtime with graceful shutdown

pub mod aggregates;
pub mod config;
pub mod decoder;
pub mod detectors;
pub mod engine;
pub mod ingestion;
pub mod profile;
pub mod router;
pub mod sink;
pub mod source;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use aggregates::{AggregateState, AggregateTracker, FieldStats, RankMetric};
pub use config::{ConfigError, PipelineConfig};
pub use decoder::{DecodeError, DelimitedDecoder, JsonDecoder, PayloadFormat, RecordDecoder, RecordSchema};
pub use detectors::{Detector, InsufficientData, TrendClassifier};
pub use engine::{Outcome, PipelineEngine};
pub use ingestion::{IngestionRuntime, IngestionStats};
pub use profile::{Profile, RankQuery, RankScope};
pub use router::KeyRouter;
pub use sink::{AlertSink, FanoutSink, JsonlAlertWriter, LogSink, RecordingSink, SinkError};
pub use source::{ChannelSource, LineSource, Message, MessageSource, SourceError};
pub use types::{Alert, AlertContext, AlertKind, DomainRecord, FieldValue, KeySummary, Leaderboard, Trend};
pub use windows::{RollingWindow, WindowKind, WindowPolicy, WindowStore, WindowView};
