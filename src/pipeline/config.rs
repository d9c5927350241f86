//! Pipeline configuration from environment variables
//!
//! Every threshold, window bound and runtime knob lives here. Invalid values
//! are a `ConfigError` and abort startup before any message is consumed.

use super::decoder::PayloadFormat;
use super::profile::Profile;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {variable}: '{value}'")]
    InvalidValue { variable: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the analytics pipeline and its ingestion runtime
///
/// Loaded from `STREAMWATCH_*` environment variables with defaults matching
/// `PipelineConfig::default()`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Domain preset: schema, detectors, leaderboards
    pub profile: Profile,

    /// Inbound payload format
    pub format: PayloadFormat,

    /// Members of the fixed-count window
    pub window_size: usize,

    /// Span of the fixed-duration window (event time)
    pub window_duration_secs: i64,

    /// Max spread for a plateau
    pub stability_threshold: f64,

    /// Absolute burst threshold; profiles supply their own when unset
    pub burst_absolute_threshold: Option<f64>,

    /// Relative burst threshold in percent
    pub burst_relative_pct: f64,

    /// Categories a compound detector needs (K)
    pub compound_min_categories: usize,

    /// Per-category minimum for a compound detector
    pub compound_field_min: f64,

    /// Spike fires above `average * (1 + spike_ratio)`
    pub spike_ratio: f64,

    /// Percent change separating rising/falling from stable
    pub trend_threshold_pct: f64,

    /// Members needed before a trend is labelled
    pub trend_min_members: usize,

    /// Entries per leaderboard
    pub rank_top_k: usize,

    /// Emit a key summary every N records for that key (0 disables)
    pub summary_every: u64,

    /// Drop keys idle for this long (wall clock); `None` keeps them forever
    pub retention_secs: Option<u64>,

    /// Worker partitions
    pub workers: usize,

    /// Per-worker channel capacity (records)
    pub channel_buffer: usize,

    /// Interval for retention sweeps, leaderboards and throughput logs
    pub housekeeping_interval_ms: u64,

    /// Optional JSONL file receiving every alert
    pub alert_log: Option<String>,

    /// Optional input file; stdin when unset
    pub input: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Market,
            format: PayloadFormat::Json,
            window_size: 5,
            window_duration_secs: 60,
            stability_threshold: 2.0,
            burst_absolute_threshold: None,
            burst_relative_pct: 2.0,
            compound_min_categories: 3,
            compound_field_min: 10.0,
            spike_ratio: 0.5,
            trend_threshold_pct: 1.0,
            trend_min_members: 2,
            rank_top_k: 3,
            summary_every: 10,
            retention_secs: None,
            workers: 1,
            channel_buffer: 10_000,
            housekeeping_interval_ms: 10_000,
            alert_log: None,
            input: None,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(lookup, variable)?.unwrap_or(default))
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(variable) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                variable: variable.to_string(),
                value,
            }),
        _ => Ok(None),
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `STREAMWATCH_PROFILE` (default: market) - performance | market | smoker
    /// - `STREAMWATCH_FORMAT` (default: json) - json | delimited
    /// - `STREAMWATCH_WINDOW_SIZE` (default: 5)
    /// - `STREAMWATCH_WINDOW_DURATION_SECS` (default: 60)
    /// - `STREAMWATCH_STABILITY_THRESHOLD` (default: 2.0)
    /// - `STREAMWATCH_BURST_ABSOLUTE_THRESHOLD` (default: per profile)
    /// - `STREAMWATCH_BURST_RELATIVE_PCT` (default: 2.0)
    /// - `STREAMWATCH_COMPOUND_MIN_CATEGORIES` (default: 3)
    /// - `STREAMWATCH_COMPOUND_FIELD_MIN` (default: 10)
    /// - `STREAMWATCH_SPIKE_RATIO` (default: 0.5)
    /// - `STREAMWATCH_TREND_THRESHOLD_PCT` (default: 1.0)
    /// - `STREAMWATCH_TREND_MIN_MEMBERS` (default: 2)
    /// - `STREAMWATCH_RANK_TOP_K` (default: 3)
    /// - `STREAMWATCH_SUMMARY_EVERY` (default: 10)
    /// - `STREAMWATCH_RETENTION_SECS` (default: unset)
    /// - `STREAMWATCH_WORKERS` (default: 1)
    /// - `STREAMWATCH_CHANNEL_BUFFER` (default: 10000)
    /// - `STREAMWATCH_HOUSEKEEPING_INTERVAL_MS` (default: 10000)
    /// - `STREAMWATCH_ALERT_LOG` (default: unset)
    /// - `STREAMWATCH_INPUT` (default: unset, read stdin)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            profile: parse_var(&lookup, "STREAMWATCH_PROFILE", defaults.profile)?,
            format: parse_var(&lookup, "STREAMWATCH_FORMAT", defaults.format)?,
            window_size: parse_var(&lookup, "STREAMWATCH_WINDOW_SIZE", defaults.window_size)?,
            window_duration_secs: parse_var(
                &lookup,
                "STREAMWATCH_WINDOW_DURATION_SECS",
                defaults.window_duration_secs,
            )?,
            stability_threshold: parse_var(
                &lookup,
                "STREAMWATCH_STABILITY_THRESHOLD",
                defaults.stability_threshold,
            )?,
            burst_absolute_threshold: parse_optional(&lookup, "STREAMWATCH_BURST_ABSOLUTE_THRESHOLD")?,
            burst_relative_pct: parse_var(
                &lookup,
                "STREAMWATCH_BURST_RELATIVE_PCT",
                defaults.burst_relative_pct,
            )?,
            compound_min_categories: parse_var(
                &lookup,
                "STREAMWATCH_COMPOUND_MIN_CATEGORIES",
                defaults.compound_min_categories,
            )?,
            compound_field_min: parse_var(
                &lookup,
                "STREAMWATCH_COMPOUND_FIELD_MIN",
                defaults.compound_field_min,
            )?,
            spike_ratio: parse_var(&lookup, "STREAMWATCH_SPIKE_RATIO", defaults.spike_ratio)?,
            trend_threshold_pct: parse_var(
                &lookup,
                "STREAMWATCH_TREND_THRESHOLD_PCT",
                defaults.trend_threshold_pct,
            )?,
            trend_min_members: parse_var(
                &lookup,
                "STREAMWATCH_TREND_MIN_MEMBERS",
                defaults.trend_min_members,
            )?,
            rank_top_k: parse_var(&lookup, "STREAMWATCH_RANK_TOP_K", defaults.rank_top_k)?,
            summary_every: parse_var(&lookup, "STREAMWATCH_SUMMARY_EVERY", defaults.summary_every)?,
            retention_secs: parse_optional(&lookup, "STREAMWATCH_RETENTION_SECS")?,
            workers: parse_var(&lookup, "STREAMWATCH_WORKERS", defaults.workers)?,
            channel_buffer: parse_var(&lookup, "STREAMWATCH_CHANNEL_BUFFER", defaults.channel_buffer)?,
            housekeeping_interval_ms: parse_var(
                &lookup,
                "STREAMWATCH_HOUSEKEEPING_INTERVAL_MS",
                defaults.housekeeping_interval_ms,
            )?,
            alert_log: parse_optional(&lookup, "STREAMWATCH_ALERT_LOG")?,
            input: parse_optional(&lookup, "STREAMWATCH_INPUT")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )))
            }
        }

        fn at_least_one(name: &str, value: u64) -> Result<(), ConfigError> {
            if value >= 1 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be at least 1", name)))
            }
        }

        at_least_one("window_size", self.window_size as u64)?;
        if self.window_duration_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "window_duration_secs must be positive, got {}",
                self.window_duration_secs
            )));
        }

        non_negative("stability_threshold", self.stability_threshold)?;
        if let Some(absolute) = self.burst_absolute_threshold {
            non_negative("burst_absolute_threshold", absolute)?;
        }
        non_negative("burst_relative_pct", self.burst_relative_pct)?;
        non_negative("compound_field_min", self.compound_field_min)?;
        non_negative("spike_ratio", self.spike_ratio)?;
        non_negative("trend_threshold_pct", self.trend_threshold_pct)?;

        at_least_one("compound_min_categories", self.compound_min_categories as u64)?;
        let compound_fields = self.profile.compound_fields().len();
        if compound_fields > 0 && self.compound_min_categories > compound_fields {
            return Err(ConfigError::Invalid(format!(
                "compound_min_categories {} exceeds the {} fields of profile '{}'",
                self.compound_min_categories, compound_fields, self.profile
            )));
        }

        if self.trend_min_members < 2 {
            return Err(ConfigError::Invalid("trend_min_members must be at least 2".to_string()));
        }
        at_least_one("rank_top_k", self.rank_top_k as u64)?;
        at_least_one("workers", self.workers as u64)?;
        at_least_one("channel_buffer", self.channel_buffer as u64)?;
        at_least_one("housekeeping_interval_ms", self.housekeeping_interval_ms)?;
        if let Some(retention) = self.retention_secs {
            at_least_one("retention_secs", retention)?;
        }

        Ok(())
    }

    pub fn window_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_duration_secs)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_secs
            .map(|secs| chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64))
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }
}
