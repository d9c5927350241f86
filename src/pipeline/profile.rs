//! Domain presets binding a record schema, detectors and leaderboards
//!
//! - `Performance` - basketball box scores keyed by player
//! - `Market` - stock ticks keyed by symbol
//! - `Smoker` - temperature readings keyed by sensor

use super::aggregates::RankMetric;
use super::config::PipelineConfig;
use super::decoder::{
    DelimitedDecoder, JsonDecoder, NumericField, PayloadFormat, RecordDecoder, RecordSchema,
    TimestampSpec,
};
use super::detectors::{
    BurstDetector, CompoundDetector, Detector, PlateauDetector, SpikeDetector, TrendClassifier,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Points that make a high-scoring game
const HIGH_SCORING_POINTS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Performance,
    Market,
    Smoker,
}

/// Which aggregates a leaderboard ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankScope {
    /// One entry per entity key
    Entity,
    /// One entry per value of the profile's group field (e.g. team)
    Group,
}

/// A leaderboard published on every housekeeping tick
#[derive(Debug, Clone, PartialEq)]
pub struct RankQuery {
    pub title: String,
    pub metric: RankMetric,
    pub field: String,
    pub scope: RankScope,
}

impl RankQuery {
    fn new(title: &str, metric: RankMetric, field: &str) -> Self {
        Self {
            title: title.to_string(),
            metric,
            field: field.to_string(),
            scope: RankScope::Entity,
        }
    }

    fn grouped(title: &str, metric: RankMetric, field: &str) -> Self {
        Self {
            scope: RankScope::Group,
            ..Self::new(title, metric, field)
        }
    }
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Performance => "performance",
            Profile::Market => "market",
            Profile::Smoker => "smoker",
        }
    }

    pub fn all() -> [Profile; 3] {
        [Profile::Performance, Profile::Market, Profile::Smoker]
    }

    pub fn schema(&self) -> RecordSchema {
        match self {
            Profile::Performance => RecordSchema {
                key_field: "player".into(),
                default_key: None,
                timestamp: TimestampSpec::Date {
                    field: "game_date".into(),
                    required: false,
                },
                numeric: vec![
                    NumericField::required("points").non_negative(),
                    NumericField::required("assists").non_negative(),
                    NumericField::required("rebounds").non_negative(),
                ],
                text: vec!["team".into()],
                columns: ["player", "team", "points", "assists", "rebounds", "game_date"]
                    .map(String::from)
                    .to_vec(),
            },
            Profile::Market => RecordSchema {
                key_field: "symbol".into(),
                default_key: None,
                timestamp: TimestampSpec::Instant {
                    field: "timestamp".into(),
                    required: true,
                },
                numeric: vec![
                    NumericField::required("price").positive(),
                    NumericField::required("volume").non_negative(),
                    NumericField::optional("change_percent"),
                ],
                text: vec![],
                columns: ["timestamp", "symbol", "price", "volume", "change_percent"]
                    .map(String::from)
                    .to_vec(),
            },
            Profile::Smoker => RecordSchema {
                key_field: "sensor_id".into(),
                default_key: Some("smoker".into()),
                timestamp: TimestampSpec::Instant {
                    field: "timestamp".into(),
                    required: false,
                },
                numeric: vec![NumericField::required("temperature")],
                text: vec![],
                columns: ["timestamp", "temperature", "sensor_id"]
                    .map(String::from)
                    .to_vec(),
            },
        }
    }

    pub fn decoder(&self, format: PayloadFormat) -> Arc<dyn RecordDecoder> {
        match format {
            PayloadFormat::Json => Arc::new(JsonDecoder::new(self.schema())),
            PayloadFormat::Delimited => Arc::new(DelimitedDecoder::new(self.schema())),
        }
    }

    /// Text field whose value gets its own secondary aggregate
    pub fn group_field(&self) -> Option<&'static str> {
        match self {
            Profile::Performance => Some("team"),
            Profile::Market | Profile::Smoker => None,
        }
    }

    /// Fields checked by the compound detector (empty when the profile has none)
    pub fn compound_fields(&self) -> Vec<String> {
        match self {
            Profile::Performance => ["points", "assists", "rebounds"].map(String::from).to_vec(),
            Profile::Market | Profile::Smoker => Vec::new(),
        }
    }

    /// Detectors in evaluation order
    pub fn detectors(&self, config: &PipelineConfig) -> Vec<Box<dyn Detector>> {
        match self {
            Profile::Performance => vec![
                Box::new(CompoundDetector::new(
                    "triple_double",
                    self.compound_fields(),
                    config.compound_field_min,
                    config.compound_min_categories,
                )),
                Box::new(BurstDetector::new(
                    "high_scoring_game",
                    "points",
                    Some(config.burst_absolute_threshold.unwrap_or(HIGH_SCORING_POINTS)),
                    None,
                )),
            ],
            Profile::Market => vec![
                Box::new(BurstDetector::new(
                    "price_move",
                    "price",
                    config.burst_absolute_threshold,
                    Some(config.burst_relative_pct),
                )),
                Box::new(SpikeDetector::new("volume_spike", "volume", config.spike_ratio)),
            ],
            Profile::Smoker => vec![Box::new(PlateauDetector::new(
                "stall",
                "temperature",
                config.stability_threshold,
            ))],
        }
    }

    pub fn trend(&self, config: &PipelineConfig) -> TrendClassifier {
        let field = match self {
            Profile::Performance => "points",
            Profile::Market => "price",
            Profile::Smoker => "temperature",
        };
        TrendClassifier::new(field, config.trend_threshold_pct, config.trend_min_members)
    }

    pub fn rankings(&self) -> Vec<RankQuery> {
        match self {
            Profile::Performance => vec![
                RankQuery::new("Scoring Leaders (PPG)", RankMetric::Average, "points"),
                RankQuery::new("Triple-Double Leaders", RankMetric::Alerts, "triple_double"),
                RankQuery::grouped("Team Points", RankMetric::Total, "points"),
            ],
            Profile::Market => vec![
                RankQuery::new("Volume Leaders", RankMetric::Total, "volume"),
                RankQuery::new("Most Price Alerts", RankMetric::Alerts, "price_move"),
            ],
            Profile::Smoker => vec![RankQuery::new(
                "Hottest Sensors",
                RankMetric::Last,
                "temperature",
            )],
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "performance" | "nba" => Ok(Profile::Performance),
            "market" | "stocks" => Ok(Profile::Market),
            "smoker" | "sensor" => Ok(Profile::Smoker),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_profile_round_trip_names() {
        for profile in Profile::all() {
            assert_eq!(profile.as_str().parse::<Profile>(), Ok(profile));
        }
        assert_eq!("NBA".parse::<Profile>(), Ok(Profile::Performance));
    }

    #[test]
    fn test_detector_names_are_unique() {
        let config = PipelineConfig::default();

        for profile in Profile::all() {
            let detectors = profile.detectors(&config);
            let mut names: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), total, "duplicate detector in {}", profile);
        }
    }

    #[test]
    fn test_performance_decoder_accepts_original_message() {
        let decoder = Profile::Performance.decoder(PayloadFormat::Json);
        let payload = r#"{"player": "LeBron James", "team": "Lakers", "points": 28, "assists": 7, "rebounds": 9, "game_date": "2025-01-15"}"#;

        let record = decoder.decode(payload, Utc::now()).unwrap();
        assert_eq!(record.entity_key, "LeBron James");
        assert_eq!(record.text("team"), Some("Lakers"));
        assert_eq!(record.number("rebounds"), Some(9.0));
    }

    #[test]
    fn test_market_decoder_accepts_producer_message() {
        let decoder = Profile::Market.decoder(PayloadFormat::Json);
        let payload = r#"{"timestamp": "2025-01-15T10:30:00Z", "symbol": "AAPL", "price": 175.25, "volume": 1500000, "change_percent": 0.412}"#;

        let record = decoder.decode(payload, Utc::now()).unwrap();
        assert_eq!(record.entity_key, "AAPL");
        assert_eq!(record.number("change_percent"), Some(0.412));
    }

    #[test]
    fn test_smoker_delimited_reading() {
        let decoder = Profile::Smoker.decoder(PayloadFormat::Delimited);

        let record = decoder.decode("2025-01-01 15:00:00,70.4", Utc::now()).unwrap();
        assert_eq!(record.entity_key, "smoker");
        assert_eq!(record.number("temperature"), Some(70.4));
    }

    #[test]
    fn test_group_rankings_need_group_field() {
        for profile in Profile::all() {
            let grouped = profile
                .rankings()
                .iter()
                .any(|query| query.scope == RankScope::Group);
            assert_eq!(grouped, profile.group_field().is_some(), "{}", profile);
        }
    }

    #[test]
    fn test_performance_absolute_threshold_override() {
        let config = PipelineConfig {
            burst_absolute_threshold: Some(40.0),
            ..PipelineConfig::default()
        };

        let detectors = Profile::Performance.detectors(&config);
        assert_eq!(detectors.len(), 2);
        assert_eq!(detectors[1].name(), "high_scoring_game");
    }
}
