//! Record decoding from raw transport payloads
//!
//! Both payload formats are driven by a `RecordSchema`:
//! - `JsonDecoder` - one JSON object per message
//! - `DelimitedDecoder` - one delimited text line per message, fixed column order
//!
//! Decoding is pure: the same payload and `received_at` always produce the
//! same result. Malformed input yields `DecodeError` and never reaches the
//! windows or aggregates.

use super::types::{DomainRecord, FieldValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a payload was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' has wrong type (expected {expected})")]
    WrongType { field: String, expected: &'static str },

    #[error("field '{field}' out of range: {value} ({reason})")]
    OutOfRange {
        field: String,
        value: f64,
        reason: String,
    },

    #[error("field '{field}' has unparseable timestamp '{value}'")]
    BadTimestamp { field: String, value: String },
}

/// Wire format of inbound payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Delimited,
}

impl PayloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadFormat::Json => "json",
            PayloadFormat::Delimited => "delimited",
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "delimited" | "csv" => Ok(PayloadFormat::Delimited),
            other => Err(format!("unknown payload format '{}'", other)),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the record's event time comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampSpec {
    /// Always use the receive time
    Received,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC) in `field`
    Instant { field: String, required: bool },
    /// Calendar date `YYYY-MM-DD` in `field`, taken as midnight UTC
    Date { field: String, required: bool },
}

/// A numeric field and its admissible range
#[derive(Debug, Clone, PartialEq)]
pub struct NumericField {
    pub name: String,
    pub required: bool,
    /// Inclusive lower bound
    pub min: Option<f64>,
    /// Reject zero as well as negatives
    pub positive: bool,
}

impl NumericField {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            min: None,
            positive: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn non_negative(mut self) -> Self {
        self.min = Some(0.0);
        self
    }

    pub fn positive(mut self) -> Self {
        self.positive = true;
        self
    }

    fn check(&self, value: f64) -> Result<f64, DecodeError> {
        if !value.is_finite() {
            return Err(self.out_of_range(value, "not a finite number"));
        }
        if self.positive && value <= 0.0 {
            return Err(self.out_of_range(value, "must be positive"));
        }
        if let Some(min) = self.min {
            if value < min {
                return Err(self.out_of_range(value, &format!("below minimum {}", min)));
            }
        }
        Ok(value)
    }

    fn out_of_range(&self, value: f64, reason: &str) -> DecodeError {
        DecodeError::OutOfRange {
            field: self.name.clone(),
            value,
            reason: reason.to_string(),
        }
    }
}

/// Shape of a domain record on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    /// Field holding the entity key
    pub key_field: String,
    /// Key used when `key_field` is absent; `None` makes the key required
    pub default_key: Option<String>,
    pub timestamp: TimestampSpec,
    pub numeric: Vec<NumericField>,
    pub text: Vec<String>,
    /// Column order for delimited payloads
    pub columns: Vec<String>,
}

/// Field as it appeared on the wire, before validation
#[derive(Debug, Clone, Copy)]
enum RawValue<'a> {
    Text(&'a str),
    Number(f64),
    Other(&'static str),
}

impl RecordSchema {
    /// Validate raw fields against the schema and build the record
    ///
    /// `numeric_text` allows numeric fields to arrive as text (delimited payloads).
    fn assemble(
        &self,
        raw: &HashMap<&str, RawValue<'_>>,
        numeric_text: bool,
        received_at: DateTime<Utc>,
    ) -> Result<DomainRecord, DecodeError> {
        let entity_key = match raw.get(self.key_field.as_str()) {
            Some(RawValue::Text(key)) if !key.trim().is_empty() => key.trim().to_string(),
            Some(RawValue::Text(_)) | None => self
                .default_key
                .clone()
                .ok_or_else(|| DecodeError::MissingField(self.key_field.clone()))?,
            Some(_) => {
                return Err(DecodeError::WrongType {
                    field: self.key_field.clone(),
                    expected: "string",
                })
            }
        };

        let timestamp = self.timestamp(raw, received_at)?;
        let mut record = DomainRecord::new(entity_key, timestamp);

        for spec in &self.numeric {
            let value = match raw.get(spec.name.as_str()) {
                Some(RawValue::Number(value)) => Some(*value),
                Some(RawValue::Text(text)) if numeric_text => {
                    Some(text.trim().parse::<f64>().map_err(|_| DecodeError::WrongType {
                        field: spec.name.clone(),
                        expected: "number",
                    })?)
                }
                Some(_) => {
                    return Err(DecodeError::WrongType {
                        field: spec.name.clone(),
                        expected: "number",
                    })
                }
                None => None,
            };

            match value {
                Some(value) => {
                    let value = spec.check(value)?;
                    record.fields.insert(spec.name.clone(), FieldValue::Number(value));
                }
                None if spec.required => return Err(DecodeError::MissingField(spec.name.clone())),
                None => {}
            }
        }

        for name in &self.text {
            match raw.get(name.as_str()) {
                Some(RawValue::Text(text)) => {
                    record.fields.insert(name.clone(), FieldValue::Text(text.to_string()));
                }
                Some(_) => {
                    return Err(DecodeError::WrongType {
                        field: name.clone(),
                        expected: "string",
                    })
                }
                None => {}
            }
        }

        Ok(record)
    }

    fn timestamp(
        &self,
        raw: &HashMap<&str, RawValue<'_>>,
        received_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, DecodeError> {
        type Parser = fn(&str) -> Option<DateTime<Utc>>;

        let (field, required, parse) = match &self.timestamp {
            TimestampSpec::Received => return Ok(received_at),
            TimestampSpec::Instant { field, required } => {
                (field.as_str(), *required, parse_instant as Parser)
            }
            TimestampSpec::Date { field, required } => (field.as_str(), *required, parse_date as Parser),
        };

        match raw.get(field) {
            Some(RawValue::Text(text)) => parse(text.trim()).ok_or_else(|| DecodeError::BadTimestamp {
                field: field.to_string(),
                value: text.to_string(),
            }),
            Some(_) => Err(DecodeError::WrongType {
                field: field.to_string(),
                expected: "timestamp string",
            }),
            None if required => Err(DecodeError::MissingField(field.to_string())),
            None => Ok(received_at),
        }
    }
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .or_else(|| parse_instant(text))
}

/// Turns a raw payload into a `DomainRecord`
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, payload: &str, received_at: DateTime<Utc>) -> Result<DomainRecord, DecodeError>;

    fn format(&self) -> PayloadFormat;
}

/// Structured key-value document (JSON object)
#[derive(Debug, Clone)]
pub struct JsonDecoder {
    schema: RecordSchema,
}

impl JsonDecoder {
    pub fn new(schema: RecordSchema) -> Self {
        Self { schema }
    }
}

impl RecordDecoder for JsonDecoder {
    fn decode(&self, payload: &str, received_at: DateTime<Utc>) -> Result<DomainRecord, DecodeError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("expected a JSON object".to_string()))?;

        let raw: HashMap<&str, RawValue<'_>> = object
            .iter()
            .filter_map(|(name, value)| {
                let raw = match value {
                    Value::Null => return None,
                    Value::String(text) => RawValue::Text(text),
                    Value::Number(number) => match number.as_f64() {
                        Some(n) => RawValue::Number(n),
                        None => RawValue::Other("number"),
                    },
                    Value::Bool(_) => RawValue::Other("bool"),
                    Value::Array(_) => RawValue::Other("array"),
                    Value::Object(_) => RawValue::Other("object"),
                };
                Some((name.as_str(), raw))
            })
            .collect();

        self.schema.assemble(&raw, false, received_at)
    }

    fn format(&self) -> PayloadFormat {
        PayloadFormat::Json
    }
}

/// Delimited text line with a fixed column order
///
/// Empty cells count as absent. Trailing optional columns may be omitted.
#[derive(Debug, Clone)]
pub struct DelimitedDecoder {
    schema: RecordSchema,
    delimiter: char,
}

impl DelimitedDecoder {
    pub fn new(schema: RecordSchema) -> Self {
        Self::with_delimiter(schema, ',')
    }

    pub fn with_delimiter(schema: RecordSchema, delimiter: char) -> Self {
        Self { schema, delimiter }
    }
}

impl RecordDecoder for DelimitedDecoder {
    fn decode(&self, payload: &str, received_at: DateTime<Utc>) -> Result<DomainRecord, DecodeError> {
        let cells: Vec<&str> = payload
            .trim_end_matches(['\r', '\n'])
            .split(self.delimiter)
            .map(|cell| cell.trim().trim_matches('"'))
            .collect();

        if cells.len() > self.schema.columns.len() {
            return Err(DecodeError::Malformed(format!(
                "expected at most {} columns, got {}",
                self.schema.columns.len(),
                cells.len()
            )));
        }

        let is_header = cells
            .iter()
            .zip(&self.schema.columns)
            .all(|(cell, column)| cell.eq_ignore_ascii_case(column));
        if is_header {
            return Err(DecodeError::Malformed("header row".to_string()));
        }

        let raw: HashMap<&str, RawValue<'_>> = self
            .schema
            .columns
            .iter()
            .zip(cells)
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(column, cell)| (column.as_str(), RawValue::Text(cell)))
            .collect();

        self.schema.assemble(&raw, true, received_at)
    }

    fn format(&self) -> PayloadFormat {
        PayloadFormat::Delimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stock_schema() -> RecordSchema {
        RecordSchema {
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
            columns: vec!["timestamp".into(), "symbol".into(), "price".into(), "volume".into()],
        }
    }

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_json_stock_tick() {
        let decoder = JsonDecoder::new(stock_schema());
        let payload = r#"{"timestamp": "2025-01-15T10:30:00Z", "symbol": "AAPL", "price": 175.25, "volume": 1500000}"#;

        let record = decoder.decode(payload, received()).unwrap();

        assert_eq!(record.entity_key, "AAPL");
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap());
        assert_eq!(record.number("price"), Some(175.25));
        assert_eq!(record.number("volume"), Some(1_500_000.0));
        assert_eq!(record.number("change_percent"), None);
    }

    #[test]
    fn test_decode_json_missing_required_numeric() {
        let decoder = JsonDecoder::new(stock_schema());
        let payload = r#"{"timestamp": "2025-01-15T10:30:00Z", "symbol": "AAPL", "price": 175.25}"#;

        assert_eq!(
            decoder.decode(payload, received()),
            Err(DecodeError::MissingField("volume".into()))
        );
    }

    #[test]
    fn test_decode_json_wrong_type() {
        let decoder = JsonDecoder::new(stock_schema());
        let payload = r#"{"timestamp": "2025-01-15T10:30:00Z", "symbol": "AAPL", "price": "high", "volume": 1}"#;

        assert!(matches!(
            decoder.decode(payload, received()),
            Err(DecodeError::WrongType { ref field, .. }) if field == "price"
        ));
    }

    #[test]
    fn test_decode_json_negative_price_out_of_range() {
        let decoder = JsonDecoder::new(stock_schema());
        let payload = r#"{"timestamp": "2025-01-15T10:30:00Z", "symbol": "AAPL", "price": -1.0, "volume": 1}"#;

        assert!(matches!(
            decoder.decode(payload, received()),
            Err(DecodeError::OutOfRange { ref field, .. }) if field == "price"
        ));
    }

    #[test]
    fn test_decode_json_malformed() {
        let decoder = JsonDecoder::new(stock_schema());

        assert!(matches!(decoder.decode(r#"{"symbol": "AAPL""#, received()), Err(DecodeError::Malformed(_))));
        assert!(matches!(decoder.decode("[1, 2, 3]", received()), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_json_bad_timestamp() {
        let decoder = JsonDecoder::new(stock_schema());
        let payload = r#"{"timestamp": "yesterday", "symbol": "AAPL", "price": 1.0, "volume": 1}"#;

        assert!(matches!(decoder.decode(payload, received()), Err(DecodeError::BadTimestamp { .. })));
    }

    #[test]
    fn test_decode_delimited_line() {
        let decoder = DelimitedDecoder::new(stock_schema());

        let record = decoder
            .decode("2025-01-15 10:30:00, MSFT, 420.10, 900000", received())
            .unwrap();

        assert_eq!(record.entity_key, "MSFT");
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap());
        assert_eq!(record.number("price"), Some(420.10));
    }

    #[test]
    fn test_decode_delimited_rejects_header_and_extra_columns() {
        let decoder = DelimitedDecoder::new(stock_schema());

        assert!(matches!(
            decoder.decode("timestamp,symbol,price,volume", received()),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decoder.decode("2025-01-15 10:30:00,MSFT,1,2,3", received()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_delimited_non_numeric_cell() {
        let decoder = DelimitedDecoder::new(stock_schema());

        assert!(matches!(
            decoder.decode("2025-01-15 10:30:00,MSFT,abc,2", received()),
            Err(DecodeError::WrongType { .. })
        ));
    }

    #[test]
    fn test_optional_timestamp_falls_back_to_received() {
        let schema = RecordSchema {
            key_field: "player".into(),
            default_key: None,
            timestamp: TimestampSpec::Date {
                field: "game_date".into(),
                required: false,
            },
            numeric: vec![NumericField::required("points").non_negative()],
            text: vec!["team".into()],
            columns: vec![],
        };
        let decoder = JsonDecoder::new(schema);

        let dated = decoder
            .decode(r#"{"player": "Nikola Jokic", "points": 28, "game_date": "2025-01-15"}"#, received())
            .unwrap();
        assert_eq!(dated.timestamp, Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());

        let undated = decoder
            .decode(r#"{"player": "Nikola Jokic", "team": "Nuggets", "points": 28}"#, received())
            .unwrap();
        assert_eq!(undated.timestamp, received());
        assert_eq!(undated.text("team"), Some("Nuggets"));
    }

    #[test]
    fn test_default_key_when_absent() {
        let schema = RecordSchema {
            key_field: "sensor_id".into(),
            default_key: Some("smoker".into()),
            timestamp: TimestampSpec::Received,
            numeric: vec![NumericField::required("temperature")],
            text: vec![],
            columns: vec!["temperature".into(), "sensor_id".into()],
        };
        let decoder = DelimitedDecoder::new(schema);

        assert_eq!(decoder.decode("225.5", received()).unwrap().entity_key, "smoker");
        assert_eq!(decoder.decode("225.5,pit-2", received()).unwrap().entity_key, "pit-2");
    }
}
