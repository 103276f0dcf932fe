//! Reading payloads and persisted log rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Errors raised while decoding a delivery body.
///
/// Every variant is permanent: redelivering the same bytes can never
/// produce a different result.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("Payload does not match reading schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// A station reading as published on the wire.
///
/// `station_id` and `timestamp` are required; the measurements are optional
/// at decode time and checked by [`crate::validation::validate`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    pub station_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
}

impl Reading {
    /// Decode a raw delivery body.
    ///
    /// Returns the typed reading together with the JSON document it came
    /// from, which is kept verbatim for audit.
    pub fn decode(body: &[u8]) -> Result<(Reading, Value), DecodeError> {
        let raw: Value = serde_json::from_slice(body).map_err(DecodeError::Json)?;
        let reading = Reading::deserialize(&raw).map_err(DecodeError::Schema)?;
        Ok((reading, raw))
    }
}

/// ISO-8601 forms with an explicit offset (`Z`, `+hh:mm`, `+hhmm` or `+hh`)
/// accepted beyond RFC 3339.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y%m%dT%H%M%S%.f%#z",
    "%Y%m%dT%H%M%#z",
];

/// Offset-less ISO-8601 forms, taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S%.f",
    "%Y%m%dT%H%M",
];

/// Accepts RFC 3339 and the other ISO-8601 date-time forms that name an
/// instant, normalised to UTC. Offset-less values and bare dates are UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let with_offset = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.with_timezone(&Utc));
    if with_offset.is_some() {
        return with_offset;
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Outcome recorded on a persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Ok,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Ok => "ok",
            LogStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `weather_logs`.
///
/// `error_message` is present iff `status` is [`LogStatus::Error`]; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedLog {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub raw_payload: Value,
}

impl PersistedLog {
    /// Row for a reading that passed validation.
    pub fn ok(reading: &Reading, raw_payload: Value) -> Self {
        Self::build(reading, raw_payload, LogStatus::Ok, None)
    }

    /// Row for a reading that failed validation.
    pub fn error(reading: &Reading, raw_payload: Value, message: impl Into<String>) -> Self {
        Self::build(reading, raw_payload, LogStatus::Error, Some(message.into()))
    }

    fn build(
        reading: &Reading,
        raw_payload: Value,
        status: LogStatus,
        error_message: Option<String>,
    ) -> Self {
        Self {
            station_id: reading.station_id.clone(),
            timestamp: reading.timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            status,
            error_message,
            raw_payload,
        }
    }
}
