use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three water-quality probes reporting into the telemetry store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Ph,
    Ntu,
    Tds,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [SensorType::Ph, SensorType::Ntu, SensorType::Tds];

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ph" => Some(SensorType::Ph),
            "ntu" | "turbidity" => Some(SensorType::Ntu),
            "tds" => Some(SensorType::Tds),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            SensorType::Ph => "ph",
            SensorType::Ntu => "ntu",
            SensorType::Tds => "tds",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorType::Ph => "pH",
            SensorType::Ntu => "Turbidity",
            SensorType::Tds => "TDS",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorType::Ph => "",
            SensorType::Ntu => " NTU",
            SensorType::Tds => " ppm",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A feed entry that cannot become a [`SensorReading`]. Callers drop these.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown sensor type `{0}`")]
    UnknownSensor(String),
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error("value is not a finite number: {0}")]
    InvalidValue(String),
    #[error("unparseable timestamp `{0}`")]
    InvalidTimestamp(String),
}

#[derive(Debug, Deserialize)]
struct BorrowedEntry<'a> {
    #[serde(default, borrow)]
    timestamp: Option<BorrowedTimestamp<'a>>,
    #[serde(borrow)]
    value: BorrowedValue<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BorrowedTimestamp<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BorrowedValue<'a> {
    Num(f64),
    Str(&'a str),
}

impl<'a> BorrowedTimestamp<'a> {
    fn to_datetime(&self) -> Result<DateTime<Utc>, TelemetryError> {
        match self {
            BorrowedTimestamp::Str(s) => parse_timestamp_str(s),
            BorrowedTimestamp::Int(ms) => millis_to_dt(*ms)
                .ok_or_else(|| TelemetryError::InvalidTimestamp(ms.to_string())),
            BorrowedTimestamp::Float(ts) if ts.is_finite() => millis_to_dt((*ts * 1000.0) as i64)
                .ok_or_else(|| TelemetryError::InvalidTimestamp(ts.to_string())),
            BorrowedTimestamp::Float(ts) => Err(TelemetryError::InvalidTimestamp(ts.to_string())),
        }
    }
}

impl<'a> BorrowedValue<'a> {
    fn to_f64(&self) -> Result<f64, TelemetryError> {
        let value = match self {
            BorrowedValue::Num(value) => *value,
            BorrowedValue::Str(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| TelemetryError::InvalidValue(raw.to_string()))?,
        };
        if !value.is_finite() {
            return Err(TelemetryError::InvalidValue(value.to_string()));
        }
        Ok(value)
    }
}

fn parse_timestamp_str(raw: &str) -> Result<DateTime<Utc>, TelemetryError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Some writers stringify the epoch-millis key.
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(millis_to_dt)
        .ok_or_else(|| TelemetryError::InvalidTimestamp(raw.to_string()))
}

fn millis_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Decodes one telemetry entry published on `<prefix>/<sensorType>`.
///
/// Returns `Ok(None)` for topics outside the feed. Entries without a timestamp
/// are stamped with `received_at`.
pub fn parse_feed_entry(
    topic_prefix: &str,
    topic: &str,
    payload: &mut [u8],
    received_at: DateTime<Utc>,
) -> Result<Option<SensorReading>, TelemetryError> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 2 || parts[0] != topic_prefix {
        return Ok(None);
    }

    let sensor = SensorType::from_wire(parts[1])
        .ok_or_else(|| TelemetryError::UnknownSensor(parts[1].to_string()))?;
    let entry: BorrowedEntry =
        simd_json::from_slice(payload).map_err(|err| TelemetryError::Decode(err.to_string()))?;

    let value = entry.value.to_f64()?;
    let timestamp = match entry.timestamp.as_ref() {
        Some(ts) => ts.to_datetime()?,
        None => received_at,
    };

    Ok(Some(SensorReading {
        sensor,
        value,
        timestamp,
    }))
}
