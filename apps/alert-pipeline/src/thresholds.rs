//! Threshold bounds and the evaluator that turns the latest readings into
//! [`Violation`]s.
//!
//! Bounds are inclusive: a reading equal to `min` or `max` is in range.

use crate::ingest::LatestReadings;
use crate::telemetry::SensorType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Order in which sensors are checked, and therefore the order of violations
/// in an alert message.
pub const EVALUATION_ORDER: [SensorType; 3] =
    [SensorType::Ntu, SensorType::Ph, SensorType::Tds];

pub const DEFAULT_ALERT_INTERVAL_MINUTES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorBounds {
    pub min: f64,
    pub max: f64,
}

impl SensorBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        !(value < self.min || value > self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Low,
    High,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdError {
    #[error("{sensor} bounds are inverted: min {min} is greater than max {max}")]
    InvertedBounds {
        sensor: SensorType,
        min: f64,
        max: f64,
    },
    #[error("{0} bounds must be finite numbers")]
    NonFiniteBounds(SensorType),
    #[error("alert interval must be at least one minute")]
    InvalidInterval,
}

/// Bounds for every sensor plus the alert cooldown, as one immutable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThresholdRecord", into = "ThresholdRecord")]
pub struct ThresholdConfig {
    pub ph: SensorBounds,
    pub ntu: SensorBounds,
    pub tds: SensorBounds,
    pub alert_interval_minutes: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            ph: SensorBounds::new(6.5, 8.5),
            ntu: SensorBounds::new(0.0, 5.0),
            tds: SensorBounds::new(0.0, 500.0),
            alert_interval_minutes: DEFAULT_ALERT_INTERVAL_MINUTES,
        }
    }
}

impl ThresholdConfig {
    pub fn bounds(&self, sensor: SensorType) -> SensorBounds {
        match sensor {
            SensorType::Ph => self.ph,
            SensorType::Ntu => self.ntu,
            SensorType::Tds => self.tds,
        }
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.alert_interval_minutes.max(1)) * 60)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for sensor in SensorType::ALL {
            let bounds = self.bounds(sensor);
            if !bounds.min.is_finite() || !bounds.max.is_finite() {
                return Err(ThresholdError::NonFiniteBounds(sensor));
            }
            if bounds.min > bounds.max {
                return Err(ThresholdError::InvertedBounds {
                    sensor,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }
        if self.alert_interval_minutes == 0 {
            return Err(ThresholdError::InvalidInterval);
        }
        Ok(())
    }
}

/// Flat settings record shared with the dashboard client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ThresholdRecord {
    min_ph: f64,
    max_ph: f64,
    min_ntu: f64,
    max_ntu: f64,
    min_tds: f64,
    max_tds: f64,
    custom_alert_interval: u32,
}

impl Default for ThresholdRecord {
    fn default() -> Self {
        ThresholdConfig::default().into()
    }
}

impl From<ThresholdRecord> for ThresholdConfig {
    fn from(record: ThresholdRecord) -> Self {
        Self {
            ph: SensorBounds::new(record.min_ph, record.max_ph),
            ntu: SensorBounds::new(record.min_ntu, record.max_ntu),
            tds: SensorBounds::new(record.min_tds, record.max_tds),
            alert_interval_minutes: record.custom_alert_interval,
        }
    }
}

impl From<ThresholdConfig> for ThresholdRecord {
    fn from(config: ThresholdConfig) -> Self {
        Self {
            min_ph: config.ph.min,
            max_ph: config.ph.max,
            min_ntu: config.ntu.min,
            max_ntu: config.ntu.max,
            min_tds: config.tds.min,
            max_tds: config.tds.max,
            custom_alert_interval: config.alert_interval_minutes,
        }
    }
}

const ADVICE_PH_LOW: &str =
    "Add chlorine to the treated water to bring the pH back into the safe range.";
const ADVICE_PH_HIGH: &str = "Dose caustic soda to correct the pH. Caution: caustic soda is \
     corrosive. Wear gloves and eye protection, and always add the chemical to water, never \
     water to the chemical.";
const ADVICE_NTU: &str =
    "Inspect the settling tank for disturbed sludge or short-circuiting flow.";
const ADVICE_TDS_HIGH: &str =
    "Inspect the coagulant (PAC) dosing: check the dosing pump rate and solution strength.";
const ADVICE_TDS_LOW: &str = "Verify the TDS probe calibration and check the raw water source.";

impl SensorType {
    pub fn advice(self, direction: Direction) -> &'static str {
        match (self, direction) {
            (SensorType::Ph, Direction::Low) => ADVICE_PH_LOW,
            (SensorType::Ph, Direction::High) => ADVICE_PH_HIGH,
            (SensorType::Ntu, _) => ADVICE_NTU,
            (SensorType::Tds, Direction::High) => ADVICE_TDS_HIGH,
            (SensorType::Tds, Direction::Low) => ADVICE_TDS_LOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub sensor: SensorType,
    pub value: f64,
    pub bound: SensorBounds,
    pub direction: Direction,
    pub advice: &'static str,
}

impl Violation {
    pub fn headline(&self) -> String {
        let state = match self.direction {
            Direction::Low => "too low",
            Direction::High => "too high",
        };
        let unit = self.sensor.unit();
        format!(
            "⚠️ {} {}: {:.2}{} (allowed {:.2}–{:.2}{})",
            self.sensor.label(),
            state,
            self.value,
            unit,
            self.bound.min,
            self.bound.max,
            unit
        )
    }
}

/// Checks every reported sensor against its bounds. Sensors that never
/// reported are skipped.
pub fn evaluate(latest: &LatestReadings, config: &ThresholdConfig) -> Vec<Violation> {
    EVALUATION_ORDER
        .iter()
        .filter_map(|&sensor| {
            let value = latest.get(sensor)?;
            let bound = config.bounds(sensor);
            let direction = if value < bound.min {
                Direction::Low
            } else if value > bound.max {
                Direction::High
            } else {
                return None;
            };
            Some(Violation {
                sensor,
                value,
                bound,
                direction,
                advice: sensor.advice(direction),
            })
        })
        .collect()
}
