use crate::telemetry::SensorType;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Readings that share one feed timestamp. Fields stay `None` until that
/// sensor reports for the timestamp.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub ph: Option<f64>,
    pub ntu: Option<f64>,
    pub tds: Option<f64>,
}

impl Sample {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ph: None,
            ntu: None,
            tds: None,
        }
    }

    pub fn get(&self, sensor: SensorType) -> Option<f64> {
        match sensor {
            SensorType::Ph => self.ph,
            SensorType::Ntu => self.ntu,
            SensorType::Tds => self.tds,
        }
    }

    pub fn set(&mut self, sensor: SensorType, value: f64) {
        match sensor {
            SensorType::Ph => self.ph = Some(value),
            SensorType::Ntu => self.ntu = Some(value),
            SensorType::Tds => self.tds = Some(value),
        }
    }
}

/// Most recent known value per sensor; the fields may come from different
/// timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub ph: Option<f64>,
    pub ntu: Option<f64>,
    pub tds: Option<f64>,
}

impl LatestReadings {
    pub fn get(&self, sensor: SensorType) -> Option<f64> {
        match sensor {
            SensorType::Ph => self.ph,
            SensorType::Ntu => self.ntu,
            SensorType::Tds => self.tds,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ph.is_none() && self.ntu.is_none() && self.tds.is_none()
    }
}
