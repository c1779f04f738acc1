use super::types::{LatestReadings, Sample};
use crate::telemetry::{SensorReading, SensorType};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 20;

/// Folds the independent pH / NTU / TDS feeds into one timestamp-ordered
/// window of [`Sample`]s, oldest first.
#[derive(Debug)]
pub struct SampleMerger {
    capacity: usize,
    buffer: VecDeque<Sample>,
}

impl Default for SampleMerger {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SampleMerger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, reading: SensorReading) {
        let position = self
            .buffer
            .binary_search_by(|sample| sample.timestamp.cmp(&reading.timestamp));
        match position {
            Ok(index) => {
                if let Some(sample) = self.buffer.get_mut(index) {
                    sample.set(reading.sensor, reading.value);
                }
            }
            Err(index) => {
                let mut sample = Sample::empty(reading.timestamp);
                sample.set(reading.sensor, reading.value);
                self.buffer.insert(index, sample);
            }
        }

        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn latest(&self) -> LatestReadings {
        LatestReadings {
            ph: self.latest_value(SensorType::Ph),
            ntu: self.latest_value(SensorType::Ntu),
            tds: self.latest_value(SensorType::Tds),
        }
    }

    fn latest_value(&self, sensor: SensorType) -> Option<f64> {
        self.buffer.iter().rev().find_map(|sample| sample.get(sensor))
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
