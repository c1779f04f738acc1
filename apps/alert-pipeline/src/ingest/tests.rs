use super::{LatestReadings, SampleMerger, DEFAULT_WINDOW};
use crate::telemetry::{SensorReading, SensorType};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn reading(sensor: SensorType, value: f64, offset_secs: i64) -> SensorReading {
    SensorReading {
        sensor,
        value,
        timestamp: t(offset_secs),
    }
}

#[test]
fn merges_fields_that_share_a_timestamp() {
    let mut merger = SampleMerger::default();
    merger.push(reading(SensorType::Ph, 7.1, 0));
    merger.push(reading(SensorType::Ntu, 2.0, 0));
    merger.push(reading(SensorType::Tds, 300.0, 0));

    assert_eq!(merger.len(), 1);
    let sample = &merger.samples()[0];
    assert_eq!(sample.timestamp, t(0));
    assert_eq!(sample.ph, Some(7.1));
    assert_eq!(sample.ntu, Some(2.0));
    assert_eq!(sample.tds, Some(300.0));
}

#[test]
fn later_value_for_same_sensor_and_timestamp_overwrites() {
    let mut merger = SampleMerger::default();
    merger.push(reading(SensorType::Ph, 7.1, 0));
    merger.push(reading(SensorType::Ph, 7.4, 0));
    assert_eq!(merger.len(), 1);
    assert_eq!(merger.latest().ph, Some(7.4));
}

#[test]
fn latest_is_resolved_per_field() {
    let mut merger = SampleMerger::default();
    merger.push(reading(SensorType::Ph, 7.0, 0));
    merger.push(reading(SensorType::Ntu, 3.0, 60));

    assert_eq!(
        merger.latest(),
        LatestReadings {
            ph: Some(7.0),
            ntu: Some(3.0),
            tds: None,
        }
    );
}

#[test]
fn latest_prefers_newest_timestamp_not_arrival_order() {
    let mut merger = SampleMerger::default();
    merger.push(reading(SensorType::Ph, 8.0, 120));
    // Arrives later but carries an older timestamp.
    merger.push(reading(SensorType::Ph, 6.0, 60));

    let samples = merger.samples();
    assert_eq!(samples[0].timestamp, t(60));
    assert_eq!(samples[1].timestamp, t(120));
    assert_eq!(merger.latest().ph, Some(8.0));
}

#[test]
fn window_keeps_twenty_most_recent_samples() {
    let mut merger = SampleMerger::default();
    for i in 0..25 {
        merger.push(reading(SensorType::Ph, 7.0 + i as f64 / 100.0, i * 60));
    }

    assert_eq!(merger.len(), DEFAULT_WINDOW);
    let samples = merger.samples();
    assert_eq!(samples.first().unwrap().timestamp, t(5 * 60));
    assert_eq!(samples.last().unwrap().timestamp, t(24 * 60));
    assert!(samples.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
}

#[test]
fn stale_reading_is_evicted_when_window_is_full() {
    let mut merger = SampleMerger::new(3);
    for i in 1..=3 {
        merger.push(reading(SensorType::Tds, 100.0, i * 60));
    }
    merger.push(reading(SensorType::Ph, 7.0, 0));

    assert_eq!(merger.len(), 3);
    assert_eq!(merger.latest().ph, None);
    assert_eq!(merger.samples()[0].timestamp, t(60));
}

#[test]
fn empty_merger_reports_nothing() {
    let merger = SampleMerger::default();
    assert!(merger.is_empty());
    assert!(merger.latest().is_empty());
}
