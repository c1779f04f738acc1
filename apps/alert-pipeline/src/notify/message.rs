use crate::ingest::LatestReadings;
use crate::thresholds::{Violation, EVALUATION_ORDER};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Whether an alert came from the evaluator loop or from an operator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    Automatic,
    Manual,
}

impl AlertMode {
    pub fn marker(self) -> &'static str {
        match self {
            AlertMode::Automatic => "[AUTOMATIC ALERT]",
            AlertMode::Manual => "[MANUAL ALERT]",
        }
    }
}

impl fmt::Display for AlertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertMode::Automatic => f.write_str("automatic"),
            AlertMode::Manual => f.write_str("manual"),
        }
    }
}

/// Renders the single message body sent to every channel.
///
/// With violations, each one becomes a headline plus its advice. Without any,
/// the body is an all-clear notice listing the current readings.
pub fn format_message<Tz>(
    mode: AlertMode,
    violations: &[Violation],
    latest: &LatestReadings,
    at: &DateTime<Tz>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut blocks = Vec::with_capacity(violations.len() + 2);
    blocks.push(mode.marker().to_string());

    if violations.is_empty() {
        blocks.push(all_clear(latest));
    } else {
        blocks.extend(
            violations
                .iter()
                .map(|violation| format!("{}\n{}", violation.headline(), violation.advice)),
        );
    }

    blocks.push(format!("Timestamp: {}", at.format("%Y-%m-%d %H:%M:%S")));
    blocks.join("\n\n")
}

fn all_clear(latest: &LatestReadings) -> String {
    let mut lines = vec!["✅ All readings are within the configured thresholds.".to_string()];
    for sensor in EVALUATION_ORDER {
        let line = match latest.get(sensor) {
            Some(value) => format!("{}: {:.2}{}", sensor.label(), value, sensor.unit()),
            None => format!("{}: no data", sensor.label()),
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{evaluate, ThresholdConfig};
    use chrono::Utc;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn automatic_alert_lists_each_violation_with_advice() {
        let latest = LatestReadings {
            ph: Some(9.0),
            ntu: Some(6.0),
            tds: Some(100.0),
        };
        let violations = evaluate(&latest, &ThresholdConfig::default());
        let message = format_message(AlertMode::Automatic, &violations, &latest, &at());

        let expected = format!(
            "[AUTOMATIC ALERT]\n\n\
             ⚠️ Turbidity too high: 6.00 NTU (allowed 0.00–5.00 NTU)\n{}\n\n\
             ⚠️ pH too high: 9.00 (allowed 6.50–8.50)\n{}\n\n\
             Timestamp: 2025-03-01 08:00:00",
            violations[0].advice, violations[1].advice
        );
        assert_eq!(message, expected);
    }

    #[test]
    fn manual_alert_without_violations_is_an_all_clear() {
        let latest = LatestReadings {
            ph: Some(7.0),
            ntu: None,
            tds: Some(120.0),
        };
        let message = format_message(AlertMode::Manual, &[], &latest, &at());
        assert!(message.starts_with("[MANUAL ALERT]\n\n✅"));
        assert!(message.contains("pH: 7.00\n"));
        assert!(message.contains("Turbidity: no data"));
        assert!(message.contains("TDS: 120.00 ppm"));
        assert!(message.ends_with("Timestamp: 2025-03-01 08:00:00"));
    }
}
