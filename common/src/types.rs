use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LUX_PER_FOOT_CANDLE: f64 = 10.764;

pub fn lux_to_foot_candles(lux: f64) -> f64 {
    lux / LUX_PER_FOOT_CANDLE
}

/// One reading as published by a rack sensor and stored per month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "takenAtMs", with = "chrono::serde::ts_milliseconds")]
    pub taken_at: DateTime<Utc>,
    #[serde(rename = "temperatureC")]
    pub temperature_c: f64,
    pub lux: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl SensorReading {
    pub fn is_plausible(&self) -> bool {
        self.temperature_c.is_finite()
            && (-40.0..=85.0).contains(&self.temperature_c)
            && self.lux.is_finite()
            && (0.0..=200_000.0).contains(&self.lux)
            && self
                .humidity
                .map_or(true, |h| h.is_finite() && (0.0..=100.0).contains(&h))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LampState {
    pub on: bool,
    #[serde(
        rename = "changedAtMs",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub changed_at: Option<DateTime<Utc>>,
}

impl LampState {
    pub fn command_str(on: bool) -> &'static str {
        if on {
            "on"
        } else {
            "off"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn reading_round_trips_with_wire_names() {
        let reading = SensorReading {
            taken_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            temperature_c: 23.4,
            lux: 1250.0,
            humidity: Some(54.5),
        };

        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["takenAtMs"], serde_json::json!(1773480413000i64));
        assert_eq!(json["temperatureC"], serde_json::json!(23.4));

        let back: SensorReading = serde_json::from_value(json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn humidity_is_optional_on_the_wire() {
        let raw = r#"{"takenAtMs": 1773480413000, "temperatureC": 21.0, "lux": 900.0}"#;
        let reading: SensorReading = serde_json::from_str(raw).unwrap();
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn rejects_implausible_readings() {
        let mut reading = SensorReading {
            taken_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            temperature_c: 23.4,
            lux: 1250.0,
            humidity: None,
        };
        assert!(reading.is_plausible());

        reading.lux = -1.0;
        assert!(!reading.is_plausible());

        reading.lux = 1250.0;
        reading.temperature_c = f64::NAN;
        assert!(!reading.is_plausible());

        reading.temperature_c = 23.4;
        reading.humidity = Some(140.0);
        assert!(!reading.is_plausible());
    }

    #[test]
    fn converts_lux_to_foot_candles() {
        assert!((lux_to_foot_candles(10.764) - 1.0).abs() < 1e-9);
    }
}
