//! Chart payload builder.
//!
//! Figures are plain serializable data (named series plus an optional
//! horizontal threshold); whatever front end consumes the API decides how
//! to draw them.

use chrono::FixedOffset;
use serde::Serialize;

use rack_common::{lux_to_foot_candles, DepreciationEstimate, SensorReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightUnit {
    Lux,
    FootCandles,
}

impl LightUnit {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("fc") | Some("footcandles") => Self::FootCandles,
            _ => Self::Lux,
        }
    }

    fn convert(self, lux: f64) -> f64 {
        match self {
            Self::Lux => lux,
            Self::FootCandles => lux_to_foot_candles(lux),
        }
    }

    fn axis_label(self) -> &'static str {
        match self {
            Self::Lux => "Light (lux)",
            Self::FootCandles => "Light (fc)",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Figure {
    pub title: &'static str,
    #[serde(rename = "yAxis")]
    pub y_axis: &'static str,
    pub series: Vec<Series>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
}

#[derive(Debug, Serialize)]
pub struct Series {
    pub name: &'static str,
    pub style: &'static str,
    pub x: Vec<String>,
    pub y: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct Threshold {
    pub y: f64,
    pub label: &'static str,
}

pub fn temperature_figure(readings: &[SensorReading], tz: FixedOffset) -> Figure {
    Figure {
        title: "Temperature over time",
        y_axis: "Temperature (°C)",
        series: vec![Series {
            name: "temperature",
            style: "solid",
            x: local_timestamps(readings, tz),
            y: readings.iter().map(|r| r.temperature_c).collect(),
        }],
        threshold: None,
    }
}

pub fn light_figure(
    readings: &[SensorReading],
    forecast: Option<&DepreciationEstimate>,
    unit: LightUnit,
    tz: FixedOffset,
    floor_percent: f64,
) -> Figure {
    let mut series = vec![Series {
        name: "light",
        style: "solid",
        x: local_timestamps(readings, tz),
        y: readings.iter().map(|r| unit.convert(r.lux)).collect(),
    }];

    let mut threshold = None;
    if let Some(estimate) = forecast {
        // The fitted curve is in percent of peak; scale back to light units
        // so it shares the measurement axis.
        series.push(Series {
            name: "forecast",
            style: "dashed",
            x: estimate
                .curve
                .iter()
                .map(|p| p.at.with_timezone(&tz).to_rfc3339())
                .collect(),
            y: estimate
                .curve
                .iter()
                .map(|p| unit.convert(p.percent / 100.0 * estimate.peak_lux))
                .collect(),
        });
        threshold = Some(Threshold {
            y: unit.convert(estimate.peak_lux * floor_percent / 100.0),
            label: "replacement floor",
        });
    }

    Figure {
        title: "Light level over time",
        y_axis: unit.axis_label(),
        series,
        threshold,
    }
}

fn local_timestamps(readings: &[SensorReading], tz: FixedOffset) -> Vec<String> {
    readings
        .iter()
        .map(|r| r.taken_at.with_timezone(&tz).to_rfc3339())
        .collect()
}
