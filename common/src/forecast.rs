//! Light-depreciation estimator.
//!
//! LED grow lamps lose output over their service life. Readings taken while
//! the lamp is on are normalized against the brightest observation and fitted
//! with an ordinary-least-squares line of percent output vs. elapsed days;
//! a negative slope projects the date at which output crosses the
//! replacement floor.

use chrono::{DateTime, Duration, Utc};

use crate::config::ForecastConfig;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    pub at: DateTime<Utc>,
    pub lux: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedPoint {
    pub at: DateTime<Utc>,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepreciationEstimate {
    /// Fitted output curve, sampled at evenly spaced days.
    pub curve: Vec<PredictedPoint>,
    /// Projected instant at which output reaches the floor percent.
    pub crossing: DateTime<Utc>,
    /// Brightest lamp-on reading observed (the 100% reference).
    pub peak_lux: f64,
    pub slope_percent_per_day: f64,
}

/// Fits the depreciation line over lamp-on samples.
///
/// Returns `None` when no decay can be established: nothing above the
/// lights-on threshold, no spread in sample times, or a flat/rising fit.
/// Callers are expected to skip series shorter than
/// [`ForecastConfig::min_samples`] before calling.
pub fn estimate_depreciation(
    samples: &[LightSample],
    config: &ForecastConfig,
) -> Option<DepreciationEstimate> {
    let lit: Vec<LightSample> = samples
        .iter()
        .copied()
        .filter(|s| s.lux > config.lights_on_lux)
        .collect();
    let first = lit.iter().map(|s| s.at).min()?;

    let peak_lux = lit.iter().map(|s| s.lux).fold(f64::MIN, f64::max);
    if !(peak_lux > 0.0) {
        return None;
    }

    // Percent of peak vs. elapsed days since the first lamp-on sample.
    let points: Vec<(f64, f64)> = lit
        .iter()
        .map(|s| {
            let days = (s.at - first).num_milliseconds() as f64 / MS_PER_DAY;
            (days, s.lux / peak_lux * 100.0)
        })
        .collect();

    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for &(x, y) in &points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < 1e-12 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    if slope >= 0.0 {
        return None;
    }

    let crossing_day = (config.floor_percent - intercept) / slope;
    let crossing = first + days_to_duration(crossing_day);

    let last_day = points.iter().map(|&(x, _)| x).fold(0.0, f64::max);
    let span = (crossing_day * config.projection_margin).max(last_day);
    let steps = config.curve_points.max(2);
    let curve = (0..steps)
        .map(|i| {
            let day = span * i as f64 / (steps - 1) as f64;
            PredictedPoint {
                at: first + days_to_duration(day),
                percent: intercept + slope * day,
            }
        })
        .collect();

    Some(DepreciationEstimate {
        curve,
        crossing,
        peak_lux,
        slope_percent_per_day: slope,
    })
}

fn days_to_duration(days: f64) -> Duration {
    Duration::milliseconds((days * MS_PER_DAY) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at_day(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + Duration::days(day)
    }

    fn decaying_series(days: i64, start_lux: f64, lux_per_day: f64) -> Vec<LightSample> {
        (0..=days)
            .map(|d| LightSample {
                at: at_day(d),
                lux: start_lux - lux_per_day * d as f64,
            })
            .collect()
    }

    #[test]
    fn all_samples_at_or_below_threshold_yield_no_forecast() {
        let samples: Vec<LightSample> = (0..20)
            .map(|d| LightSample {
                at: at_day(d),
                lux: if d % 2 == 0 { 0.0 } else { 100.0 },
            })
            .collect();

        assert_eq!(
            estimate_depreciation(&samples, &ForecastConfig::default()),
            None
        );
    }

    #[test]
    fn linear_decay_matches_closed_form_crossing() {
        // 1000 lux peak losing 10 lux/day: percent(d) = 100 - d, so the 80%
        // floor is crossed exactly 20 days after the first sample.
        let samples = decaying_series(10, 1000.0, 10.0);
        let estimate = estimate_depreciation(&samples, &ForecastConfig::default()).unwrap();

        let expected = at_day(20);
        let delta = (estimate.crossing - expected).num_seconds().abs();
        assert!(delta < 60, "crossing off by {delta}s");
        assert_eq!(estimate.peak_lux, 1000.0);
        assert!((estimate.slope_percent_per_day + 1.0).abs() < 1e-6);
    }

    #[test]
    fn flat_series_yields_no_forecast() {
        let samples = decaying_series(10, 900.0, 0.0);
        assert_eq!(
            estimate_depreciation(&samples, &ForecastConfig::default()),
            None
        );
    }

    #[test]
    fn rising_series_yields_no_forecast() {
        let samples = decaying_series(10, 500.0, -20.0);
        assert_eq!(
            estimate_depreciation(&samples, &ForecastConfig::default()),
            None
        );
    }

    #[test]
    fn single_instant_has_no_day_spread() {
        let samples = vec![
            LightSample {
                at: at_day(0),
                lux: 900.0,
            },
            LightSample {
                at: at_day(0),
                lux: 800.0,
            },
        ];
        assert_eq!(
            estimate_depreciation(&samples, &ForecastConfig::default()),
            None
        );
    }

    #[test]
    fn lamp_off_readings_do_not_disturb_the_fit() {
        let mut samples = decaying_series(10, 1000.0, 10.0);
        let clean = estimate_depreciation(&samples, &ForecastConfig::default()).unwrap();

        // Interleave night readings; the fit must not move.
        for d in 0..=10 {
            samples.push(LightSample {
                at: at_day(d) + Duration::hours(10),
                lux: 3.0,
            });
        }
        let noisy = estimate_depreciation(&samples, &ForecastConfig::default()).unwrap();

        assert_eq!(noisy.crossing, clean.crossing);
        assert_eq!(noisy.peak_lux, clean.peak_lux);
    }

    #[test]
    fn curve_spans_projection_margin_past_the_crossing() {
        let config = ForecastConfig::default();
        let samples = decaying_series(10, 1000.0, 10.0);
        let estimate = estimate_depreciation(&samples, &config).unwrap();

        assert_eq!(estimate.curve.len(), config.curve_points);
        let first = estimate.curve.first().unwrap();
        let last = estimate.curve.last().unwrap();
        assert_eq!(first.at, at_day(0));
        assert!((first.percent - 100.0).abs() < 1e-6);

        // Crossing day 20, margin 1.2 => curve runs to day 24 at 76%.
        assert_eq!(last.at, at_day(24));
        assert!((last.percent - 76.0).abs() < 1e-6);
    }
}
