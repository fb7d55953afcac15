//! Percentage time series built from raw range vectors

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::window::RangeWindow;
use super::Series;

/// Milliseconds of slack when matching samples to expected timestamps
const TOLERANCE_MS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Unix milliseconds
    pub timestamp: i64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub metric: String,
    pub points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn empty(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendResponse {
    pub data: Vec<TrendSeries>,
}

/// Put a series on the window grid, `None` where no sample landed
pub fn fill(series: &Series, window: &RangeWindow) -> Vec<TrendPoint> {
    let by_ts: HashMap<i64, f64> = series
        .points
        .iter()
        .map(|p| ((p.timestamp * 1000.0).round() as i64, p.value))
        .collect();

    window
        .timestamps()
        .into_iter()
        .map(|ts| {
            let value = (-TOLERANCE_MS..=TOLERANCE_MS).find_map(|off| by_ts.get(&(ts + off)).copied());
            TrendPoint {
                timestamp: ts,
                value,
            }
        })
        .collect()
}

fn ratio_series(
    metric: &str,
    numerator: Option<&Series>,
    denominator: &[TrendPoint],
    window: &RangeWindow,
    ratio: impl Fn(f64, f64) -> f64,
) -> TrendSeries {
    let Some(numerator) = numerator else {
        return TrendSeries::empty(metric);
    };
    let numerator = fill(numerator, window);
    let points = numerator
        .iter()
        .zip(denominator)
        .map(|(num, den)| TrendPoint {
            timestamp: num.timestamp,
            value: den.value.map(|d| match num.value {
                None => 0.0,
                Some(n) => ratio(n, d),
            }),
        })
        .collect();
    TrendSeries {
        metric: metric.to_string(),
        points,
    }
}

fn percent_of(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d * 100.0
    }
}

/// `allocated` and `used` as a percentage of `total`
///
/// A timestamp without a total is `None`; a missing numerator under a
/// present total counts as 0. No total series at all yields two empty
/// series.
pub fn calculate_usage(
    total: &[Series],
    allocated: &[Series],
    used: &[Series],
    window: &RangeWindow,
) -> TrendResponse {
    let Some(total) = total.first() else {
        return TrendResponse {
            data: vec![TrendSeries::empty("allocated"), TrendSeries::empty("used")],
        };
    };
    let total = fill(total, window);
    TrendResponse {
        data: vec![
            ratio_series("allocated", allocated.first(), &total, window, percent_of),
            ratio_series("used", used.first(), &total, window, percent_of),
        ],
    }
}

/// Workload `used` as a percentage of its own allocation
///
/// With nothing allocated the raw usage is scaled by 100.
pub fn calculate_workload_usage(
    allocated: &[Series],
    used: &[Series],
    window: &RangeWindow,
    metric: &str,
) -> TrendResponse {
    let Some(allocated) = allocated.first() else {
        return TrendResponse {
            data: vec![TrendSeries::empty(metric)],
        };
    };
    let allocated = fill(allocated, window);
    let series = ratio_series(metric, used.first(), &allocated, window, |n, d| {
        if d == 0.0 {
            n * 100.0
        } else {
            n / d * 100.0
        }
    });
    TrendResponse { data: vec![series] }
}

/// A raw series on the grid under a fixed name
pub fn raw_series(series: &[Series], window: &RangeWindow, metric: &str) -> TrendSeries {
    TrendSeries {
        metric: metric.to_string(),
        points: series.first().map(|s| fill(s, window)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{Labels, Point};
    use std::time::Duration;

    fn window() -> RangeWindow {
        RangeWindow {
            start_ms: 0,
            end_ms: 120_000,
            step: Duration::from_secs(30),
        }
    }

    fn series(points: &[(f64, f64)]) -> Series {
        Series {
            labels: Labels::new(),
            points: points
                .iter()
                .map(|&(timestamp, value)| Point { timestamp, value })
                .collect(),
        }
    }

    #[test]
    fn test_fill_marks_gaps() {
        let filled = fill(&series(&[(0.0, 1.0), (60.001, 3.0)]), &window());
        let values: Vec<Option<f64>> = filled.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(1.0), None, Some(3.0), None, None]);
        assert_eq!(filled[4].timestamp, 120_000);
    }

    #[test]
    fn test_usage_percentages() {
        let total = [series(&[(0.0, 200.0), (30.0, 200.0), (60.0, 200.0)])];
        let allocated = [series(&[(0.0, 50.0), (60.0, 100.0)])];
        let used = [series(&[(0.0, 20.0), (30.0, 40.0)])];
        let resp = calculate_usage(&total, &allocated, &used, &window());

        assert_eq!(resp.data[0].metric, "allocated");
        let allocated: Vec<Option<f64>> = resp.data[0].points.iter().map(|p| p.value).collect();
        // Missing numerator under a present total is 0, no total is None.
        assert_eq!(allocated, vec![Some(25.0), Some(0.0), Some(50.0), None, None]);

        let used: Vec<Option<f64>> = resp.data[1].points.iter().map(|p| p.value).collect();
        assert_eq!(used, vec![Some(10.0), Some(20.0), Some(0.0), None, None]);
    }

    #[test]
    fn test_usage_without_total_is_empty() {
        let resp = calculate_usage(&[], &[series(&[(0.0, 1.0)])], &[], &window());
        assert_eq!(resp.data.len(), 2);
        assert!(resp.data.iter().all(|s| s.points.is_empty()));
    }

    #[test]
    fn test_workload_usage_zero_allocation() {
        let allocated = [series(&[(0.0, 0.0), (30.0, 4.0)])];
        let used = [series(&[(0.0, 0.5), (30.0, 1.0)])];
        let resp = calculate_workload_usage(&allocated, &used, &window(), "team-a/train");
        let values: Vec<Option<f64>> = resp.data[0].points.iter().map(|p| p.value).collect();
        assert_eq!(values[..2], [Some(50.0), Some(25.0)]);
        assert_eq!(resp.data[0].metric, "team-a/train");
    }
}
