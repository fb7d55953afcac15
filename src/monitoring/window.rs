//! Time windows for range queries
//!
//! A window comes either from explicit `start`/`end` timestamps (any of
//! s/ms/µs/ns, detected by magnitude) or from a `range` duration ending now.
//! The step defaults to a value that keeps a window near 150 points, and the
//! window edges are aligned to the step so repeated queries hit the same
//! sample timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};

const DEFAULT_RANGE: Duration = Duration::from_secs(3600);

/// Range parameters as they arrive on the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Duration such as `30m`, `6h` or `7d`
    #[serde(default)]
    pub range: Option<String>,
    /// Step in seconds; 0 or absent picks one from the window length
    #[serde(default)]
    pub step: Option<String>,
}

/// Aligned query window, edges in Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
    pub step: Duration,
}

impl RangeWindow {
    pub fn step_ms(&self) -> i64 {
        (self.step.as_millis() as i64).max(1)
    }

    /// Every expected sample timestamp, both edges inclusive
    pub fn timestamps(&self) -> Vec<i64> {
        let step = self.step_ms();
        let mut out = Vec::new();
        let mut t = self.start_ms;
        while t <= self.end_ms {
            out.push(t);
            t += step;
        }
        out
    }

    pub fn length(&self) -> Duration {
        Duration::from_millis((self.end_ms - self.start_ms).max(0) as u64)
    }

    /// Prometheus-style duration literal covering the window
    pub fn range_literal(&self) -> String {
        format!("{}s", self.length().as_secs().max(1))
    }
}

/// Convert a Unix timestamp of unknown unit to milliseconds
pub fn timestamp_to_millis(ts: i64) -> i64 {
    if ts > 1_000_000_000_000_000_000 {
        ts / 1_000_000
    } else if ts > 1_000_000_000_000_000 {
        ts / 1_000
    } else if ts > 1_000_000_000_000 {
        ts
    } else {
        ts.saturating_mul(1000)
    }
}

/// Step that keeps the window to a readable number of points
pub fn optimal_step(length: Duration) -> Duration {
    const MIN: u64 = 60;
    const HOUR: u64 = 3600;
    let secs = match length.as_secs() {
        s if s <= HOUR => 30,
        s if s <= 3 * HOUR => MIN,
        s if s <= 6 * HOUR => 2 * MIN,
        s if s <= 12 * HOUR => 5 * MIN,
        s if s <= 24 * HOUR => 10 * MIN,
        s if s <= 7 * 24 * HOUR => 2 * HOUR,
        s if s <= 30 * 24 * HOUR => 8 * HOUR,
        _ => 24 * HOUR,
    };
    Duration::from_secs(secs)
}

/// Parse `1h30m`, `45s`, `7d`, `500ms`
pub fn parse_duration(raw: &str) -> GatewayResult<Duration> {
    let invalid = || GatewayError::invalid(format!("invalid duration '{}'", raw));
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit_ms = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            _ => return Err(invalid()),
        };
        total_ms = total_ms.saturating_add(value.saturating_mul(unit_ms));
        rest = &rest[unit_len..];
    }
    if total_ms == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_millis(total_ms))
}

fn parse_i64(name: &str, raw: &Option<String>) -> GatewayResult<i64> {
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| GatewayError::invalid(format!("{} must be an integer, got '{}'", name, v))),
    }
}

impl RangeQuery {
    pub fn with_range(range: &str) -> Self {
        Self {
            range: Some(range.to_string()),
            ..Default::default()
        }
    }

    /// Resolve against `now`, choose the step, and align both edges
    pub fn resolve(&self, now: DateTime<Utc>) -> GatewayResult<RangeWindow> {
        let start = parse_i64("start", &self.start)?;
        let end = parse_i64("end", &self.end)?;
        let step_secs = parse_i64("step", &self.step)?;
        if step_secs < 0 {
            return Err(GatewayError::invalid("step must not be negative"));
        }

        let (start_ms, end_ms) = if start > 0 && end > 0 {
            let start_ms = timestamp_to_millis(start);
            // The end timestamp is inclusive.
            let end_ms = timestamp_to_millis(end) + 1;
            if end_ms <= start_ms {
                return Err(GatewayError::invalid("end must be after start"));
            }
            (start_ms, end_ms)
        } else {
            let length = match self.range.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                Some(r) => parse_duration(r)?,
                None => DEFAULT_RANGE,
            };
            let end_ms = now.timestamp_millis();
            (end_ms - length.as_millis() as i64, end_ms)
        };

        let step = if step_secs == 0 {
            optimal_step(Duration::from_millis((end_ms - start_ms) as u64))
        } else {
            Duration::from_secs(step_secs as u64)
        };
        let step_ms = step.as_millis() as i64;

        Ok(RangeWindow {
            start_ms: start_ms - start_ms.rem_euclid(step_ms),
            end_ms: end_ms - end_ms.rem_euclid(step_ms) + step_ms,
            step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_017, 0).unwrap()
    }

    #[test]
    fn test_optimal_step_table() {
        let h = |n: u64| Duration::from_secs(n * 3600);
        assert_eq!(optimal_step(h(1)), Duration::from_secs(30));
        assert_eq!(optimal_step(h(3)), Duration::from_secs(60));
        assert_eq!(optimal_step(h(6)), Duration::from_secs(120));
        assert_eq!(optimal_step(h(12)), Duration::from_secs(300));
        assert_eq!(optimal_step(h(24)), Duration::from_secs(600));
        assert_eq!(optimal_step(h(24 * 7)), Duration::from_secs(7200));
        assert_eq!(optimal_step(h(24 * 30)), Duration::from_secs(8 * 3600));
        assert_eq!(optimal_step(h(24 * 90)), Duration::from_secs(86400));
    }

    #[test]
    fn test_timestamp_units() {
        assert_eq!(timestamp_to_millis(1_700_000_000), 1_700_000_000_000);
        assert_eq!(timestamp_to_millis(1_700_000_000_123), 1_700_000_000_123);
        assert_eq!(timestamp_to_millis(1_700_000_000_123_456), 1_700_000_000_123);
        assert_eq!(
            timestamp_to_millis(1_700_000_000_123_456_789),
            1_700_000_000_123
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn test_default_window_is_aligned_hour() {
        let w = RangeQuery::default().resolve(now()).unwrap();
        assert_eq!(w.step, Duration::from_secs(30));
        assert_eq!(w.start_ms % 30_000, 0);
        assert_eq!(w.end_ms % 30_000, 0);
        assert!(w.end_ms > now().timestamp_millis());
        assert!(w.start_ms <= now().timestamp_millis() - 3_600_000);
    }

    #[test]
    fn test_explicit_bounds_and_step() {
        let q = RangeQuery {
            start: Some("1700000000".into()),
            end: Some("1700003600".into()),
            step: Some("600".into()),
            ..Default::default()
        };
        let w = q.resolve(now()).unwrap();
        assert_eq!(w.step, Duration::from_secs(600));
        assert_eq!(w.start_ms, 1_699_999_800_000);
        assert_eq!(w.end_ms, 1_700_004_000_000);
        assert_eq!(w.timestamps().len(), 8);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let q = RangeQuery {
            step: Some("-5".into()),
            ..Default::default()
        };
        assert!(q.resolve(now()).is_err());
        assert!(RangeQuery::with_range("forever").resolve(now()).is_err());
    }
}
