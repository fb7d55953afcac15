//! Metrics source answering from a fixed set of samples and series

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::window::RangeWindow;
use super::{Labels, MetricsSource, Point, Sample, Selector, Series, NAME_LABEL};
use crate::error::{GatewayError, GatewayResult};

#[derive(Default)]
pub struct StaticMetrics {
    samples: RwLock<Vec<Sample>>,
    series: RwLock<Vec<Series>>,
    unhealthy: AtomicBool,
}

fn labels(metric: &str, pairs: &[(&str, &str)]) -> Labels {
    let mut labels: Labels = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.insert(NAME_LABEL.to_string(), metric.to_string());
    labels
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sample(&self, metric: &str, pairs: &[(&str, &str)], value: f64) {
        if let Ok(mut samples) = self.samples.write() {
            samples.push(Sample {
                labels: labels(metric, pairs),
                value,
            });
        }
    }

    pub fn with_sample(self, metric: &str, pairs: &[(&str, &str)], value: f64) -> Self {
        self.push_sample(metric, pairs, value);
        self
    }

    /// Add a range series; points are `(unix seconds, value)`
    pub fn push_series(&self, metric: &str, pairs: &[(&str, &str)], points: &[(f64, f64)]) {
        if let Ok(mut series) = self.series.write() {
            series.push(Series {
                labels: labels(metric, pairs),
                points: points
                    .iter()
                    .map(|&(timestamp, value)| Point { timestamp, value })
                    .collect(),
            });
        }
    }

    pub fn with_series(self, metric: &str, pairs: &[(&str, &str)], points: &[(f64, f64)]) -> Self {
        self.push_series(metric, pairs, points);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    fn poisoned() -> GatewayError {
        GatewayError::Internal("static metrics lock poisoned".to_string())
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn instant(&self, selector: &Selector) -> GatewayResult<Vec<Sample>> {
        let samples = self.samples.read().map_err(|_| Self::poisoned())?;
        Ok(samples
            .iter()
            .filter(|s| selector.matches(&s.labels))
            .cloned()
            .collect())
    }

    async fn range(&self, selector: &Selector, window: &RangeWindow) -> GatewayResult<Vec<Series>> {
        let series = self.series.read().map_err(|_| Self::poisoned())?;
        let start = window.start_ms as f64 / 1000.0;
        let end = window.end_ms as f64 / 1000.0;
        Ok(series
            .iter()
            .filter(|s| selector.matches(&s.labels))
            .map(|s| Series {
                labels: s.labels.clone(),
                points: s
                    .points
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end)
                    .copied()
                    .collect(),
            })
            .collect())
    }

    async fn ready(&self) -> GatewayResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("metrics backend is not healthy".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_instant_and_range_matching() {
        let metrics = StaticMetrics::new()
            .with_sample("kantaloupe_node_cpu_total", &[("cluster", "c1"), ("node", "n1")], 32.0)
            .with_sample("kantaloupe_node_cpu_total", &[("cluster", "c2"), ("node", "n1")], 16.0)
            .with_series("kantaloupe_cluster_cpu_used", &[("cluster", "c1")], &[(0.0, 1.0), (600.0, 2.0)]);

        let s = Selector::new("kantaloupe_node_cpu_total").eq("cluster", "c1");
        let samples = metrics.instant(&s).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 32.0);

        let window = RangeWindow {
            start_ms: 0,
            end_ms: 300_000,
            step: Duration::from_secs(30),
        };
        let s = Selector::new("kantaloupe_cluster_cpu_used").eq("cluster", "c1");
        let series = metrics.range(&s, &window).await.unwrap();
        assert_eq!(series[0].points.len(), 1);
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let metrics = StaticMetrics::new();
        assert!(metrics.ready().await.is_ok());
        metrics.set_healthy(false);
        assert!(metrics.ready().await.is_err());
    }
}
