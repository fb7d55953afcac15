//! Metrics access for clusters, nodes, cards and workloads
//!
//! Metrics come from a Prometheus-compatible backend through the
//! [`MetricsSource`] trait. The gateway only issues plain selectors
//! (`metric{label="v",label=~"re"}`); any reduction happens in Rust so that
//! the in-memory source in [`fixed`] can answer the same questions.
//!
//! Metric families:
//!
//! - `kantaloupe_cluster_<quantity>{cluster}`
//! - `kantaloupe_node_<quantity>{cluster,node}`
//! - `kantaloupe_workload_<quantity>{cluster,namespace,pod,deployment,node}`
//! - `kantaloupe_global_<quantity>`
//! - `kantaloupe_gpu_<reading>{cluster,node,vendor,modelName,UUID}`

pub mod fixed;
pub mod gpu;
pub mod prometheus;
pub mod service;
pub mod trend;
pub mod window;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

pub use self::service::{ClusterMetrics, Quantity, ResourceType, Scope};
pub use self::window::{RangeQuery, RangeWindow};

/// Label carrying the metric name on every sample
pub const NAME_LABEL: &str = "__name__";

pub type Labels = BTreeMap<String, String>;

// ============================================================================
// Selectors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub label: String,
    pub op: MatchOp,
    pub value: String,
}

impl Matcher {
    pub fn matches(&self, labels: &Labels) -> bool {
        let actual = labels.get(&self.label).map(String::as_str).unwrap_or("");
        match self.op {
            MatchOp::Equal => actual == self.value,
            MatchOp::Regex => Regex::new(&format!("^(?:{})$", self.value))
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

/// An instant-vector selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub metric: String,
    pub matchers: Vec<Matcher>,
}

impl Selector {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            matchers: Vec::new(),
        }
    }

    pub fn eq(mut self, label: &str, value: impl Into<String>) -> Self {
        self.matchers.push(Matcher {
            label: label.to_string(),
            op: MatchOp::Equal,
            value: value.into(),
        });
        self
    }

    pub fn re(mut self, label: &str, pattern: impl Into<String>) -> Self {
        self.matchers.push(Matcher {
            label: label.to_string(),
            op: MatchOp::Regex,
            value: pattern.into(),
        });
        self
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        labels.get(NAME_LABEL).map(String::as_str) == Some(self.metric.as_str())
            && self.matchers.iter().all(|m| m.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric)?;
        if self.matchers.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let op = match m.op {
                MatchOp::Equal => "=",
                MatchOp::Regex => "=~",
            };
            let escaped = m.value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "{}{}\"{}\"", m.label, op, escaped)?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// Results
// ============================================================================

/// One element of an instant vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: Labels,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Point of a range vector; `timestamp` is Unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: f64,
    pub value: f64,
}

/// One element of a range vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: Labels,
    pub points: Vec<Point>,
}

impl Series {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn average(&self) -> Option<f64> {
        if self.points.is_empty() {
            None
        } else {
            Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
        }
    }
}

/// Sum of all sample values, `None` when the vector is empty
pub fn sum(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().map(|s| s.value).sum())
    }
}

/// Prometheus-compatible query backend
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn instant(&self, selector: &Selector) -> GatewayResult<Vec<Sample>>;

    async fn range(&self, selector: &Selector, window: &RangeWindow) -> GatewayResult<Vec<Series>>;

    /// Readiness probe (`/-/healthy`)
    async fn ready(&self) -> GatewayResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_display() {
        let s = Selector::new("kantaloupe_workload_cpu_used")
            .eq("namespace", "team-a")
            .re("pod", "train.+");
        assert_eq!(
            s.to_string(),
            r#"kantaloupe_workload_cpu_used{namespace="team-a",pod=~"train.+"}"#
        );
        assert_eq!(Selector::new("up").to_string(), "up");
    }

    #[test]
    fn test_selector_matches() {
        let s = Selector::new("m").eq("cluster", "c1").re("pod", "web.+");
        assert!(s.matches(&labels(&[
            (NAME_LABEL, "m"),
            ("cluster", "c1"),
            ("pod", "web-7d9")
        ])));
        assert!(!s.matches(&labels(&[(NAME_LABEL, "m"), ("cluster", "c1"), ("pod", "web")])));
        assert!(!s.matches(&labels(&[(NAME_LABEL, "other"), ("cluster", "c1")])));
    }

    #[test]
    fn test_sum_and_average() {
        assert_eq!(sum(&[]), None);
        let series = Series {
            labels: Labels::new(),
            points: vec![
                Point { timestamp: 0.0, value: 2.0 },
                Point { timestamp: 30.0, value: 4.0 },
            ],
        };
        assert_eq!(series.average(), Some(3.0));
    }
}
