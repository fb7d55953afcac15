//! Fan-out/fan-in across member clusters
//!
//! Every aggregation endpoint asks N clusters the same question and folds
//! the answers. [`FanOut`] bounds each call by the per-call timeout, the
//! whole round by an overall deadline, and the number of calls in flight
//! by a concurrency limit.
//!
//! Failures never fail the request. A cluster that errors or misses the
//! deadline becomes a [`ClusterFailure`], is left out of the reduction, and
//! is reported back in the response's `failedClusters` list.

pub mod platform;

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{ErrorKind, GatewayError, GatewayResult};

pub use platform::PlatformService;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15);
pub const DEFAULT_CONCURRENCY: usize = 10;

/// One cluster that did not contribute to an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFailure {
    pub cluster: String,
    pub code: ErrorKind,
    pub message: String,
}

impl ClusterFailure {
    pub fn new(cluster: &str, err: &GatewayError) -> Self {
        Self {
            cluster: cluster.to_string(),
            code: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// Result of asking one cluster
#[derive(Debug, Clone)]
pub enum ClusterOutcome<T> {
    Ok(T),
    Err(ClusterFailure),
}

/// Degradation block flattened into every aggregate response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degraded {
    pub degraded: bool,
    pub failed_clusters: Vec<ClusterFailure>,
}

impl Degraded {
    pub fn from_failures(failed_clusters: Vec<ClusterFailure>) -> Self {
        Self {
            degraded: !failed_clusters.is_empty(),
            failed_clusters,
        }
    }

    /// Fold in failures from another fan-out
    pub fn extend(&mut self, failures: impl IntoIterator<Item = ClusterFailure>) {
        self.failed_clusters.extend(failures);
        self.degraded = !self.failed_clusters.is_empty();
    }
}

/// Per-cluster outcomes, in the order the targets were given
pub struct FanIn<T> {
    pub outcomes: Vec<(String, ClusterOutcome<T>)>,
}

impl<T> FanIn<T> {
    /// Split into successful results and the failure report
    pub fn partition(self) -> (Vec<(String, T)>, Degraded) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for (cluster, outcome) in self.outcomes {
            match outcome {
                ClusterOutcome::Ok(value) => ok.push((cluster, value)),
                ClusterOutcome::Err(failure) => failed.push(failure),
            }
        }
        (ok, Degraded::from_failures(failed))
    }
}

/// Fan-out limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub call_timeout: Duration,
    pub deadline: Duration,
    pub concurrency: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            deadline: DEFAULT_DEADLINE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl FanOut {
    /// Never wait longer than the caller is willing to
    pub fn bounded_by(mut self, caller: Option<Duration>) -> Self {
        if let Some(caller) = caller {
            self.deadline = self.deadline.min(caller);
            self.call_timeout = self.call_timeout.min(self.deadline);
        }
        self
    }

    /// Bound a single remote call by the per-call timeout
    pub async fn call<T, Fut>(&self, target: &str, fut: Fut) -> GatewayResult<T>
    where
        Fut: Future<Output = GatewayResult<T>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(target, self.call_timeout)),
        }
    }

    /// Run `f` for every target and collect what came back in time
    pub async fn run<T, F, Fut>(&self, targets: Vec<String>, f: F) -> FanIn<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let deadline = Instant::now() + self.deadline;
        let mut slots: Vec<Option<ClusterOutcome<T>>> = targets.iter().map(|_| None).collect();

        let calls = targets.clone().into_iter().enumerate().map(|(idx, target)| {
            let fut = f(target.clone());
            async move {
                let outcome = match self.call(&target, fut).await {
                    Ok(value) => ClusterOutcome::Ok(value),
                    Err(e) => {
                        debug!(cluster = %target, code = %e.kind(), "Fan-out call failed: {}", e);
                        ClusterOutcome::Err(ClusterFailure::new(&target, &e))
                    }
                };
                (idx, outcome)
            }
        });
        let mut pending = stream::iter(calls).buffer_unordered(self.concurrency.max(1));

        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((idx, outcome))) => slots[idx] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        deadline_ms = self.deadline.as_millis() as u64,
                        "Fan-out deadline reached with clusters outstanding"
                    );
                    break;
                }
            }
        }
        drop(pending);

        let late = GatewayError::Timeout(format!(
            "no answer within the {}ms aggregation deadline",
            self.deadline.as_millis()
        ));
        let outcomes = targets
            .into_iter()
            .zip(slots)
            .map(|(target, slot)| {
                let outcome = slot
                    .unwrap_or_else(|| ClusterOutcome::Err(ClusterFailure::new(&target, &late)));
                (target, outcome)
            })
            .collect();
        FanIn { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{}", i)).collect()
    }

    #[tokio::test]
    async fn test_all_succeed_in_order() {
        let fan = FanOut::default();
        let (ok, degraded) = fan
            .run(names(5), |name| async move { Ok(name.len()) })
            .await
            .partition();
        assert_eq!(ok.len(), 5);
        assert_eq!(ok[0].0, "c0");
        assert!(!degraded.degraded);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let fan = FanOut::default();
        let (ok, degraded) = fan
            .run(names(3), |name| async move {
                if name == "c1" {
                    Err(GatewayError::unavailable(&name, "connection refused"))
                } else {
                    Ok(1)
                }
            })
            .await
            .partition();
        assert_eq!(ok.len(), 2);
        assert!(degraded.degraded);
        assert_eq!(degraded.failed_clusters[0].cluster, "c1");
        assert_eq!(degraded.failed_clusters[0].code, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_slow_cluster_times_out() {
        let fan = FanOut {
            call_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (ok, degraded) = fan
            .run(names(2), |name| async move {
                if name == "c0" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(())
            })
            .await
            .partition();
        assert_eq!(ok.len(), 1);
        assert_eq!(degraded.failed_clusters[0].code, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_overall_deadline() {
        let fan = FanOut {
            call_timeout: Duration::from_secs(10),
            deadline: Duration::from_millis(50),
            concurrency: 1,
        };
        let (ok, degraded) = fan
            .run(names(3), |_| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            })
            .await
            .partition();
        assert!(ok.len() < 3);
        assert_eq!(ok.len() + degraded.failed_clusters.len(), 3);
        assert!(degraded
            .failed_clusters
            .iter()
            .all(|f| f.code == ErrorKind::Timeout));
    }

    #[test]
    fn test_caller_deadline_caps() {
        let fan = FanOut::default().bounded_by(Some(Duration::from_secs(2)));
        assert_eq!(fan.deadline, Duration::from_secs(2));
        assert_eq!(fan.call_timeout, Duration::from_secs(2));
        let fan = FanOut::default().bounded_by(Some(Duration::from_secs(60)));
        assert_eq!(fan.deadline, DEFAULT_DEADLINE);
    }
}
