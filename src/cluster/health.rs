//! Active health checker for member clusters
//!
//! Runs in the background next to the HTTP server. Every interval it probes
//! each registered cluster's `/version` endpoint and flips the cluster's
//! state once enough consecutive probes agree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::registry::{ClusterEntry, ClusterRegistry};
use super::types::ClusterState;
use crate::backend::ClusterBackend;
use crate::resources::meta::Condition;

pub const READY_CONDITION: &str = "Ready";

/// Configuration for the health checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckerConfig {
    /// Seconds between probe rounds
    pub interval_secs: u64,
    /// Timeout for a single probe
    pub timeout_secs: u64,
    /// Consecutive failures before a cluster is marked UNHEALTH
    pub failure_threshold: u32,
    /// Consecutive successes before a cluster is marked RUNNING again
    pub success_threshold: u32,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 5,
            failure_threshold: 3,
            success_threshold: 1,
        }
    }
}

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbeResult {
    pub success: bool,
    /// Kubernetes version reported by a successful probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probe history kept on each registry entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounters {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<HealthProbeResult>,
}

/// Format a duration as human-readable string
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Probe one cluster's API server
pub async fn probe_cluster(backend: &dyn ClusterBackend, timeout_duration: Duration) -> HealthProbeResult {
    let start = Instant::now();
    let result = timeout(timeout_duration, backend.server_version()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let timestamp = Utc::now();

    match result {
        Ok(Ok(version)) => HealthProbeResult {
            success: true,
            version: Some(version),
            latency_ms,
            timestamp,
            error: None,
        },
        Ok(Err(e)) => HealthProbeResult {
            success: false,
            version: None,
            latency_ms,
            timestamp,
            error: Some(e.to_string()),
        },
        Err(_) => HealthProbeResult {
            success: false,
            version: None,
            latency_ms: timeout_duration.as_millis() as u64,
            timestamp,
            error: Some("Timeout".to_string()),
        },
    }
}

/// Fold a probe into an entry; returns the new state when it changed
pub fn apply_probe(
    entry: &mut ClusterEntry,
    probe: HealthProbeResult,
    config: &HealthCheckerConfig,
) -> Option<ClusterState> {
    let counters = &mut entry.health;
    let status = &mut entry.cluster.status;
    let mut transition = None;

    if probe.success {
        counters.consecutive_successes += 1;
        counters.consecutive_failures = 0;
        if let Some(version) = &probe.version {
            status.kubernetes_version = version.clone();
        }
        if counters.consecutive_successes >= config.success_threshold
            && status.state != ClusterState::Running
        {
            status.state = ClusterState::Running;
            set_ready(&mut status.conditions, true, "ClusterReady", "cluster is healthy");
            transition = Some(ClusterState::Running);
        }
    } else {
        counters.consecutive_failures += 1;
        counters.consecutive_successes = 0;
        if counters.consecutive_failures >= config.failure_threshold
            && status.state == ClusterState::Running
        {
            status.state = ClusterState::Unhealth;
            let message = probe.error.clone().unwrap_or_default();
            set_ready(&mut status.conditions, false, "ClusterNotReachable", &message);
            transition = Some(ClusterState::Unhealth);
        }
    }

    counters.last_probe = Some(probe);
    transition
}

/// Replace the Ready condition, keeping the others
pub fn set_ready(conditions: &mut Vec<Condition>, ready: bool, reason: &str, message: &str) {
    conditions.retain(|c| c.type_ != READY_CONDITION);
    conditions.insert(0, Condition::new(READY_CONDITION, ready, reason, message));
}

/// Probe every registered cluster once and record the results
pub async fn check_clusters(registry: &ClusterRegistry, config: &HealthCheckerConfig) {
    let entries = registry.list().await;
    if entries.is_empty() {
        trace!("No clusters to probe");
        return;
    }
    debug!("Probing {} clusters", entries.len());

    let timeout_duration = Duration::from_secs(config.timeout_secs);
    let probes = entries.iter().map(|entry| async move {
        let probe = probe_cluster(entry.backend.as_ref(), timeout_duration).await;
        (entry.name().to_string(), probe)
    });
    let results = futures::future::join_all(probes).await;

    for (name, probe) in results {
        let latency = probe.latency_ms;
        let error = probe.error.clone();
        let outcome = registry
            .update_status(&name, |entry| Ok(apply_probe(entry, probe, config)))
            .await;
        match outcome {
            Ok(Some(ClusterState::Running)) => {
                info!(cluster = %name, latency_ms = latency, "Cluster is healthy again")
            }
            Ok(Some(ClusterState::Unhealth)) => {
                warn!(cluster = %name, error = ?error, "Cluster is now unhealthy")
            }
            Ok(None) => {}
            // Deleted while the probe was in flight.
            Err(e) => debug!(cluster = %name, "Dropping probe result: {}", e),
        }
    }
}

/// Probe on an interval until `cancel` fires
pub async fn run(registry: Arc<ClusterRegistry>, config: HealthCheckerConfig, cancel: CancellationToken) {
    let period = Duration::from_secs(config.interval_secs.max(1));
    info!(
        "Health checker started (interval {}, failure threshold {})",
        format_duration(period),
        config.failure_threshold
    );
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Health checker stopped");
                return;
            }
            _ = ticker.tick() => check_clusters(&registry, &config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cluster::registry::tests::entry_for;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h1m");
        assert_eq!(format_duration(Duration::from_secs(90061)), "1d1h");
    }

    fn failed() -> HealthProbeResult {
        HealthProbeResult {
            success: false,
            version: None,
            latency_ms: 5,
            timestamp: Utc::now(),
            error: Some("connection refused".into()),
        }
    }

    fn ok(version: &str) -> HealthProbeResult {
        HealthProbeResult {
            success: true,
            version: Some(version.into()),
            latency_ms: 5,
            timestamp: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn test_thresholds() {
        let config = HealthCheckerConfig::default();
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        let mut entry = entry_for("c1", backend);

        assert_eq!(apply_probe(&mut entry, failed(), &config), None);
        assert_eq!(apply_probe(&mut entry, failed(), &config), None);
        assert_eq!(
            apply_probe(&mut entry, failed(), &config),
            Some(ClusterState::Unhealth)
        );
        assert_eq!(entry.cluster.status.conditions[0].status, "False");
        assert_eq!(apply_probe(&mut entry, failed(), &config), None);

        assert_eq!(
            apply_probe(&mut entry, ok("v1.29.0"), &config),
            Some(ClusterState::Running)
        );
        assert_eq!(entry.cluster.status.kubernetes_version, "v1.29.0");
        assert!(entry.cluster.status.conditions[0].is_true());
    }

    #[tokio::test]
    async fn test_check_clusters_marks_unreachable() {
        let registry = ClusterRegistry::new(None);
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        registry
            .insert(entry_for("c1", backend.clone()), "kubeconfig".into())
            .await
            .unwrap();

        let config = HealthCheckerConfig {
            failure_threshold: 1,
            timeout_secs: 1,
            ..Default::default()
        };
        backend.set_available(false);
        check_clusters(&registry, &config).await;
        let entry = registry.get("c1").await.unwrap();
        assert_eq!(entry.cluster.status.state, ClusterState::Unhealth);

        backend.set_available(true);
        backend.set_version("v1.30.1");
        check_clusters(&registry, &config).await;
        let entry = registry.get("c1").await.unwrap();
        assert_eq!(entry.cluster.status.state, ClusterState::Running);
        assert_eq!(entry.cluster.status.kubernetes_version, "v1.30.1");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = Arc::new(ClusterRegistry::new(None));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(registry, HealthCheckerConfig::default(), cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
