//! Copy-on-write cluster registry
//!
//! Readers take an `Arc` to the current [`Snapshot`] and never block
//! writers for longer than a pointer swap. Writers are serialized by a
//! mutex: each builds a new map from the current one and swaps it in, so
//! a reader sees either the old entry or the new one, never a mix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::health::HealthCounters;
use super::types::Cluster;
use crate::backend::ClusterBackend;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::{ClusterMetrics, MetricsSource};

/// Everything the gateway holds for one integrated cluster
#[derive(Clone)]
pub struct ClusterEntry {
    /// Stored view; usage figures are filled in on read
    pub cluster: Cluster,
    /// Name of the credential holding the kubeconfig
    pub secret_ref: String,
    /// SHA-256 of the kubeconfig, to skip re-validating an unchanged one
    pub kubeconfig_digest: String,
    pub backend: Arc<dyn ClusterBackend>,
    /// Per-cluster metrics source, if one was configured
    pub metrics: Option<Arc<dyn MetricsSource>>,
    pub health: HealthCounters,
}

impl std::fmt::Debug for ClusterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEntry")
            .field("cluster", &self.cluster.metadata.name)
            .field("secret_ref", &self.secret_ref)
            .field("has_metrics", &self.metrics.is_some())
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl ClusterEntry {
    pub fn name(&self) -> &str {
        &self.cluster.metadata.name
    }

    pub fn resource_version(&self) -> &str {
        &self.cluster.metadata.resource_version
    }
}

pub fn secret_name(cluster: &str) -> String {
    format!("{}-secret", cluster)
}

/// Immutable view of the registry at one point in time
#[derive(Clone, Default)]
pub struct Snapshot {
    clusters: BTreeMap<String, Arc<ClusterEntry>>,
    credentials: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&Arc<ClusterEntry>> {
        self.clusters.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ClusterEntry>> {
        self.clusters.values()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn credential(&self, name: &str) -> Option<&str> {
        self.credentials.get(name).map(String::as_str)
    }
}

pub struct ClusterRegistry {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    generation: AtomicU64,
    global_metrics: Option<Arc<dyn MetricsSource>>,
}

impl ClusterRegistry {
    /// `global_metrics` answers for clusters without their own source
    pub fn new(global_metrics: Option<Arc<dyn MetricsSource>>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            global_metrics,
        }
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> GatewayResult<Arc<ClusterEntry>> {
        self.snapshot()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("cluster", name))
    }

    pub async fn list(&self) -> Vec<Arc<ClusterEntry>> {
        self.snapshot().await.entries().cloned().collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.snapshot().await.get(name).is_some()
    }

    /// Kubeconfig stored for a cluster
    pub async fn kubeconfig(&self, name: &str) -> GatewayResult<String> {
        let snapshot = self.snapshot().await;
        let entry = snapshot
            .get(name)
            .ok_or_else(|| GatewayError::not_found("cluster", name))?;
        snapshot
            .credential(&entry.secret_ref)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::not_found("credential", &entry.secret_ref))
    }

    /// Metrics bound to a cluster, falling back to the global source
    pub fn metrics_for(&self, entry: &ClusterEntry) -> ClusterMetrics {
        let source = entry.metrics.clone().or_else(|| self.global_metrics.clone());
        ClusterMetrics::new(entry.name(), source)
    }

    /// Platform-wide metrics
    pub fn global_metrics(&self) -> ClusterMetrics {
        ClusterMetrics::global(self.global_metrics.clone())
    }

    fn next_version(&self) -> String {
        (self.generation.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn swap(&self, next: Snapshot) {
        *self.current.write().await = Arc::new(next);
    }

    /// Register a cluster and its kubeconfig in one step
    ///
    /// Name and `kube-system` UID uniqueness are checked under the writer
    /// lock, so two concurrent integrations of the same cluster cannot
    /// both succeed.
    pub async fn insert(&self, mut entry: ClusterEntry, kubeconfig: String) -> GatewayResult<Arc<ClusterEntry>> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot().await;
        let name = entry.name().to_string();

        if current.get(&name).is_some() {
            return Err(GatewayError::AlreadyExists(format!(
                "cluster '{}' already exists",
                name
            )));
        }
        let uid = &entry.cluster.status.kube_system_id;
        if !uid.is_empty() {
            if let Some(other) = current
                .entries()
                .find(|e| &e.cluster.status.kube_system_id == uid)
            {
                return Err(GatewayError::AlreadyExists(format!(
                    "cluster is already integrated as '{}'",
                    other.name()
                )));
            }
        }

        entry.cluster.metadata.resource_version = self.next_version();
        let entry = Arc::new(entry);
        let mut next = (*current).clone();
        next.credentials.insert(entry.secret_ref.clone(), kubeconfig);
        next.clusters.insert(name.clone(), entry.clone());
        self.swap(next).await;
        debug!(cluster = %name, "Registry entry added");
        Ok(entry)
    }

    /// Change a cluster under optimistic concurrency
    ///
    /// `expected` is the resource version the caller read; a mismatch is
    /// `Conflict`. `kubeconfig` replaces the stored credential when set.
    pub async fn update<F>(
        &self,
        name: &str,
        expected: Option<&str>,
        kubeconfig: Option<String>,
        f: F,
    ) -> GatewayResult<Arc<ClusterEntry>>
    where
        F: FnOnce(&mut ClusterEntry) -> GatewayResult<()>,
    {
        let _guard = self.writer.lock().await;
        let current = self.snapshot().await;
        let existing = current
            .get(name)
            .ok_or_else(|| GatewayError::not_found("cluster", name))?;
        if let Some(expected) = expected.filter(|v| !v.is_empty()) {
            if expected != existing.resource_version() {
                return Err(GatewayError::Conflict(format!(
                    "cluster '{}' was modified (resourceVersion {} != {}); re-fetch it and retry",
                    name,
                    expected,
                    existing.resource_version()
                )));
            }
        }

        let mut entry = (**existing).clone();
        f(&mut entry)?;
        entry.cluster.metadata.resource_version = self.next_version();

        let entry = Arc::new(entry);
        let mut next = (*current).clone();
        if let Some(kubeconfig) = kubeconfig {
            next.credentials.insert(entry.secret_ref.clone(), kubeconfig);
        }
        next.clusters.insert(name.to_string(), entry.clone());
        self.swap(next).await;
        Ok(entry)
    }

    /// Record observed status without bumping the resource version
    pub async fn update_status<F, T>(&self, name: &str, f: F) -> GatewayResult<T>
    where
        F: FnOnce(&mut ClusterEntry) -> GatewayResult<T>,
    {
        let _guard = self.writer.lock().await;
        let current = self.snapshot().await;
        let existing = current
            .get(name)
            .ok_or_else(|| GatewayError::not_found("cluster", name))?;
        let mut entry = (**existing).clone();
        let out = f(&mut entry)?;
        let mut next = (*current).clone();
        next.clusters.insert(name.to_string(), Arc::new(entry));
        self.swap(next).await;
        Ok(out)
    }

    /// Drop a cluster and its stored kubeconfig
    pub async fn remove(&self, name: &str) -> GatewayResult<Arc<ClusterEntry>> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot().await;
        let entry = current
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("cluster", name))?;
        let mut next = (*current).clone();
        next.clusters.remove(name);
        next.credentials.remove(&entry.secret_ref);
        self.swap(next).await;
        debug!(cluster = %name, "Registry entry removed");
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cluster::types::{ClusterSpec, ClusterStatus};
    use crate::resources::meta::ObjectMeta;

    pub(crate) fn entry_for(name: &str, backend: Arc<InMemoryBackend>) -> ClusterEntry {
        ClusterEntry {
            cluster: Cluster {
                metadata: ObjectMeta::named(name),
                spec: ClusterSpec::default(),
                status: ClusterStatus {
                    kube_system_id: backend.kube_system_uid().unwrap_or_default(),
                    ..Default::default()
                },
            },
            secret_ref: secret_name(name),
            kubeconfig_digest: String::new(),
            backend,
            metrics: None,
            health: HealthCounters::default(),
        }
    }

    fn backend(name: &str) -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::new(name, "v1.28.3"))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = ClusterRegistry::new(None);
        registry
            .insert(entry_for("c1", backend("c1")), "cfg-1".into())
            .await
            .unwrap();

        let entry = registry.get("c1").await.unwrap();
        assert_eq!(entry.resource_version(), "1");
        assert_eq!(registry.kubeconfig("c1").await.unwrap(), "cfg-1");
        assert_eq!(
            registry.snapshot().await.credential("c1-secret"),
            Some("cfg-1")
        );

        registry.remove("c1").await.unwrap();
        assert!(matches!(
            registry.get("c1").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            registry.remove("c1").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(registry.snapshot().await.credential("c1-secret").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_and_uid() {
        let registry = ClusterRegistry::new(None);
        let shared = backend("c1");
        registry
            .insert(entry_for("c1", shared.clone()), "cfg".into())
            .await
            .unwrap();

        let err = registry
            .insert(entry_for("c1", backend("other")), "cfg".into())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));

        // Same kube-system namespace under a new name.
        let err = registry
            .insert(entry_for("c2", shared), "cfg".into())
            .await
            .unwrap_err();
        assert!(err.message().contains("'c1'"));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_conflict_on_stale_version() {
        let registry = ClusterRegistry::new(None);
        registry
            .insert(entry_for("c1", backend("c1")), "cfg".into())
            .await
            .unwrap();

        let updated = registry
            .update("c1", Some("1"), None, |e| {
                e.cluster.spec.alias_name = "prod".into();
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(updated.resource_version(), "2");

        let err = registry
            .update("c1", Some("1"), None, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert!(err.message().contains("re-fetch"));
    }

    #[tokio::test]
    async fn test_readers_keep_old_snapshot() {
        let registry = ClusterRegistry::new(None);
        registry
            .insert(entry_for("c1", backend("c1")), "cfg".into())
            .await
            .unwrap();
        let before = registry.snapshot().await;
        registry
            .update("c1", None, Some("cfg-2".into()), |e| {
                e.cluster.spec.description = "changed".into();
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(before.get("c1").unwrap().cluster.spec.description, "");
        assert_eq!(before.credential("c1-secret"), Some("cfg"));
        assert_eq!(registry.kubeconfig("c1").await.unwrap(), "cfg-2");
    }

    #[tokio::test]
    async fn test_failed_update_changes_nothing() {
        let registry = ClusterRegistry::new(None);
        registry
            .insert(entry_for("c1", backend("c1")), "cfg".into())
            .await
            .unwrap();
        let err = registry
            .update("c1", None, None, |e| {
                e.cluster.spec.alias_name = "half".into();
                Err(GatewayError::invalid("nope"))
            })
            .await;
        assert!(err.is_err());
        let entry = registry.get("c1").await.unwrap();
        assert_eq!(entry.cluster.spec.alias_name, "");
        assert_eq!(entry.resource_version(), "1");
    }
}
