//! Cluster-scoped resource access shared by every resource kind
//!
//! Each kind module (`node`, `core`, `storage`, ...) adds its operations to
//! [`ResourceService`] in its own `impl` block. This file holds what they
//! share: cluster lookup, bounded remote calls, typed reads and the
//! replace-map patch used by the `PUT` endpoints.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::backend::{list_as, ClusterBackend, ResourceKind};
use crate::cluster::registry::ClusterEntry;
use crate::cluster::service::ClusterService;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::ClusterMetrics;
use crate::resources::selector::LabelSelector;
use crate::validation;

/// Marker for "no filter" in enum-valued query parameters
pub const SELECT_ALL: &str = "__ALL__";

/// Label on objects the gateway creates
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "kantaloupe");

/// Treat empty strings and `__ALL__` as an absent filter
pub fn filter_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && *v != SELECT_ALL)
}

/// Merge patch that turns `current` into exactly `desired`
pub fn replace_map_patch(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Value {
    let mut patch = Map::new();
    for key in current.keys() {
        if !desired.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in desired {
        patch.insert(key.clone(), Value::String(value.clone()));
    }
    Value::Object(patch)
}

pub struct ResourceService {
    clusters: Arc<ClusterService>,
}

impl ResourceService {
    pub fn new(clusters: Arc<ClusterService>) -> Self {
        Self { clusters }
    }

    pub fn clusters(&self) -> &Arc<ClusterService> {
        &self.clusters
    }

    /// Registry entry of a cluster named in a request path
    pub(crate) async fn entry(&self, cluster: &str) -> GatewayResult<Arc<ClusterEntry>> {
        validation::dns1035_label("cluster name", cluster)?;
        self.clusters.registry().get(cluster).await
    }

    pub(crate) async fn backend(&self, cluster: &str) -> GatewayResult<Arc<dyn ClusterBackend>> {
        Ok(self.entry(cluster).await?.backend.clone())
    }

    pub(crate) async fn metrics(&self, cluster: &str) -> GatewayResult<ClusterMetrics> {
        let entry = self.entry(cluster).await?;
        Ok(self.clusters.registry().metrics_for(&entry))
    }

    /// One remote call bounded by the per-call timeout
    pub(crate) async fn call<T, Fut>(&self, cluster: &str, fut: Fut) -> GatewayResult<T>
    where
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.clusters.fanout().call(cluster, fut).await
    }

    pub(crate) async fn list_typed<T: DeserializeOwned>(
        &self,
        cluster: &str,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> GatewayResult<Vec<T>> {
        let backend = self.backend(cluster).await?;
        self.call(cluster, list_as(backend.as_ref(), kind, namespace, selector))
            .await
    }

    pub(crate) async fn get_typed<T: DeserializeOwned>(
        &self,
        cluster: &str,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<T> {
        let backend = self.backend(cluster).await?;
        let value = self
            .call(cluster, backend.get(kind, namespace, name))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| GatewayError::Internal(format!("failed to decode {}: {}", kind, e)))
    }

    pub(crate) async fn delete_object(
        &self,
        cluster: &str,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()> {
        let backend = self.backend(cluster).await?;
        self.call(cluster, backend.delete(kind, namespace, name))
            .await
    }
}

/// Namespace path segment, which must be a DNS-1123 label
pub(crate) fn check_namespace(namespace: &str) -> GatewayResult<()> {
    validation::dns1123_subdomain("namespace", namespace)?;
    if namespace.contains('.') {
        return Err(GatewayError::invalid(format!(
            "namespace '{}' must not contain dots",
            namespace
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregate::FanOut;
    use crate::backend::{InMemoryBackend, StaticBackendFactory};
    use crate::cluster::registry::tests::entry_for;
    use crate::cluster::registry::ClusterRegistry;
    use crate::monitoring::fixed::StaticMetrics;
    use crate::monitoring::MetricsSource;
    use serde_json::json;

    /// A service over one registered in-memory cluster
    pub(crate) async fn service_with(
        name: &str,
        backend: Arc<InMemoryBackend>,
        metrics: Option<Arc<StaticMetrics>>,
    ) -> ResourceService {
        let registry = Arc::new(ClusterRegistry::new(None));
        let mut entry = entry_for(name, backend);
        entry.metrics = metrics.map(|m| m as Arc<dyn MetricsSource>);
        registry
            .insert(entry, "kubeconfig".into())
            .await
            .unwrap();
        let clusters = ClusterService::new(
            registry,
            Arc::new(StaticBackendFactory::new()),
            FanOut::default(),
        );
        ResourceService::new(Arc::new(clusters))
    }

    #[test]
    fn test_filter_value() {
        assert_eq!(filter_value(Some("__ALL__")), None);
        assert_eq!(filter_value(Some("  ")), None);
        assert_eq!(filter_value(Some("n1")), Some("n1"));
        assert_eq!(filter_value(None), None);
    }

    #[test]
    fn test_replace_map_patch() {
        let mut current = BTreeMap::new();
        current.insert("a".to_string(), "1".to_string());
        current.insert("b".to_string(), "2".to_string());
        let mut desired = BTreeMap::new();
        desired.insert("b".to_string(), "3".to_string());
        assert_eq!(
            replace_map_patch(&current, &desired),
            json!({"a": null, "b": "3"})
        );
    }

    #[test]
    fn test_check_namespace() {
        assert!(check_namespace("team-a").is_ok());
        assert!(check_namespace("team.a").is_err());
        assert!(check_namespace("Team").is_err());
    }
}
