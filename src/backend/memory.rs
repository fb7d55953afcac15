//! In-memory member clusters for tests, demos and `--offline` runs
//!
//! Objects are stored as Kubernetes JSON keyed by kind, namespace and name.
//! Resource versions come from a per-backend counter, so optimistic
//! concurrency behaves like a real API server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};

use super::{merge_patch, stamp_type, BackendFactory, ClusterBackend, ResourceKind};
use crate::cluster::kubeconfig;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::fixed::StaticMetrics;
use crate::monitoring::MetricsSource;
use crate::resources::selector::LabelSelector;

type ObjectKey = (ResourceKind, String, String);

pub struct InMemoryBackend {
    cluster: String,
    version: RwLock<String>,
    objects: DashMap<ObjectKey, Value>,
    revision: AtomicU64,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

fn key(kind: ResourceKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    let ns = if kind.namespaced() {
        namespace.unwrap_or("default")
    } else {
        ""
    };
    (kind, ns.to_string(), name.to_string())
}

fn meta_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default()
}

impl InMemoryBackend {
    /// An empty cluster holding only the `kube-system` namespace
    pub fn new(cluster: impl Into<String>, version: impl Into<String>) -> Self {
        let backend = Self {
            cluster: cluster.into(),
            version: RwLock::new(version.into()),
            objects: DashMap::new(),
            revision: AtomicU64::new(0),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        };
        backend.insert(
            ResourceKind::Namespace,
            json!({"metadata": {"name": "kube-system"}}),
        );
        backend
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Store an object directly, filling in server-owned metadata
    pub fn insert(&self, kind: ResourceKind, mut object: Value) -> Value {
        let name = meta_str(&object, "name").unwrap_or_default().to_string();
        let namespace = meta_str(&object, "namespace").map(str::to_string);
        self.stamp_metadata(kind, &mut object, namespace.as_deref());
        self.objects
            .insert(key(kind, namespace.as_deref(), &name), object.clone());
        object
    }

    pub fn with_object(self, kind: ResourceKind, object: Value) -> Self {
        self.insert(kind, object);
        self
    }

    /// Current copy of an object, bypassing availability toggles
    pub fn object(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects
            .get(&key(kind, namespace, name))
            .map(|o| o.value().clone())
    }

    pub fn kube_system_uid(&self) -> Option<String> {
        self.object(ResourceKind::Namespace, None, "kube-system")
            .and_then(|ns| meta_str(&ns, "uid").map(str::to_string))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay added to every call, for exercising timeouts
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_version(&self, version: impl Into<String>) {
        if let Ok(mut v) = self.version.write() {
            *v = version.into();
        }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp_metadata(&self, kind: ResourceKind, object: &mut Value, namespace: Option<&str>) {
        stamp_type(kind, object);
        let revision = self.next_revision();
        if !object.get("metadata").is_some_and(Value::is_object) {
            object["metadata"] = json!({});
        }
        let meta = &mut object["metadata"];
        if kind.namespaced() {
            meta["namespace"] = json!(namespace.unwrap_or("default"));
        }
        meta["resourceVersion"] = json!(revision);
        if meta.get("uid").and_then(Value::as_str).is_none() {
            meta["uid"] = json!(uuid::Uuid::new_v4().to_string());
        }
        if meta.get("creationTimestamp").and_then(Value::as_str).is_none() {
            meta["creationTimestamp"] =
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }

    async fn gate(&self) -> GatewayResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::unavailable(&self.cluster, "connection refused"))
        }
    }

    fn missing(&self, kind: ResourceKind, name: &str) -> GatewayError {
        GatewayError::NotFound(format!(
            "cluster '{}': {} '{}' not found",
            self.cluster,
            kind.as_str().to_lowercase(),
            name
        ))
    }
}

#[async_trait]
impl ClusterBackend for InMemoryBackend {
    async fn server_version(&self) -> GatewayResult<String> {
        self.gate().await?;
        self.version
            .read()
            .map(|v| v.clone())
            .map_err(|_| GatewayError::Internal("version lock poisoned".to_string()))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> GatewayResult<Vec<Value>> {
        self.gate().await?;
        let mut items: Vec<(ObjectKey, Value)> = self
            .objects
            .iter()
            .filter(|entry| {
                let (k, ns, _) = entry.key();
                *k == kind
                    && (!kind.namespaced() || namespace.map_or(true, |want| want == ns))
                    && selector.map_or(true, |s| s.matches(&labels_of(entry.value())))
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items.into_iter().map(|(_, v)| v).collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<Value> {
        self.gate().await?;
        self.object(kind, namespace, name)
            .ok_or_else(|| self.missing(kind, name))
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        mut object: Value,
    ) -> GatewayResult<Value> {
        self.gate().await?;
        let name = meta_str(&object, "name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| GatewayError::invalid("metadata.name is required"))?
            .to_string();
        let k = key(kind, namespace, &name);
        if self.objects.contains_key(&k) {
            return Err(GatewayError::AlreadyExists(format!(
                "cluster '{}': {} '{}' already exists",
                self.cluster,
                kind.as_str().to_lowercase(),
                name
            )));
        }
        if let Some(meta) = object.get_mut("metadata") {
            if let Some(map) = meta.as_object_mut() {
                map.remove("uid");
                map.remove("resourceVersion");
            }
        }
        self.stamp_metadata(kind, &mut object, namespace);
        self.objects.insert(k, object.clone());
        Ok(object)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        mut object: Value,
    ) -> GatewayResult<Value> {
        self.gate().await?;
        let k = key(kind, namespace, name);
        let mut entry = self
            .objects
            .get_mut(&k)
            .ok_or_else(|| self.missing(kind, name))?;

        let current = meta_str(entry.value(), "resourceVersion").unwrap_or_default();
        if let Some(requested) = meta_str(&object, "resourceVersion").filter(|v| !v.is_empty()) {
            if requested != current {
                return Err(GatewayError::Conflict(format!(
                    "cluster '{}': {} '{}' was modified (resourceVersion {} != {}); \
                     re-fetch the object and retry",
                    self.cluster,
                    kind.as_str().to_lowercase(),
                    name,
                    requested,
                    current
                )));
            }
        }
        let uid = meta_str(entry.value(), "uid").map(str::to_string);
        let created = meta_str(entry.value(), "creationTimestamp").map(str::to_string);
        if !object.get("metadata").is_some_and(Value::is_object) {
            object["metadata"] = json!({});
        }
        object["metadata"]["name"] = json!(name);
        object["metadata"]["uid"] = json!(uid);
        object["metadata"]["creationTimestamp"] = json!(created);
        self.stamp_metadata(kind, &mut object, namespace);
        *entry.value_mut() = object.clone();
        Ok(object)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> GatewayResult<Value> {
        self.gate().await?;
        let k = key(kind, namespace, name);
        let mut entry = self
            .objects
            .get_mut(&k)
            .ok_or_else(|| self.missing(kind, name))?;
        let mut object = entry.value().clone();
        merge_patch(&mut object, &patch);
        self.stamp_metadata(kind, &mut object, namespace);
        *entry.value_mut() = object.clone();
        Ok(object)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()> {
        self.gate().await?;
        self.objects
            .remove(&key(kind, namespace, name))
            .map(|_| ())
            .ok_or_else(|| self.missing(kind, name))
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Resolves kubeconfigs to preset in-memory clusters by API server URL
#[derive(Default)]
pub struct StaticBackendFactory {
    clusters: DashMap<String, Arc<InMemoryBackend>>,
    metrics: DashMap<String, Arc<StaticMetrics>>,
}

impl StaticBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `backend` reachable through kubeconfigs pointing at `server`
    pub fn add_cluster(&self, server: impl Into<String>, backend: Arc<InMemoryBackend>) {
        self.clusters.insert(server.into(), backend);
    }

    pub fn add_metrics(&self, address: impl Into<String>, metrics: Arc<StaticMetrics>) {
        self.metrics
            .insert(address.into().trim_end_matches('/').to_string(), metrics);
    }
}

#[async_trait]
impl BackendFactory for StaticBackendFactory {
    async fn connect(
        &self,
        cluster: &str,
        kubeconfig: &str,
    ) -> GatewayResult<Arc<dyn ClusterBackend>> {
        let summary = kubeconfig::inspect(kubeconfig).map_err(|e| match e {
            GatewayError::InvalidArgument(m) => GatewayError::InvalidCredential(m),
            other => other,
        })?;
        let backend = self
            .clusters
            .get(&summary.server)
            .map(|b| b.value().clone())
            .ok_or_else(|| {
                GatewayError::InvalidCredential(format!(
                    "cluster '{}': API server {} is unreachable",
                    cluster, summary.server
                ))
            })?;
        Ok(backend)
    }

    fn metrics(&self, address: &str) -> GatewayResult<Arc<dyn MetricsSource>> {
        let metrics = self
            .metrics
            .get(address.trim_end_matches('/'))
            .map(|m| m.value().clone())
            .ok_or_else(|| {
                GatewayError::Unavailable(format!("metrics endpoint {} is unreachable", address))
            })?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new("test", "v1.28.3").with_object(
            ResourceKind::Node,
            json!({"metadata": {"name": "node-a", "labels": {"gpu": "true"}}}),
        )
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let b = backend();
        let created = b
            .create(
                ResourceKind::Secret,
                Some("team-a"),
                json!({"metadata": {"name": "s1"}, "type": "Opaque"}),
            )
            .await
            .unwrap();
        assert_eq!(created["metadata"]["namespace"], "team-a");
        assert!(created["metadata"]["uid"].is_string());

        let again = b
            .create(ResourceKind::Secret, Some("team-a"), json!({"metadata": {"name": "s1"}}))
            .await
            .unwrap_err();
        assert_eq!(again.kind(), ErrorKind::AlreadyExists);

        b.delete(ResourceKind::Secret, Some("team-a"), "s1").await.unwrap();
        let gone = b.get(ResourceKind::Secret, Some("team-a"), "s1").await.unwrap_err();
        assert_eq!(gone.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_replace_detects_stale_version() {
        let b = backend();
        let node = b.get(ResourceKind::Node, None, "node-a").await.unwrap();

        let mut first = node.clone();
        first["metadata"]["labels"]["x"] = json!("1");
        b.replace(ResourceKind::Node, None, "node-a", first).await.unwrap();

        let err = b
            .replace(ResourceKind::Node, None, "node-a", node)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_list_with_selector_and_patch() {
        let b = backend().with_object(
            ResourceKind::Node,
            json!({"metadata": {"name": "node-b"}}),
        );
        let selector = LabelSelector::matching("gpu", "true");
        let nodes = b.list(ResourceKind::Node, None, Some(&selector)).await.unwrap();
        assert_eq!(nodes.len(), 1);

        b.patch(
            ResourceKind::Node,
            None,
            "node-b",
            json!({"metadata": {"labels": {"gpu": "true"}}}),
        )
        .await
        .unwrap();
        let nodes = b.list(ResourceKind::Node, None, Some(&selector)).await.unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let b = backend();
        b.set_available(false);
        let err = b.server_version().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(b.kube_system_uid().is_some());
    }

    #[tokio::test]
    async fn test_factory_resolves_by_server() {
        let factory = StaticBackendFactory::new();
        factory.add_cluster("https://prod-1:6443", Arc::new(backend()));

        let ok = kubeconfig::render("prod-1", "https://prod-1:6443", "t");
        let backend = factory.connect("prod-1", &ok).await.unwrap();
        assert_eq!(backend.server_version().await.unwrap(), "v1.28.3");

        let unknown = kubeconfig::render("x", "https://nowhere:6443", "t");
        let err = factory.connect("x", &unknown).await.err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::InvalidCredential));
        assert!(factory.probe_metrics("http://prom:9090").await.is_err());
    }
}
