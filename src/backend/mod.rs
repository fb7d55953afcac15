//! Member cluster access
//!
//! The gateway never holds typed Kubernetes clients directly. Every member
//! cluster sits behind [`ClusterBackend`], an object-safe trait over
//! Kubernetes-native JSON. Two implementations exist:
//!
//! - [`kube::KubeBackend`] talks to a real API server through `kube`
//! - [`memory::InMemoryBackend`] keeps objects in memory for tests and demos
//!
//! Typed views are layered on top with [`list_as`] and [`get_as`], which
//! deserialize into `k8s-openapi` structs.

pub mod kube;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::MetricsSource;
use crate::resources::selector::LabelSelector;

pub use self::kube::{KubeBackend, KubeBackendFactory};
pub use self::memory::{InMemoryBackend, StaticBackendFactory};

pub const KANTALOUPE_GROUP: &str = "kantaloupe.dynamia.ai";
pub const KANTALOUPE_VERSION: &str = "v1alpha1";

/// Resource kinds the gateway reads or writes on member clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Node,
    Pod,
    Namespace,
    Secret,
    ConfigMap,
    Event,
    PersistentVolume,
    PersistentVolumeClaim,
    StorageClass,
    ResourceQuota,
    KantaloupeFlow,
}

/// Group/version/kind/plural of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl KindInfo {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl ResourceKind {
    pub fn info(self) -> KindInfo {
        let core = |kind, plural| KindInfo {
            group: "",
            version: "v1",
            kind,
            plural,
        };
        match self {
            ResourceKind::Node => core("Node", "nodes"),
            ResourceKind::Pod => core("Pod", "pods"),
            ResourceKind::Namespace => core("Namespace", "namespaces"),
            ResourceKind::Secret => core("Secret", "secrets"),
            ResourceKind::ConfigMap => core("ConfigMap", "configmaps"),
            ResourceKind::Event => core("Event", "events"),
            ResourceKind::PersistentVolume => core("PersistentVolume", "persistentvolumes"),
            ResourceKind::PersistentVolumeClaim => {
                core("PersistentVolumeClaim", "persistentvolumeclaims")
            }
            ResourceKind::ResourceQuota => core("ResourceQuota", "resourcequotas"),
            ResourceKind::StorageClass => KindInfo {
                group: "storage.k8s.io",
                version: "v1",
                kind: "StorageClass",
                plural: "storageclasses",
            },
            ResourceKind::KantaloupeFlow => KindInfo {
                group: KANTALOUPE_GROUP,
                version: KANTALOUPE_VERSION,
                kind: "KantaloupeFlow",
                plural: "kantaloupeflows",
            },
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            ResourceKind::Node
                | ResourceKind::Namespace
                | ResourceKind::PersistentVolume
                | ResourceKind::StorageClass
        )
    }

    pub fn as_str(self) -> &'static str {
        self.info().kind
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access to one member cluster's API server
///
/// Every call is bounded by the backend's per-call timeout. Transport
/// failures come back as `Unavailable`, elapsed deadlines as `Timeout`.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Kubernetes git version, e.g. `v1.28.3`
    async fn server_version(&self) -> GatewayResult<String>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> GatewayResult<Vec<Value>>;

    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str)
        -> GatewayResult<Value>;

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        object: Value,
    ) -> GatewayResult<Value>;

    /// Full replace; a stale `metadata.resourceVersion` fails with `Conflict`
    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        object: Value,
    ) -> GatewayResult<Value>;

    /// JSON merge patch (RFC 7386)
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> GatewayResult<Value>;

    async fn delete(&self, kind: ResourceKind, namespace: Option<&str>, name: &str)
        -> GatewayResult<()>;
}

/// Builds backends from kubeconfigs and metric sources from addresses
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Connect to a cluster; a malformed kubeconfig is `InvalidCredential`
    async fn connect(&self, cluster: &str, kubeconfig: &str)
        -> GatewayResult<Arc<dyn ClusterBackend>>;

    /// Metrics source for a Prometheus-compatible address
    fn metrics(&self, address: &str) -> GatewayResult<Arc<dyn MetricsSource>>;

    /// Whether the address answers its readiness probe
    async fn probe_metrics(&self, address: &str) -> GatewayResult<()> {
        self.metrics(address)?.ready().await
    }
}

fn decode<T: DeserializeOwned>(kind: ResourceKind, value: Value) -> GatewayResult<T> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::Internal(format!("failed to decode {}: {}", kind, e)))
}

/// List and deserialize into a typed view
pub async fn list_as<T: DeserializeOwned>(
    backend: &dyn ClusterBackend,
    kind: ResourceKind,
    namespace: Option<&str>,
    selector: Option<&LabelSelector>,
) -> GatewayResult<Vec<T>> {
    backend
        .list(kind, namespace, selector)
        .await?
        .into_iter()
        .map(|v| decode(kind, v))
        .collect()
}

/// Get and deserialize into a typed view
pub async fn get_as<T: DeserializeOwned>(
    backend: &dyn ClusterBackend,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> GatewayResult<T> {
    decode(kind, backend.get(kind, namespace, name).await?)
}

/// Serialize a typed object and stamp its apiVersion/kind
pub fn encode<T: serde::Serialize>(kind: ResourceKind, object: &T) -> GatewayResult<Value> {
    let mut value = serde_json::to_value(object)?;
    stamp_type(kind, &mut value);
    Ok(value)
}

pub(crate) fn stamp_type(kind: ResourceKind, value: &mut Value) {
    if let Value::Object(map) = value {
        let info = kind.info();
        map.insert("apiVersion".into(), Value::String(info.api_version()));
        map.insert("kind".into(), Value::String(info.kind.to_string()));
    }
}

/// Apply a JSON merge patch in place
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_info() {
        assert_eq!(ResourceKind::Node.info().api_version(), "v1");
        assert_eq!(
            ResourceKind::KantaloupeFlow.info().api_version(),
            "kantaloupe.dynamia.ai/v1alpha1"
        );
        assert!(!ResourceKind::StorageClass.namespaced());
        assert!(ResourceKind::Secret.namespaced());
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"labels": {"x": "1"}});
        merge_patch(&mut target, &json!({"labels": {"y": "2"}, "new": [1, 2]}));
        assert_eq!(target, json!({"labels": {"x": "1", "y": "2"}, "new": [1, 2]}));
    }
}
