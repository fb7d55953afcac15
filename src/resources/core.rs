//! Namespaces, events, secrets and config maps

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    ConfigMap as KubeConfigMap, Event as KubeEvent, Namespace as KubeNamespace,
    ResourceQuota as KubeResourceQuota, Secret as KubeSecret,
};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::list::{ListQuery, Listable, Page, SortKey};
use super::meta::ObjectMeta;
use super::service::{check_namespace, ResourceService, MANAGED_BY_LABEL};
use crate::backend::{encode, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::validation;

/// A user-supplied object name; names double as label values
pub(crate) fn check_object_name(what: &str, name: &str) -> GatewayResult<()> {
    if name.is_empty() {
        return Err(GatewayError::invalid(format!("{} name must not be empty", what)));
    }
    validation::label_value(what, name)
}

fn mismatch(field: &str, body: &str) -> GatewayError {
    GatewayError::invalid(format!(
        "The {}({}) in the request body is inconsistent with that in the URL.",
        field, body
    ))
}

// ============================================================================
// Namespaces
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    /// Gateway-managed quotas in this namespace
    pub resource_quotas: Vec<String>,
    #[serde(skip)]
    labels: BTreeMap<String, String>,
    #[serde(skip)]
    created: Option<DateTime<Utc>>,
}

impl Listable for Namespace {
    const FIELDS: &'static [&'static str] = &["name", "creationTimestamp"];

    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "name" => SortKey::from(self.name.as_str()),
            "creationTimestamp" => SortKey::from(self.created),
            _ => SortKey::Null,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceFilters {
    /// Fill in `resourceQuotas`
    #[serde(default)]
    pub resource_quota: bool,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub component: String,
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub metadata: ObjectMeta,
    pub involved_object: ObjectReference,
    pub reason: String,
    pub message: String,
    pub source: EventSource,
    /// Unix seconds
    pub last_timestamp: i64,
    pub first_timestamp: i64,
    #[serde(rename = "type")]
    pub type_: String,
}

impl Event {
    pub fn from_kube(event: &KubeEvent, cluster: &str) -> Self {
        let last = event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0));
        let source = event.source.clone().unwrap_or_default();
        Self {
            metadata: ObjectMeta::from_kube(&event.metadata, cluster),
            involved_object: ObjectReference {
                kind: event.involved_object.kind.clone().unwrap_or_default(),
                name: event.involved_object.name.clone().unwrap_or_default(),
                namespace: event.involved_object.namespace.clone().unwrap_or_default(),
            },
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            source: EventSource {
                component: source.component.unwrap_or_default(),
                host: source.host.unwrap_or_default(),
            },
            last_timestamp: last.map_or(0, |t| t.timestamp()),
            first_timestamp: event.first_timestamp.as_ref().map_or(0, |t| t.0.timestamp()),
            type_: event.type_.clone().unwrap_or_default(),
        }
    }
}

impl Listable for Event {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "namespace",
        "uid",
        "creationTimestamp",
        "reason",
        "type",
        "lastTimestamp",
        "firstTimestamp",
    ];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "reason" => SortKey::from(self.reason.as_str()),
            "type" => SortKey::from(self.type_.as_str()),
            "lastTimestamp" => SortKey::from(self.last_timestamp),
            "firstTimestamp" => SortKey::from(self.first_timestamp),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

/// Narrow events to one involved object
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilters {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub kind_name: Option<String>,
}

// ============================================================================
// Secrets
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default)]
    pub type_: String,
}

impl Secret {
    pub fn from_kube(secret: &KubeSecret, cluster: &str) -> Self {
        Self {
            metadata: ObjectMeta::from_kube(&secret.metadata, cluster),
            type_: secret.type_.clone().unwrap_or_default(),
        }
    }
}

impl Listable for Secret {
    const FIELDS: &'static [&'static str] = &["name", "namespace", "uid", "creationTimestamp", "type"];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "type" => SortKey::from(self.type_.as_str()),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

/// Body of secret create and update; `data` values are base64
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRequest {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl SecretRequest {
    fn decoded(&self) -> GatewayResult<BTreeMap<String, ByteString>> {
        self.data
            .iter()
            .map(|(k, v)| {
                BASE64
                    .decode(v.trim())
                    .map(|bytes| (k.clone(), ByteString(bytes)))
                    .map_err(|e| GatewayError::invalid(format!("data '{}' is not base64: {}", k, e)))
            })
            .collect()
    }
}

// ============================================================================
// Config maps
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Base64 encoded
    #[serde(default)]
    pub binary_data: BTreeMap<String, String>,
    #[serde(default)]
    pub immutable: bool,
}

impl ConfigMap {
    pub fn from_kube(cm: &KubeConfigMap, cluster: &str) -> Self {
        Self {
            metadata: ObjectMeta::from_kube(&cm.metadata, cluster),
            data: cm.data.clone().unwrap_or_default(),
            binary_data: cm
                .binary_data
                .as_ref()
                .map(|b| b.iter().map(|(k, v)| (k.clone(), BASE64.encode(&v.0))).collect())
                .unwrap_or_default(),
            immutable: cm.immutable.unwrap_or(false),
        }
    }

    fn to_kube(&self) -> GatewayResult<KubeConfigMap> {
        let binary_data = self
            .binary_data
            .iter()
            .map(|(k, v)| {
                BASE64
                    .decode(v.trim())
                    .map(|b| (k.clone(), ByteString(b)))
                    .map_err(|e| GatewayError::invalid(format!("binaryData '{}' is not base64: {}", k, e)))
            })
            .collect::<GatewayResult<BTreeMap<_, _>>>()?;
        Ok(KubeConfigMap {
            metadata: self.metadata.to_kube(),
            data: (!self.data.is_empty()).then(|| self.data.clone()),
            binary_data: (!binary_data.is_empty()).then_some(binary_data),
            immutable: self.immutable.then_some(true),
        })
    }
}

impl Listable for ConfigMap {
    const FIELDS: &'static [&'static str] = &["name", "namespace", "uid", "creationTimestamp"];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        self.metadata.field(field).unwrap_or(SortKey::Null)
    }
}

// ============================================================================
// Operations
// ============================================================================

impl ResourceService {
    pub async fn list_namespaces(
        &self,
        cluster: &str,
        query: &ListQuery,
        filters: &NamespaceFilters,
    ) -> GatewayResult<Page<Namespace>> {
        let options = query.to_options()?;
        let namespaces: Vec<KubeNamespace> = self
            .list_typed(cluster, ResourceKind::Namespace, None, None)
            .await?;

        let mut quotas: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if filters.resource_quota {
            let all: Vec<KubeResourceQuota> = self
                .list_typed(cluster, ResourceKind::ResourceQuota, None, None)
                .await?;
            for rq in all {
                let managed = rq
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|l| l.contains_key(MANAGED_BY_LABEL.0));
                if let (true, Some(ns), Some(name)) = (managed, rq.metadata.namespace, rq.metadata.name) {
                    quotas.entry(ns).or_default().push(name);
                }
            }
        }

        let items = namespaces
            .into_iter()
            .map(|ns| {
                let name = ns.metadata.name.unwrap_or_default();
                Namespace {
                    resource_quotas: quotas.remove(&name).unwrap_or_default(),
                    name,
                    labels: ns.metadata.labels.unwrap_or_default(),
                    created: ns.metadata.creation_timestamp.map(|t| t.0),
                }
            })
            .collect();
        options.apply(items)
    }

    /// Events of a namespace, or of the whole cluster when `namespace` is `None`
    pub async fn list_events(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
        filters: &EventFilters,
    ) -> GatewayResult<Page<Event>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?.with_default_sort("lastTimestamp", false);
        let events: Vec<KubeEvent> = self
            .list_typed(cluster, ResourceKind::Event, namespace, None)
            .await?;
        let kind = filters.kind.as_deref().filter(|k| !k.is_empty());
        let kind_name = filters.kind_name.as_deref().filter(|k| !k.is_empty());
        let items = events
            .iter()
            .map(|e| Event::from_kube(e, cluster))
            .filter(|e| kind.map_or(true, |k| e.involved_object.kind.eq_ignore_ascii_case(k)))
            .filter(|e| kind_name.map_or(true, |n| e.involved_object.name == n))
            .collect();
        options.apply(items)
    }

    pub async fn list_secrets(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> GatewayResult<Page<Secret>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?;
        let secrets: Vec<KubeSecret> = self
            .list_typed(cluster, ResourceKind::Secret, namespace, None)
            .await?;
        options.apply(secrets.iter().map(|s| Secret::from_kube(s, cluster)).collect())
    }

    pub async fn get_secret(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<Secret> {
        check_namespace(namespace)?;
        let secret: KubeSecret = self
            .get_typed(cluster, ResourceKind::Secret, Some(namespace), name)
            .await?;
        Ok(Secret::from_kube(&secret, cluster))
    }

    pub async fn create_secret(
        &self,
        cluster: &str,
        namespace: &str,
        req: &SecretRequest,
    ) -> GatewayResult<Secret> {
        check_namespace(namespace)?;
        check_object_name("secret", &req.metadata.name)?;
        validation::labels(&req.metadata.labels)?;
        validation::annotations(&req.metadata.annotations)?;
        let mut meta = req.metadata.clone();
        meta.namespace = Some(namespace.to_string());
        meta.resource_version.clear();
        let secret = KubeSecret {
            metadata: meta.to_kube(),
            data: Some(req.decoded()?),
            type_: Some(req.type_.clone()).filter(|t| !t.is_empty()),
            ..Default::default()
        };

        let backend = self.backend(cluster).await?;
        let created = self
            .call(
                cluster,
                backend.create(ResourceKind::Secret, Some(namespace), encode(ResourceKind::Secret, &secret)?),
            )
            .await?;
        let created: KubeSecret = serde_json::from_value(created)?;
        info!(cluster = %cluster, namespace = %namespace, secret = %req.metadata.name, "Created secret");
        Ok(Secret::from_kube(&created, cluster))
    }

    /// Replace a secret's data and type, keeping its metadata
    pub async fn update_secret(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        req: &SecretRequest,
    ) -> GatewayResult<Secret> {
        check_namespace(namespace)?;
        if !req.metadata.name.is_empty() && req.metadata.name != name {
            return Err(mismatch("name", &req.metadata.name));
        }
        let mut current: KubeSecret = self
            .get_typed(cluster, ResourceKind::Secret, Some(namespace), name)
            .await?;
        if !req.metadata.resource_version.is_empty() {
            current.metadata.resource_version = Some(req.metadata.resource_version.clone());
        }
        current.data = Some(req.decoded()?);
        current.string_data = None;
        if !req.type_.is_empty() {
            current.type_ = Some(req.type_.clone());
        }

        let backend = self.backend(cluster).await?;
        let updated = self
            .call(
                cluster,
                backend.replace(
                    ResourceKind::Secret,
                    Some(namespace),
                    name,
                    encode(ResourceKind::Secret, &current)?,
                ),
            )
            .await?;
        let updated: KubeSecret = serde_json::from_value(updated)?;
        info!(cluster = %cluster, namespace = %namespace, secret = %name, "Updated secret");
        Ok(Secret::from_kube(&updated, cluster))
    }

    pub async fn delete_secret(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<()> {
        check_namespace(namespace)?;
        self.delete_object(cluster, ResourceKind::Secret, Some(namespace), name)
            .await?;
        info!(cluster = %cluster, namespace = %namespace, secret = %name, "Deleted secret");
        Ok(())
    }

    pub async fn list_config_maps(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> GatewayResult<Page<ConfigMap>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?;
        let cms: Vec<KubeConfigMap> = self
            .list_typed(cluster, ResourceKind::ConfigMap, namespace, None)
            .await?;
        options.apply(cms.iter().map(|c| ConfigMap::from_kube(c, cluster)).collect())
    }

    pub async fn get_config_map(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<ConfigMap> {
        check_namespace(namespace)?;
        let cm: KubeConfigMap = self
            .get_typed(cluster, ResourceKind::ConfigMap, Some(namespace), name)
            .await?;
        Ok(ConfigMap::from_kube(&cm, cluster))
    }

    /// Full replace; the body must name the same object as the URL
    pub async fn update_config_map(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        body: &ConfigMap,
    ) -> GatewayResult<ConfigMap> {
        check_namespace(namespace)?;
        if body.metadata.namespace.as_deref() != Some(namespace) {
            return Err(mismatch("namespace", body.metadata.namespace.as_deref().unwrap_or_default()));
        }
        if body.metadata.name != name {
            return Err(mismatch("name", &body.metadata.name));
        }
        validation::labels(&body.metadata.labels)?;
        validation::annotations(&body.metadata.annotations)?;

        let mut desired = body.to_kube()?;
        if desired.metadata.resource_version.is_none() {
            let current: KubeConfigMap = self
                .get_typed(cluster, ResourceKind::ConfigMap, Some(namespace), name)
                .await?;
            desired.metadata.resource_version = current.metadata.resource_version;
        }

        let backend = self.backend(cluster).await?;
        let updated = self
            .call(
                cluster,
                backend.replace(
                    ResourceKind::ConfigMap,
                    Some(namespace),
                    name,
                    encode(ResourceKind::ConfigMap, &desired)?,
                ),
            )
            .await?;
        let updated: KubeConfigMap = serde_json::from_value(updated)?;
        info!(cluster = %cluster, namespace = %namespace, configmap = %name, "Updated config map");
        Ok(ConfigMap::from_kube(&updated, cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::resources::service::tests::service_with;
    use serde_json::json;
    use std::sync::Arc;

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::Namespace, json!({"metadata": {"name": "team-a"}}))
                .with_object(
                    ResourceKind::ResourceQuota,
                    json!({"metadata": {"name": "gpu-quota", "namespace": "team-a",
                                        "labels": {"app.kubernetes.io/managed-by": "kantaloupe"}}}),
                )
                .with_object(
                    ResourceKind::ResourceQuota,
                    json!({"metadata": {"name": "foreign", "namespace": "team-a"}}),
                )
                .with_object(
                    ResourceKind::Event,
                    json!({
                        "metadata": {"name": "e1", "namespace": "team-a"},
                        "involvedObject": {"kind": "Pod", "name": "web-0", "namespace": "team-a"},
                        "reason": "Scheduled", "type": "Normal",
                        "lastTimestamp": "2024-05-01T10:00:00Z"
                    }),
                )
                .with_object(
                    ResourceKind::Event,
                    json!({
                        "metadata": {"name": "e2", "namespace": "team-a"},
                        "involvedObject": {"kind": "Node", "name": "n1"},
                        "reason": "NodeReady", "type": "Normal",
                        "eventTime": "2024-05-01T11:00:00.000000Z"
                    }),
                )
                .with_object(
                    ResourceKind::ConfigMap,
                    json!({"metadata": {"name": "settings", "namespace": "team-a"}, "data": {"a": "1"}}),
                ),
        )
    }

    #[tokio::test]
    async fn test_namespaces_with_quotas() {
        let service = service_with("c1", backend(), None).await;
        let filters = NamespaceFilters { resource_quota: true };
        let page = service
            .list_namespaces("c1", &ListQuery::default(), &filters)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);
        let team = page.items.iter().find(|n| n.name == "team-a").unwrap();
        assert_eq!(team.resource_quotas, vec!["gpu-quota"]);
    }

    #[tokio::test]
    async fn test_events_newest_first_and_filtered() {
        let service = service_with("c1", backend(), None).await;
        let page = service
            .list_events("c1", None, &ListQuery::default(), &EventFilters::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].metadata.name, "e2");
        assert!(page.items[0].last_timestamp > page.items[1].last_timestamp);

        let filters = EventFilters {
            kind: Some("Pod".into()),
            kind_name: Some("web-0".into()),
        };
        let page = service
            .list_events("c1", Some("team-a"), &ListQuery::default(), &filters)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].reason, "Scheduled");
    }

    #[tokio::test]
    async fn test_secret_lifecycle() {
        let backend = backend();
        let service = service_with("c1", backend.clone(), None).await;
        let mut req = SecretRequest {
            metadata: ObjectMeta::named("db"),
            type_: "Opaque".into(),
            data: BTreeMap::new(),
        };
        req.data.insert("password".into(), BASE64.encode("hunter2"));
        let created = service.create_secret("c1", "team-a", &req).await.unwrap();
        assert_eq!(created.type_, "Opaque");

        let stored = backend
            .object(ResourceKind::Secret, Some("team-a"), "db")
            .unwrap();
        assert_eq!(stored["data"]["password"], BASE64.encode("hunter2"));

        req.data.insert("password".into(), "%%%".into());
        let err = service.update_secret("c1", "team-a", "db", &req).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));

        req.data.insert("password".into(), BASE64.encode("s3cret"));
        service.update_secret("c1", "team-a", "db", &req).await.unwrap();
        let page = service
            .list_secrets("c1", Some("team-a"), &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        service.delete_secret("c1", "team-a", "db").await.unwrap();
        let err = service.delete_secret("c1", "team-a", "db").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        let err = service
            .create_secret("c1", "Team_A", &req)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_config_map_update_checks_url() {
        let service = service_with("c1", backend(), None).await;
        let mut cm = service.get_config_map("c1", "team-a", "settings").await.unwrap();
        assert_eq!(cm.data["a"], "1");

        cm.data.insert("b".into(), "2".into());
        cm.resource_version_reset();
        let updated = service
            .update_config_map("c1", "team-a", "settings", &cm)
            .await
            .unwrap();
        assert_eq!(updated.data.len(), 2);

        let err = service
            .update_config_map("c1", "team-a", "other", &cm)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));

        // The version read before the first update is stale now.
        let err = service
            .update_config_map("c1", "team-a", "settings", &ConfigMap {
                metadata: ObjectMeta {
                    resource_version: "1".into(),
                    ..cm.metadata.clone()
                },
                ..cm.clone()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    impl ConfigMap {
        fn resource_version_reset(&mut self) {
            self.metadata.resource_version.clear();
        }
    }
}
