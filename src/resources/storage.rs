//! Persistent volumes, claims and storage classes

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolume as KubePersistentVolume, PersistentVolumeClaim as KubePersistentVolumeClaim,
};
use k8s_openapi::api::storage::v1::StorageClass as KubeStorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::core::check_object_name;
use super::list::{ListQuery, Listable, Page, SortKey};
use super::meta::{format_time, Condition, ObjectMeta};
use super::quantity::parse_quantity;
use super::service::{check_namespace, ResourceService};
use crate::backend::{encode, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::validation;

/// Label carrying the storage type a claim was created for
pub const PVC_TYPE_LABEL: &str = "kantaloupe.dynamia.ai/pvc-type";

pub const DEFAULT_STORAGE_CLASS: &str = "cluster-default";

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Expand `RWO`-style shorthands into Kubernetes access modes
pub fn access_mode(raw: &str) -> GatewayResult<&'static str> {
    match raw.trim() {
        "RWO" | "ReadWriteOnce" => Ok("ReadWriteOnce"),
        "ROX" | "ReadOnlyMany" => Ok("ReadOnlyMany"),
        "RWX" | "ReadWriteMany" => Ok("ReadWriteMany"),
        "RWOP" | "ReadWriteOncePod" => Ok("ReadWriteOncePod"),
        other => Err(GatewayError::invalid(format!("unknown access mode '{}'", other))),
    }
}

fn access_modes(raw: &[String]) -> GatewayResult<Vec<&'static str>> {
    if raw.is_empty() {
        return Err(GatewayError::invalid("at least one access mode is required"));
    }
    raw.iter().map(|m| access_mode(m)).collect()
}

fn capacity(raw: &str) -> GatewayResult<()> {
    if parse_quantity(raw)? <= 0.0 {
        return Err(GatewayError::invalid(format!("capacity '{}' must be positive", raw)));
    }
    Ok(())
}

fn one_of(what: &str, raw: &str, allowed: &[&str]) -> GatewayResult<()> {
    if allowed.contains(&raw) {
        Ok(())
    } else {
        Err(GatewayError::invalid(format!(
            "{} must be one of {}, got '{}'",
            what,
            allowed.join("|"),
            raw
        )))
    }
}

fn quantity_map(map: Option<&BTreeMap<String, Quantity>>) -> Option<String> {
    map.and_then(|m| m.get("storage")).map(|q| q.0.clone())
}

// ============================================================================
// Persistent volumes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPathSource {
    pub path: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsSource {
    pub server: String,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSource {
    pub path: String,
    /// Node the local disk lives on
    #[serde(default)]
    pub node: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeSpec {
    #[serde(default)]
    pub capacity: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub reclaim_policy: String,
    #[serde(default)]
    pub volume_mode: String,
    #[serde(default)]
    pub storage_class_name: String,
    #[serde(default)]
    pub mount_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ClaimRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeStatus {
    pub phase: String,
    pub message: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolume {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PersistentVolumeSpec,
    #[serde(default)]
    pub status: PersistentVolumeStatus,
}

impl PersistentVolume {
    pub fn from_kube(pv: &KubePersistentVolume, cluster: &str) -> Self {
        let spec = pv.spec.clone().unwrap_or_default();
        let status = pv.status.clone().unwrap_or_default();
        let local_node = spec
            .node_affinity
            .as_ref()
            .and_then(|a| a.required.as_ref())
            .and_then(|r| r.node_selector_terms.first())
            .and_then(|t| t.match_expressions.as_ref())
            .and_then(|e| e.iter().find(|e| e.key == HOSTNAME_LABEL))
            .and_then(|e| e.values.as_ref())
            .and_then(|v| v.first().cloned())
            .unwrap_or_default();
        Self {
            metadata: ObjectMeta::from_kube(&pv.metadata, cluster),
            spec: PersistentVolumeSpec {
                capacity: quantity_map(spec.capacity.as_ref()).unwrap_or_default(),
                access_modes: spec.access_modes.unwrap_or_default(),
                reclaim_policy: spec.persistent_volume_reclaim_policy.unwrap_or_default(),
                volume_mode: spec.volume_mode.unwrap_or_default(),
                storage_class_name: spec.storage_class_name.unwrap_or_default(),
                mount_options: spec.mount_options.unwrap_or_default(),
                host_path: spec.host_path.map(|h| HostPathSource {
                    path: h.path,
                    type_: h.type_.unwrap_or_default(),
                }),
                nfs: spec.nfs.map(|n| NfsSource {
                    server: n.server,
                    path: n.path,
                    read_only: n.read_only.unwrap_or(false),
                }),
                local: spec.local.map(|l| LocalSource {
                    path: l.path,
                    node: local_node,
                }),
                claim_ref: spec.claim_ref.map(|c| ClaimRef {
                    namespace: c.namespace.unwrap_or_default(),
                    name: c.name.unwrap_or_default(),
                }),
            },
            status: PersistentVolumeStatus {
                phase: status.phase.unwrap_or_default(),
                message: status.message.unwrap_or_default(),
                reason: status.reason.unwrap_or_default(),
            },
        }
    }

    /// Validate a create request and render it as a Kubernetes object
    fn to_create_body(&self) -> GatewayResult<Value> {
        let spec = &self.spec;
        check_object_name("persistent volume", &self.metadata.name)?;
        validation::labels(&self.metadata.labels)?;
        validation::annotations(&self.metadata.annotations)?;
        capacity(&spec.capacity)?;
        let modes = access_modes(&spec.access_modes)?;

        let reclaim = if spec.reclaim_policy.is_empty() { "Retain" } else { spec.reclaim_policy.as_str() };
        one_of("reclaimPolicy", reclaim, &["Retain", "Delete", "Recycle"])?;
        let mode = if spec.volume_mode.is_empty() { "Filesystem" } else { spec.volume_mode.as_str() };
        one_of("volumeMode", mode, &["Filesystem", "Block"])?;

        let sources = [spec.host_path.is_some(), spec.nfs.is_some(), spec.local.is_some()];
        if sources.iter().filter(|s| **s).count() != 1 {
            return Err(GatewayError::invalid(
                "exactly one of hostPath, nfs or local must be set",
            ));
        }

        let mut meta = self.metadata.clone();
        meta.namespace = None;
        meta.resource_version.clear();
        let mut body = json!({
            "metadata": meta.to_kube(),
            "spec": {
                "capacity": {"storage": spec.capacity},
                "accessModes": modes,
                "persistentVolumeReclaimPolicy": reclaim,
                "volumeMode": mode,
            }
        });
        let out = &mut body["spec"];
        if !spec.storage_class_name.is_empty() {
            out["storageClassName"] = json!(spec.storage_class_name);
        }
        if !spec.mount_options.is_empty() {
            out["mountOptions"] = json!(spec.mount_options);
        }
        if let Some(host) = &spec.host_path {
            if host.path.is_empty() {
                return Err(GatewayError::invalid("hostPath.path is required"));
            }
            out["hostPath"] = json!(host);
        }
        if let Some(nfs) = &spec.nfs {
            if nfs.server.is_empty() || nfs.path.is_empty() {
                return Err(GatewayError::invalid("nfs.server and nfs.path are required"));
            }
            out["nfs"] = json!(nfs);
        }
        if let Some(local) = &spec.local {
            if local.path.is_empty() || local.node.is_empty() {
                return Err(GatewayError::invalid("local.path and local.node are required"));
            }
            out["local"] = json!({"path": local.path});
            out["nodeAffinity"] = json!({
                "required": {"nodeSelectorTerms": [{
                    "matchExpressions": [{
                        "key": HOSTNAME_LABEL,
                        "operator": "In",
                        "values": [local.node],
                    }]
                }]}
            });
        }
        Ok(body)
    }
}

impl Listable for PersistentVolume {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "uid",
        "creationTimestamp",
        "phase",
        "storageClassName",
        "reclaimPolicy",
        "capacity",
    ];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "phase" => SortKey::from(self.status.phase.as_str()),
            "storageClassName" => SortKey::from(self.spec.storage_class_name.as_str()),
            "reclaimPolicy" => SortKey::from(self.spec.reclaim_policy.as_str()),
            "capacity" => parse_quantity(&self.spec.capacity).map_or(SortKey::Null, SortKey::from),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

// ============================================================================
// Persistent volume claims
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Requested size, `resources.requests.storage`
    #[serde(default)]
    pub storage: String,
    #[serde(default)]
    pub storage_class_name: String,
    #[serde(default)]
    pub volume_mode: String,
    #[serde(default)]
    pub volume_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimStatus {
    pub phase: String,
    pub access_modes: Vec<String>,
    pub capacity: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PersistentVolumeClaimSpec,
    #[serde(default)]
    pub status: PersistentVolumeClaimStatus,
    /// Value of the pvc-type label
    #[serde(default)]
    pub storage_type: String,
}

impl PersistentVolumeClaim {
    pub fn from_kube(pvc: &KubePersistentVolumeClaim, cluster: &str) -> Self {
        let spec = pvc.spec.clone().unwrap_or_default();
        let status = pvc.status.clone().unwrap_or_default();
        let metadata = ObjectMeta::from_kube(&pvc.metadata, cluster);
        let storage_type = metadata.labels.get(PVC_TYPE_LABEL).cloned().unwrap_or_default();
        Self {
            spec: PersistentVolumeClaimSpec {
                access_modes: spec.access_modes.unwrap_or_default(),
                storage: spec
                    .resources
                    .as_ref()
                    .and_then(|r| quantity_map(r.requests.as_ref()))
                    .unwrap_or_default(),
                storage_class_name: spec.storage_class_name.unwrap_or_default(),
                volume_mode: spec.volume_mode.unwrap_or_default(),
                volume_name: spec.volume_name.unwrap_or_default(),
            },
            status: PersistentVolumeClaimStatus {
                phase: status.phase.unwrap_or_default(),
                access_modes: status.access_modes.unwrap_or_default(),
                capacity: quantity_map(status.capacity.as_ref()).unwrap_or_default(),
                conditions: status
                    .conditions
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| Condition {
                        type_: c.type_,
                        status: c.status,
                        reason: c.reason.unwrap_or_default(),
                        message: c.message.unwrap_or_default(),
                        last_transition_time: c
                            .last_transition_time
                            .map(|t| format_time(t.0))
                            .unwrap_or_default(),
                    })
                    .collect(),
            },
            metadata,
            storage_type,
        }
    }

    fn to_create_body(&self, namespace: &str) -> GatewayResult<Value> {
        check_object_name("persistent volume claim", &self.metadata.name)?;
        validation::labels(&self.metadata.labels)?;
        validation::annotations(&self.metadata.annotations)?;
        capacity(&self.spec.storage)?;
        let modes = access_modes(&self.spec.access_modes)?;

        let mut meta = self.metadata.clone();
        meta.namespace = Some(namespace.to_string());
        meta.resource_version.clear();
        if !self.storage_type.is_empty() {
            validation::label_value(PVC_TYPE_LABEL, &self.storage_type)?;
            meta.labels.insert(PVC_TYPE_LABEL.to_string(), self.storage_type.clone());
        }
        let class = if self.spec.storage_class_name.is_empty() {
            DEFAULT_STORAGE_CLASS
        } else {
            self.spec.storage_class_name.as_str()
        };

        let mut body = json!({
            "metadata": meta.to_kube(),
            "spec": {
                "accessModes": modes,
                "resources": {"requests": {"storage": self.spec.storage}},
                "storageClassName": class,
            }
        });
        if !self.spec.volume_mode.is_empty() {
            one_of("volumeMode", &self.spec.volume_mode, &["Filesystem", "Block"])?;
            body["spec"]["volumeMode"] = json!(self.spec.volume_mode);
        }
        if !self.spec.volume_name.is_empty() {
            body["spec"]["volumeName"] = json!(self.spec.volume_name);
        }
        Ok(body)
    }
}

impl Listable for PersistentVolumeClaim {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "namespace",
        "uid",
        "creationTimestamp",
        "phase",
        "storageClassName",
        "storageType",
        "storage",
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
            "phase" => SortKey::from(self.status.phase.as_str()),
            "storageClassName" => SortKey::from(self.spec.storage_class_name.as_str()),
            "storageType" => SortKey::from(self.storage_type.as_str()),
            "storage" => parse_quantity(&self.spec.storage).map_or(SortKey::Null, SortKey::from),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

// ============================================================================
// Storage classes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClass {
    pub metadata: ObjectMeta,
    pub provisioner: String,
    pub storage_class_name: String,
    pub mount_options: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    pub allow_volume_expansion: bool,
    pub reclaim_policy: String,
    pub volume_binding_mode: String,
}

impl StorageClass {
    pub fn from_kube(sc: &KubeStorageClass, cluster: &str) -> Self {
        let metadata = ObjectMeta::from_kube(&sc.metadata, cluster);
        Self {
            storage_class_name: metadata.name.clone(),
            metadata,
            provisioner: sc.provisioner.clone(),
            mount_options: sc.mount_options.clone().unwrap_or_default(),
            parameters: sc.parameters.clone().unwrap_or_default(),
            allow_volume_expansion: sc.allow_volume_expansion.unwrap_or(false),
            reclaim_policy: sc.reclaim_policy.clone().unwrap_or_else(|| "Delete".to_string()),
            volume_binding_mode: sc
                .volume_binding_mode
                .clone()
                .unwrap_or_else(|| "Immediate".to_string()),
        }
    }
}

impl Listable for StorageClass {
    const FIELDS: &'static [&'static str] =
        &["name", "uid", "creationTimestamp", "provisioner", "reclaimPolicy"];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "provisioner" => SortKey::from(self.provisioner.as_str()),
            "reclaimPolicy" => SortKey::from(self.reclaim_policy.as_str()),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

impl ResourceService {
    pub async fn list_persistent_volumes(
        &self,
        cluster: &str,
        query: &ListQuery,
    ) -> GatewayResult<Page<PersistentVolume>> {
        let options = query.to_options()?;
        let pvs: Vec<KubePersistentVolume> = self
            .list_typed(cluster, ResourceKind::PersistentVolume, None, None)
            .await?;
        options.apply(pvs.iter().map(|p| PersistentVolume::from_kube(p, cluster)).collect())
    }

    pub async fn get_persistent_volume(&self, cluster: &str, name: &str) -> GatewayResult<PersistentVolume> {
        let pv: KubePersistentVolume = self
            .get_typed(cluster, ResourceKind::PersistentVolume, None, name)
            .await?;
        Ok(PersistentVolume::from_kube(&pv, cluster))
    }

    pub async fn create_persistent_volume(
        &self,
        cluster: &str,
        req: &PersistentVolume,
    ) -> GatewayResult<PersistentVolume> {
        let body = req.to_create_body()?;
        let backend = self.backend(cluster).await?;
        let kind = ResourceKind::PersistentVolume;
        let created = self
            .call(cluster, backend.create(kind, None, encode(kind, &body)?))
            .await?;
        let created: KubePersistentVolume = serde_json::from_value(created)?;
        info!(cluster = %cluster, pv = %req.metadata.name, "Created persistent volume");
        Ok(PersistentVolume::from_kube(&created, cluster))
    }

    pub async fn delete_persistent_volume(&self, cluster: &str, name: &str) -> GatewayResult<()> {
        self.delete_object(cluster, ResourceKind::PersistentVolume, None, name)
            .await?;
        info!(cluster = %cluster, pv = %name, "Deleted persistent volume");
        Ok(())
    }

    pub async fn list_persistent_volume_claims(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> GatewayResult<Page<PersistentVolumeClaim>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?;
        let pvcs: Vec<KubePersistentVolumeClaim> = self
            .list_typed(cluster, ResourceKind::PersistentVolumeClaim, namespace, None)
            .await?;
        options.apply(pvcs.iter().map(|p| PersistentVolumeClaim::from_kube(p, cluster)).collect())
    }

    pub async fn get_persistent_volume_claim(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> GatewayResult<PersistentVolumeClaim> {
        check_namespace(namespace)?;
        let pvc: KubePersistentVolumeClaim = self
            .get_typed(cluster, ResourceKind::PersistentVolumeClaim, Some(namespace), name)
            .await?;
        Ok(PersistentVolumeClaim::from_kube(&pvc, cluster))
    }

    pub async fn create_persistent_volume_claim(
        &self,
        cluster: &str,
        namespace: &str,
        req: &PersistentVolumeClaim,
    ) -> GatewayResult<PersistentVolumeClaim> {
        check_namespace(namespace)?;
        let body = req.to_create_body(namespace)?;
        let backend = self.backend(cluster).await?;
        let kind = ResourceKind::PersistentVolumeClaim;
        let created = self
            .call(cluster, backend.create(kind, Some(namespace), encode(kind, &body)?))
            .await?;
        let created: KubePersistentVolumeClaim = serde_json::from_value(created)?;
        info!(cluster = %cluster, namespace = %namespace, pvc = %req.metadata.name, "Created persistent volume claim");
        Ok(PersistentVolumeClaim::from_kube(&created, cluster))
    }

    pub async fn delete_persistent_volume_claim(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> GatewayResult<()> {
        check_namespace(namespace)?;
        self.delete_object(cluster, ResourceKind::PersistentVolumeClaim, Some(namespace), name)
            .await?;
        info!(cluster = %cluster, namespace = %namespace, pvc = %name, "Deleted persistent volume claim");
        Ok(())
    }

    pub async fn list_storage_classes(
        &self,
        cluster: &str,
        query: &ListQuery,
    ) -> GatewayResult<Page<StorageClass>> {
        let options = query.to_options()?;
        let classes: Vec<KubeStorageClass> = self
            .list_typed(cluster, ResourceKind::StorageClass, None, None)
            .await?;
        options.apply(classes.iter().map(|c| StorageClass::from_kube(c, cluster)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::resources::service::tests::service_with;
    use std::sync::Arc;

    fn pv_request(name: &str) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta::named(name),
            spec: PersistentVolumeSpec {
                capacity: "10Gi".into(),
                access_modes: vec!["RWO".into()],
                host_path: Some(HostPathSource {
                    path: "/data".into(),
                    type_: String::new(),
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_access_mode_aliases() {
        assert_eq!(access_mode("RWX").unwrap(), "ReadWriteMany");
        assert_eq!(access_mode("ReadOnlyMany").unwrap(), "ReadOnlyMany");
        assert!(access_mode("RW").is_err());
    }

    #[test]
    fn test_pv_requires_exactly_one_source() {
        let mut req = pv_request("pv-a");
        req.spec.nfs = Some(NfsSource {
            server: "10.0.0.1".into(),
            path: "/export".into(),
            read_only: false,
        });
        assert!(matches!(req.to_create_body(), Err(GatewayError::InvalidArgument(_))));

        req.spec.host_path = None;
        req.spec.nfs = None;
        assert!(req.to_create_body().is_err());
    }

    #[test]
    fn test_pv_rejects_bad_capacity_and_policy() {
        let mut req = pv_request("pv-a");
        req.spec.capacity = "lots".into();
        assert!(req.to_create_body().is_err());

        let mut req = pv_request("pv-a");
        req.spec.reclaim_policy = "Keep".into();
        assert!(req.to_create_body().is_err());
    }

    #[tokio::test]
    async fn test_pv_lifecycle() {
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        let service = service_with("c1", backend.clone(), None).await;

        let mut req = pv_request("pv-local");
        req.spec.host_path = None;
        req.spec.local = Some(LocalSource {
            path: "/mnt/disk1".into(),
            node: "n1".into(),
        });
        let created = service.create_persistent_volume("c1", &req).await.unwrap();
        assert_eq!(created.spec.access_modes, vec!["ReadWriteOnce"]);
        assert_eq!(created.spec.reclaim_policy, "Retain");
        assert_eq!(created.spec.local.unwrap().node, "n1");

        service.create_persistent_volume("c1", &pv_request("pv-host")).await.unwrap();
        let page = service
            .list_persistent_volumes("c1", &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);

        service.delete_persistent_volume("c1", "pv-local").await.unwrap();
        let err = service.get_persistent_volume("c1", "pv-local").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pvc_defaults_and_type_label() {
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        let service = service_with("c1", backend.clone(), None).await;
        let req = PersistentVolumeClaim {
            metadata: ObjectMeta::named("models"),
            spec: PersistentVolumeClaimSpec {
                access_modes: vec!["RWX".into()],
                storage: "50Gi".into(),
                ..Default::default()
            },
            storage_type: "nfs".into(),
            ..Default::default()
        };
        let created = service
            .create_persistent_volume_claim("c1", "team-a", &req)
            .await
            .unwrap();
        assert_eq!(created.spec.storage_class_name, DEFAULT_STORAGE_CLASS);
        assert_eq!(created.spec.storage, "50Gi");
        assert_eq!(created.storage_type, "nfs");

        let got = service
            .get_persistent_volume_claim("c1", "team-a", "models")
            .await
            .unwrap();
        assert_eq!(got.metadata.labels[PVC_TYPE_LABEL], "nfs");

        let err = service
            .create_persistent_volume_claim("c1", "team-a", &req)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_storage_class_defaults() {
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3").with_object(
            ResourceKind::StorageClass,
            json!({"metadata": {"name": "local-path"}, "provisioner": "rancher.io/local-path"}),
        ));
        let service = service_with("c1", backend, None).await;
        let page = service
            .list_storage_classes("c1", &ListQuery::default())
            .await
            .unwrap();
        let sc = &page.items[0];
        assert_eq!(sc.storage_class_name, "local-path");
        assert_eq!(sc.reclaim_policy, "Delete");
        assert_eq!(sc.volume_binding_mode, "Immediate");
    }
}
