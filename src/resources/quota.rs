//! GPU resource quotas

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceQuota as KubeResourceQuota;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::core::check_object_name;
use super::list::{ListQuery, Listable, Page, SortKey};
use super::quantity::parse_quantity;
use super::service::{check_namespace, ResourceService, MANAGED_BY_LABEL};
use crate::backend::{encode, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::{ClusterMetrics, Selector};

/// Quota keys that make a ResourceQuota a GPU quota
pub const GPU_QUOTA_KEYS: &[&str] = &[
    "requests.nvidia.com/gpucores",
    "requests.nvidia.com/gpumem",
    "limits.nvidia.com/gpucores",
    "limits.nvidia.com/gpumem",
];

pub const GPU_MEMORY_QUOTA_KEY: &str = "requests.nvidia.com/gpumem";

/// Per-namespace GPU usage exported by the scheduler
pub const QUOTA_USED_METRIC: &str = "kantaloupe_quota_used";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub name: String,
    pub namespace: String,
    /// Unix seconds
    pub created_time: i64,
    pub hard: BTreeMap<String, String>,
    pub used: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Kantaloupeflows in the quota's namespace
    pub workload: Vec<String>,
    pub is_managed: bool,
}

impl Quota {
    pub fn from_kube(rq: &KubeResourceQuota) -> Self {
        let labels = rq.metadata.labels.clone().unwrap_or_default();
        let quantities = |m: Option<&BTreeMap<String, KubeQuantity>>| {
            m.map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
                .unwrap_or_default()
        };
        Self {
            name: rq.metadata.name.clone().unwrap_or_default(),
            namespace: rq.metadata.namespace.clone().unwrap_or_default(),
            created_time: rq.metadata.creation_timestamp.as_ref().map_or(0, |t| t.0.timestamp()),
            hard: quantities(rq.spec.as_ref().and_then(|s| s.hard.as_ref())),
            used: quantities(rq.status.as_ref().and_then(|s| s.used.as_ref())),
            is_managed: labels.get(MANAGED_BY_LABEL.0).map(String::as_str) == Some(MANAGED_BY_LABEL.1),
            labels,
            workload: Vec::new(),
        }
    }

    pub fn is_gpu_quota(&self) -> bool {
        GPU_QUOTA_KEYS.iter().any(|k| self.hard.contains_key(*k))
    }
}

impl Listable for Quota {
    const FIELDS: &'static [&'static str] = &["name", "namespace", "creationTimestamp", "isManaged"];

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "name" => SortKey::from(self.name.as_str()),
            "namespace" => SortKey::from(self.namespace.as_str()),
            "creationTimestamp" => SortKey::from(self.created_time),
            "isManaged" => SortKey::from(self.is_managed),
            _ => SortKey::Null,
        }
    }
}

/// Body of quota create and update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hard: BTreeMap<String, String>,
}

impl QuotaRequest {
    fn validate(&self) -> GatewayResult<()> {
        check_object_name("quota", &self.name)?;
        if self.hard.is_empty() {
            return Err(GatewayError::invalid("quota hard limits cannot be empty"));
        }
        for (key, value) in &self.hard {
            parse_quantity(value)
                .map_err(|_| GatewayError::invalid(format!("hard '{}' has invalid quantity '{}'", key, value)))?;
        }
        Ok(())
    }

    fn hard_json(&self) -> Value {
        json!(self.hard)
    }
}

fn managed_labels() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([MANAGED_BY_LABEL])
}

/// Overlay metric-reported GPU usage onto `used`
async fn overlay_used(metrics: &ClusterMetrics, quota: &mut Quota) -> GatewayResult<()> {
    if !metrics.is_configured() {
        return Ok(());
    }
    let mut selector = Selector::new(QUOTA_USED_METRIC).eq("namespace", quota.namespace.clone());
    if !metrics.cluster().is_empty() {
        selector = selector.eq("cluster", metrics.cluster().to_string());
    }
    for sample in metrics.instant(&selector).await? {
        if let Some(resource) = sample.label("resource").filter(|r| !r.is_empty()) {
            quota
                .used
                .insert(format!("requests.{}", resource), sample.value.to_string());
        }
    }
    Ok(())
}

impl ResourceService {
    async fn flow_names(&self, cluster: &str, namespace: &str) -> GatewayResult<Vec<String>> {
        let flows: Vec<Value> = self
            .list_typed(cluster, ResourceKind::KantaloupeFlow, Some(namespace), None)
            .await?;
        Ok(flows
            .iter()
            .filter_map(|f| f["metadata"]["name"].as_str().map(str::to_string))
            .collect())
    }

    async fn decorate_quota(&self, cluster: &str, metrics: &ClusterMetrics, quota: &mut Quota) {
        if let Err(e) = overlay_used(metrics, quota).await {
            warn!(cluster = %cluster, namespace = %quota.namespace, error = %e, "Quota usage metrics unavailable");
        }
    }

    /// GPU quotas of one namespace, or of the whole cluster
    pub async fn list_quotas(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> GatewayResult<Page<Quota>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?;
        let metrics = self.metrics(cluster).await?;
        let quotas: Vec<KubeResourceQuota> = self
            .list_typed(cluster, ResourceKind::ResourceQuota, namespace, None)
            .await?;
        let mut items = Vec::new();
        for rq in &quotas {
            let mut quota = Quota::from_kube(rq);
            if !quota.is_gpu_quota() {
                continue;
            }
            self.decorate_quota(cluster, &metrics, &mut quota).await;
            items.push(quota);
        }

        let mut page = options.apply(items)?;
        for quota in &mut page.items {
            quota.workload = self.flow_names(cluster, &quota.namespace).await?;
        }
        Ok(page)
    }

    pub async fn get_quota(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<Quota> {
        check_namespace(namespace)?;
        let rq: KubeResourceQuota = self
            .get_typed(cluster, ResourceKind::ResourceQuota, Some(namespace), name)
            .await?;
        let metrics = self.metrics(cluster).await?;
        let mut quota = Quota::from_kube(&rq);
        self.decorate_quota(cluster, &metrics, &mut quota).await;
        quota.workload = self.flow_names(cluster, namespace).await?;
        Ok(quota)
    }

    /// Create the namespace's managed quota; a namespace holds at most one
    pub async fn create_quota(
        &self,
        cluster: &str,
        namespace: &str,
        req: &QuotaRequest,
    ) -> GatewayResult<Quota> {
        check_namespace(namespace)?;
        req.validate()?;
        let existing: Vec<KubeResourceQuota> = self
            .list_typed(cluster, ResourceKind::ResourceQuota, Some(namespace), None)
            .await?;
        if existing.iter().map(Quota::from_kube).any(|q| q.is_managed) {
            return Err(GatewayError::AlreadyExists(format!(
                "namespace {} already has a managed quota",
                namespace
            )));
        }

        let body = json!({
            "metadata": {
                "name": req.name,
                "namespace": namespace,
                "labels": managed_labels(),
            },
            "spec": {"hard": req.hard_json()},
        });
        let kind = ResourceKind::ResourceQuota;
        let backend = self.backend(cluster).await?;
        let created = self
            .call(cluster, backend.create(kind, Some(namespace), encode(kind, &body)?))
            .await?;
        let created: KubeResourceQuota = serde_json::from_value(created)?;
        info!(cluster = %cluster, namespace = %namespace, quota = %req.name, "Created quota");
        Ok(Quota::from_kube(&created))
    }

    /// Replace `hard`, keeping labels and annotations
    pub async fn update_quota(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        req: &QuotaRequest,
    ) -> GatewayResult<Quota> {
        check_namespace(namespace)?;
        req.validate()?;
        if req.name != name {
            return Err(GatewayError::invalid(format!(
                "The name({}) in the request body is inconsistent with that in the URL.",
                req.name
            )));
        }
        let kind = ResourceKind::ResourceQuota;
        let backend = self.backend(cluster).await?;
        let mut current = self.call(cluster, backend.get(kind, Some(namespace), name)).await?;
        current["spec"] = json!({"hard": req.hard_json()});
        current["metadata"]["labels"][MANAGED_BY_LABEL.0] = json!(MANAGED_BY_LABEL.1);
        if let Some(object) = current.as_object_mut() {
            object.remove("status");
        }
        let updated = self
            .call(cluster, backend.replace(kind, Some(namespace), name, current))
            .await?;
        let updated: KubeResourceQuota = serde_json::from_value(updated)?;
        info!(cluster = %cluster, namespace = %namespace, quota = %name, "Updated quota");
        Ok(Quota::from_kube(&updated))
    }

    /// Delete a quota the gateway manages
    pub async fn delete_quota(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<()> {
        check_namespace(namespace)?;
        let rq: KubeResourceQuota = self
            .get_typed(cluster, ResourceKind::ResourceQuota, Some(namespace), name)
            .await?;
        if !Quota::from_kube(&rq).is_managed {
            return Err(GatewayError::invalid(format!(
                "quota {}/{} is not managed by kantaloupe",
                namespace, name
            )));
        }
        self.delete_object(cluster, ResourceKind::ResourceQuota, Some(namespace), name)
            .await?;
        info!(cluster = %cluster, namespace = %namespace, quota = %name, "Deleted quota");
        Ok(())
    }
}
