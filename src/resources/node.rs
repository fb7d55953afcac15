//! Nodes of a member cluster
//!
//! A node's phase comes from its `Ready` condition and its roles from the
//! well-known `node-role.kubernetes.io/*` labels. Capacity and usage
//! figures come from the metrics backend, fetched once per list for the
//! whole cluster rather than once per node.

use std::collections::{BTreeMap, HashMap};

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Node as KubeNode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::list::{ListQuery, Listable, Page, SortKey};
use super::meta::{format_time, Condition, ObjectMeta};
use super::service::{filter_value, replace_map_patch, ResourceService};
use crate::backend::ResourceKind;
use crate::cluster::types::wire_name;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::gpu::{GpuFilter, GpuReading};
use crate::monitoring::{ClusterMetrics, Quantity, Scope};
use crate::validation;

pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
pub const SCHEDULING_DISABLED: &str = "SchedulingDisabled";
/// Ratio between the GPU memory HAMi advertises and the physical memory
pub const GPU_MEMORY_FACTOR_ANNOTATION: &str = "NVIDIA_GPU_MEMORY_FACTOR";

// ============================================================================
// Wire types
// ============================================================================

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodePhase {
    Ready,
    Not_Ready,
    #[default]
    Unknown,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    CONTROL_PLANE,
    WORKER,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub type_: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSystemInfo {
    pub kernel_version: String,
    pub os_image: String,
    pub container_runtime_version: String,
    pub kubelet_version: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    pub unschedulable: bool,
    pub taints: Vec<Taint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub phase: NodePhase,
    pub conditions: Vec<Condition>,
    pub addresses: Vec<NodeAddress>,
    pub roles: Vec<NodeRole>,
    pub system_info: NodeSystemInfo,

    pub cpu_capacity: f64,
    pub cpu_allocated: f64,
    pub cpu_usage: f64,
    pub memory_capacity: f64,
    pub memory_allocated: f64,
    pub memory_usage: f64,
    pub gpu_count: i64,
    pub gpu_core_total: f64,
    pub gpu_core_allocated: f64,
    pub gpu_core_usage: f64,
    pub gpu_memory_total: f64,
    pub gpu_memory_allocatable: f64,
    pub gpu_memory_allocated: f64,
    pub gpu_memory_usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

impl Listable for Node {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "namespace",
        "uid",
        "creationTimestamp",
        "phase",
        "unschedulable",
        "podCIDR",
        "cpuCapacity",
        "cpuAllocated",
        "cpuUsage",
        "memoryCapacity",
        "memoryAllocated",
        "memoryUsage",
        "gpuCount",
        "gpuCoreTotal",
        "gpuCoreAllocated",
        "gpuCoreUsage",
        "gpuMemoryTotal",
        "gpuMemoryAllocated",
        "gpuMemoryUsage",
    ];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        let s = &self.status;
        match field {
            "phase" => SortKey::from(wire_name(&s.phase)),
            "unschedulable" => SortKey::from(self.spec.unschedulable),
            "podCIDR" => SortKey::from(self.spec.pod_cidr.as_str()),
            "cpuCapacity" => SortKey::from(s.cpu_capacity),
            "cpuAllocated" => SortKey::from(s.cpu_allocated),
            "cpuUsage" => SortKey::from(s.cpu_usage),
            "memoryCapacity" => SortKey::from(s.memory_capacity),
            "memoryAllocated" => SortKey::from(s.memory_allocated),
            "memoryUsage" => SortKey::from(s.memory_usage),
            "gpuCount" => SortKey::from(s.gpu_count),
            "gpuCoreTotal" => SortKey::from(s.gpu_core_total),
            "gpuCoreAllocated" => SortKey::from(s.gpu_core_allocated),
            "gpuCoreUsage" => SortKey::from(s.gpu_core_usage),
            "gpuMemoryTotal" => SortKey::from(s.gpu_memory_total),
            "gpuMemoryAllocated" => SortKey::from(s.gpu_memory_allocated),
            "gpuMemoryUsage" => SortKey::from(s.gpu_memory_usage),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

/// Filters of `GET .../nodes` beyond the common list parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeFilters {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutTaintsRequest {
    #[serde(default)]
    pub taints: Vec<Taint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutMapRequest {
    #[serde(default, alias = "labels", alias = "annotations")]
    pub values: BTreeMap<String, String>,
}

// ============================================================================
// Conversion
// ============================================================================

/// Whether a node's `Ready` condition is `True`
pub fn is_ready(node: &KubeNode) -> bool {
    phase_of(node) == NodePhase::Ready
}

pub fn phase_of(node: &KubeNode) -> NodePhase {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"));
    match ready.map(|c| c.status.as_str()) {
        Some("True") => NodePhase::Ready,
        Some("False") => NodePhase::Not_Ready,
        _ => NodePhase::Unknown,
    }
}

pub fn roles_of(labels: &BTreeMap<String, String>) -> Vec<NodeRole> {
    let mut roles = Vec::new();
    if labels.contains_key(CONTROL_PLANE_LABEL) || labels.contains_key(MASTER_LABEL) {
        roles.push(NodeRole::CONTROL_PLANE);
    }
    if labels.contains_key(WORKER_LABEL) || roles.is_empty() {
        roles.push(NodeRole::WORKER);
    }
    roles
}

/// GPU memory factor from the node's annotations; 1 when absent or unusable
pub fn memory_factor(annotations: &BTreeMap<String, String>) -> f64 {
    annotations
        .get(GPU_MEMORY_FACTOR_ANNOTATION)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(1.0)
}

/// Accepts `CONTROL_PLANE`, `worker` and the `NODE_ROLE_` prefixed forms
pub fn parse_role(raw: &str) -> GatewayResult<NodeRole> {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.trim_start_matches("NODE_ROLE_") {
        "CONTROL_PLANE" => Ok(NodeRole::CONTROL_PLANE),
        "WORKER" => Ok(NodeRole::WORKER),
        _ => Err(GatewayError::invalid(format!("unknown node role '{}'", raw))),
    }
}

pub fn parse_phase(raw: &str) -> GatewayResult<NodePhase> {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.trim_start_matches("NODE_PHASE_") {
        "READY" => Ok(NodePhase::Ready),
        "NOT_READY" | "NOTREADY" => Ok(NodePhase::Not_Ready),
        "UNKNOWN" => Ok(NodePhase::Unknown),
        _ => Err(GatewayError::invalid(format!("unknown node phase '{}'", raw))),
    }
}

fn taint_effect(raw: &str) -> Option<TaintEffect> {
    match raw {
        "NoSchedule" => Some(TaintEffect::NoSchedule),
        "PreferNoSchedule" => Some(TaintEffect::PreferNoSchedule),
        "NoExecute" => Some(TaintEffect::NoExecute),
        _ => None,
    }
}

impl Node {
    pub fn from_kube(node: &KubeNode, cluster: &str) -> Self {
        let metadata = ObjectMeta::from_kube(&node.metadata, cluster);
        let kube_spec = node.spec.clone().unwrap_or_default();
        let kube_status = node.status.clone().unwrap_or_default();
        let unschedulable = kube_spec.unschedulable.unwrap_or(false);

        let spec = NodeSpec {
            pod_cidr: kube_spec.pod_cidr.unwrap_or_default(),
            unschedulable,
            taints: kube_spec
                .taints
                .unwrap_or_default()
                .into_iter()
                .filter_map(|t| {
                    Some(Taint {
                        effect: taint_effect(&t.effect)?,
                        key: t.key,
                        value: t.value.unwrap_or_default(),
                    })
                })
                .collect(),
        };

        let mut conditions: Vec<Condition> = kube_status
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
            .collect();
        conditions.push(Condition::new(
            SCHEDULING_DISABLED,
            unschedulable,
            "",
            &format!("Node scheduling disabled: {}", unschedulable),
        ));

        let info = kube_status.node_info.unwrap_or_default();
        let status = NodeStatus {
            phase: phase_of(node),
            conditions,
            addresses: kube_status
                .addresses
                .unwrap_or_default()
                .into_iter()
                .filter(|a| a.type_ != "Hostname")
                .map(|a| NodeAddress {
                    type_: a.type_,
                    address: a.address,
                })
                .collect(),
            roles: roles_of(&metadata.labels),
            system_info: NodeSystemInfo {
                kernel_version: info.kernel_version,
                os_image: info.os_image,
                container_runtime_version: info.container_runtime_version,
                kubelet_version: info.kubelet_version,
                architecture: info.architecture,
            },
            ..Default::default()
        };

        Self {
            metadata,
            spec,
            status,
        }
    }

    fn apply_metrics(&mut self, table: &NodeMetrics) {
        let name = self.metadata.name.as_str();
        let get = |q: Quantity| {
            table
                .values
                .get(&q)
                .and_then(|per_node| per_node.get(name))
                .copied()
                .unwrap_or(0.0)
        };
        let factor = memory_factor(&self.metadata.annotations);
        let s = &mut self.status;
        s.cpu_capacity = get(Quantity::CpuTotal);
        s.cpu_allocated = get(Quantity::CpuAllocated);
        s.cpu_usage = get(Quantity::CpuUsed);
        s.memory_capacity = get(Quantity::MemTotal);
        s.memory_allocated = get(Quantity::MemAllocated);
        s.memory_usage = get(Quantity::MemUsed);
        s.gpu_core_total = get(Quantity::GpuCoreTotal);
        s.gpu_core_allocated = get(Quantity::GpuCoreAllocated);
        s.gpu_core_usage = get(Quantity::GpuCoreUsed);
        s.gpu_memory_allocatable = get(Quantity::GpuMemTotal);
        s.gpu_memory_total = (s.gpu_memory_allocatable / factor).trunc();
        s.gpu_memory_allocated = get(Quantity::GpuMemAllocated);
        s.gpu_memory_usage = get(Quantity::GpuMemUsed);
        s.gpu_count = table.gpu_count.get(name).copied().unwrap_or(0);
    }
}

// ============================================================================
// Metrics
// ============================================================================

const NODE_QUANTITIES: [Quantity; 12] = [
    Quantity::CpuTotal,
    Quantity::CpuAllocated,
    Quantity::CpuUsed,
    Quantity::MemTotal,
    Quantity::MemAllocated,
    Quantity::MemUsed,
    Quantity::GpuCoreTotal,
    Quantity::GpuCoreAllocated,
    Quantity::GpuCoreUsed,
    Quantity::GpuMemTotal,
    Quantity::GpuMemAllocated,
    Quantity::GpuMemUsed,
];

/// Per-node figures for a whole cluster
#[derive(Debug, Clone, Default)]
pub struct NodeMetrics {
    pub values: HashMap<Quantity, BTreeMap<String, f64>>,
    pub gpu_count: BTreeMap<String, i64>,
}

impl NodeMetrics {
    /// One query per quantity; `node` narrows every query to a single node
    pub async fn fetch(metrics: &ClusterMetrics, node: Option<&str>) -> GatewayResult<Self> {
        if !metrics.is_configured() {
            return Ok(Self::default());
        }
        let scope = node.map_or(Scope::Nodes, Scope::Node);
        let values = try_join_all(NODE_QUANTITIES.iter().map(|&q| async move {
            metrics.by_label(scope, q, "node").await.map(|v| (q, v))
        }))
        .await?
        .into_iter()
        .collect();

        let filter = node.map(GpuFilter::node).unwrap_or_default();
        let mut gpu_count = BTreeMap::new();
        for sample in metrics.gpu_vector(GpuReading::Temp, &filter).await? {
            if let Some(node) = sample.label("node") {
                *gpu_count.entry(node.to_string()).or_insert(0) += 1;
            }
        }
        Ok(Self { values, gpu_count })
    }
}

// ============================================================================
// Operations
// ============================================================================

impl ResourceService {
    async fn node_metrics(&self, cluster: &str, node: Option<&str>) -> NodeMetrics {
        let fetched = match self.metrics(cluster).await {
            Ok(metrics) => self.call(cluster, NodeMetrics::fetch(&metrics, node)).await,
            Err(e) => Err(e),
        };
        fetched.unwrap_or_else(|e| {
            warn!(cluster = %cluster, "Node metrics unavailable: {}", e);
            NodeMetrics::default()
        })
    }

    pub async fn list_nodes(
        &self,
        cluster: &str,
        query: &ListQuery,
        filters: &NodeFilters,
    ) -> GatewayResult<Page<Node>> {
        let options = query.to_options()?.with_default_sort("name", true);
        let role = filter_value(filters.role.as_deref())
            .map(parse_role)
            .transpose()?;
        let phase = filter_value(filters.phase.as_deref())
            .map(parse_phase)
            .transpose()?;

        let nodes: Vec<KubeNode> = self
            .list_typed(cluster, ResourceKind::Node, None, None)
            .await?;
        let mut items: Vec<Node> = nodes
            .iter()
            .map(|n| Node::from_kube(n, cluster))
            .filter(|n| role.map_or(true, |r| n.status.roles.contains(&r)))
            .filter(|n| phase.map_or(true, |p| n.status.phase == p))
            .collect();

        let table = self.node_metrics(cluster, None).await;
        for node in &mut items {
            node.apply_metrics(&table);
        }
        debug!(cluster = %cluster, count = items.len(), "Listed nodes");
        options.apply(items)
    }

    pub async fn get_node(&self, cluster: &str, name: &str) -> GatewayResult<Node> {
        let node: KubeNode = self
            .get_typed(cluster, ResourceKind::Node, None, name)
            .await?;
        let mut node = Node::from_kube(&node, cluster);
        let table = self.node_metrics(cluster, Some(name)).await;
        node.apply_metrics(&table);
        Ok(node)
    }

    async fn patch_node(&self, cluster: &str, name: &str, patch: serde_json::Value) -> GatewayResult<()> {
        let backend = self.backend(cluster).await?;
        self.call(cluster, backend.patch(ResourceKind::Node, None, name, patch))
            .await?;
        Ok(())
    }

    async fn node_meta(&self, cluster: &str, name: &str) -> GatewayResult<ObjectMeta> {
        let node: KubeNode = self
            .get_typed(cluster, ResourceKind::Node, None, name)
            .await?;
        Ok(ObjectMeta::from_kube(&node.metadata, cluster))
    }

    /// Replace the node's labels with exactly `labels`
    pub async fn put_node_labels(
        &self,
        cluster: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        validation::labels(labels)?;
        let meta = self.node_meta(cluster, name).await?;
        let patch = json!({"metadata": {"labels": replace_map_patch(&meta.labels, labels)}});
        self.patch_node(cluster, name, patch).await?;
        info!(cluster = %cluster, node = %name, "Replaced node labels");
        Ok(())
    }

    /// Replace the node's annotations with exactly `annotations`
    pub async fn update_node_annotations(
        &self,
        cluster: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        validation::annotations(annotations)?;
        let meta = self.node_meta(cluster, name).await?;
        let patch = json!({
            "metadata": {"annotations": replace_map_patch(&meta.annotations, annotations)}
        });
        self.patch_node(cluster, name, patch).await?;
        info!(cluster = %cluster, node = %name, "Replaced node annotations");
        Ok(())
    }

    pub async fn put_node_taints(&self, cluster: &str, name: &str, taints: &[Taint]) -> GatewayResult<()> {
        for taint in taints {
            validation::qualified_name(&taint.key)?;
            if !taint.value.is_empty() {
                validation::label_value(&taint.key, &taint.value)?;
            }
        }
        // A merge patch replaces lists wholesale.
        let patch = json!({"spec": {"taints": taints}});
        self.patch_node(cluster, name, patch).await?;
        info!(cluster = %cluster, node = %name, count = taints.len(), "Replaced node taints");
        Ok(())
    }

    pub async fn schedule_node(&self, cluster: &str, name: &str) -> GatewayResult<()> {
        self.set_unschedulable(cluster, name, false).await
    }

    pub async fn unschedule_node(&self, cluster: &str, name: &str) -> GatewayResult<()> {
        self.set_unschedulable(cluster, name, true).await
    }

    async fn set_unschedulable(&self, cluster: &str, name: &str, unschedulable: bool) -> GatewayResult<()> {
        if name.is_empty() {
            return Err(GatewayError::invalid("node name is required"));
        }
        let patch = json!({"spec": {"unschedulable": unschedulable}});
        self.patch_node(cluster, name, patch).await?;
        info!(cluster = %cluster, node = %name, unschedulable, "Updated node scheduling");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::monitoring::fixed::StaticMetrics;
    use crate::resources::service::tests::service_with;
    use std::sync::Arc;

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(
                    ResourceKind::Node,
                    json!({
                        "metadata": {
                            "name": "master-0",
                            "labels": {"node-role.kubernetes.io/control-plane": ""}
                        },
                        "spec": {"podCIDR": "10.0.0.0/24",
                                 "taints": [{"key": "k", "value": "v", "effect": "NoSchedule"}]},
                        "status": {
                            "conditions": [{"type": "Ready", "status": "True"}],
                            "addresses": [
                                {"type": "InternalIP", "address": "10.0.0.1"},
                                {"type": "Hostname", "address": "master-0"}
                            ],
                            "nodeInfo": {
                                "kernelVersion": "6.1", "osImage": "Ubuntu", "containerRuntimeVersion": "containerd://1.7",
                                "kubeletVersion": "v1.28.3", "architecture": "amd64", "bootID": "", "machineID": "",
                                "kubeProxyVersion": "", "operatingSystem": "linux", "systemUUID": ""
                            }
                        }
                    }),
                )
                .with_object(
                    ResourceKind::Node,
                    json!({
                        "metadata": {"name": "gpu-1", "annotations": {"NVIDIA_GPU_MEMORY_FACTOR": "2"}},
                        "status": {"conditions": [{"type": "Ready", "status": "False"}]}
                    }),
                ),
        )
    }

    fn metrics() -> Arc<StaticMetrics> {
        Arc::new(
            StaticMetrics::new()
                .with_sample("kantaloupe_node_cpu_total", &[("cluster", "c1"), ("node", "gpu-1")], 32.0)
                .with_sample("kantaloupe_node_gpumem_total", &[("cluster", "c1"), ("node", "gpu-1")], 163840.0)
                .with_sample("kantaloupe_gpu_temp", &[("cluster", "c1"), ("node", "gpu-1"), ("UUID", "g0")], 40.0)
                .with_sample("kantaloupe_gpu_temp", &[("cluster", "c1"), ("node", "gpu-1"), ("UUID", "g1")], 41.0),
        )
    }

    #[test]
    fn test_roles_and_factor() {
        let mut labels = BTreeMap::new();
        assert_eq!(roles_of(&labels), vec![NodeRole::WORKER]);
        labels.insert(MASTER_LABEL.to_string(), String::new());
        assert_eq!(roles_of(&labels), vec![NodeRole::CONTROL_PLANE]);
        labels.insert(WORKER_LABEL.to_string(), String::new());
        assert_eq!(roles_of(&labels), vec![NodeRole::CONTROL_PLANE, NodeRole::WORKER]);

        let mut annotations = BTreeMap::new();
        assert_eq!(memory_factor(&annotations), 1.0);
        annotations.insert(GPU_MEMORY_FACTOR_ANNOTATION.to_string(), "0".to_string());
        assert_eq!(memory_factor(&annotations), 1.0);
        annotations.insert(GPU_MEMORY_FACTOR_ANNOTATION.to_string(), "4".to_string());
        assert_eq!(memory_factor(&annotations), 4.0);
    }

    #[test]
    fn test_phase_serializes_with_underscore() {
        assert_eq!(serde_json::to_value(NodePhase::Not_Ready).unwrap(), "Not_Ready");
        assert_eq!(serde_json::to_value(NodeRole::CONTROL_PLANE).unwrap(), "CONTROL_PLANE");
    }

    #[tokio::test]
    async fn test_list_nodes_with_metrics_and_filters() {
        let service = service_with("c1", backend(), Some(metrics())).await;
        let page = service
            .list_nodes("c1", &ListQuery::default(), &NodeFilters::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.items[0].metadata.name, "gpu-1");

        let gpu = &page.items[0];
        assert_eq!(gpu.status.phase, NodePhase::Not_Ready);
        assert_eq!(gpu.status.cpu_capacity, 32.0);
        assert_eq!(gpu.status.gpu_memory_allocatable, 163840.0);
        assert_eq!(gpu.status.gpu_memory_total, 81920.0);
        assert_eq!(gpu.status.gpu_count, 2);

        let master = &page.items[1];
        assert_eq!(master.status.roles, vec![NodeRole::CONTROL_PLANE]);
        assert_eq!(master.status.addresses.len(), 1);
        assert_eq!(master.status.system_info.kernel_version, "6.1");
        assert_eq!(master.spec.taints[0].effect, TaintEffect::NoSchedule);
        let last = master.status.conditions.last().unwrap();
        assert_eq!(last.type_, SCHEDULING_DISABLED);
        assert_eq!(last.status, "False");

        let filters = NodeFilters {
            role: Some("CONTROL_PLANE".into()),
            phase: Some("__ALL__".into()),
        };
        assert_eq!(parse_phase("not_ready").unwrap(), NodePhase::Not_Ready);
        assert!(parse_role("gpu").is_err());
        let page = service
            .list_nodes("c1", &ListQuery::default(), &filters)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].metadata.name, "master-0");

        let query = ListQuery {
            sort_field: Some("gpuCount".into()),
            sort_asc: Some("false".into()),
            ..Default::default()
        };
        let page = service
            .list_nodes("c1", &query, &NodeFilters::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].metadata.name, "gpu-1");
    }

    #[tokio::test]
    async fn test_node_mutations() {
        let backend = backend();
        let service = service_with("c1", backend.clone(), None).await;

        let mut labels = BTreeMap::new();
        labels.insert("zone".to_string(), "a".to_string());
        service.put_node_labels("c1", "master-0", &labels).await.unwrap();
        let node = service.get_node("c1", "master-0").await.unwrap();
        assert_eq!(node.metadata.labels, labels);
        assert_eq!(node.status.roles, vec![NodeRole::WORKER]);

        service.unschedule_node("c1", "master-0").await.unwrap();
        let node = service.get_node("c1", "master-0").await.unwrap();
        assert!(node.spec.unschedulable);
        service.schedule_node("c1", "master-0").await.unwrap();

        service.put_node_taints("c1", "master-0", &[]).await.unwrap();
        let node = service.get_node("c1", "master-0").await.unwrap();
        assert!(node.spec.taints.is_empty());
        assert!(!node.spec.unschedulable);

        let err = service.get_node("c1", "missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        let err = service.get_node("C1", "master-0").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }
}
