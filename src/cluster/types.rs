//! Cluster wire types

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::resources::list::{Listable, SortKey};
use crate::resources::meta::{Condition, ObjectMeta};

/// Annotation carrying the cluster's display alias
pub const ALIAS_ANNOTATION: &str = "kantaloupe.dynamia.ai/alias-name";
/// Annotation carrying the cluster's free-text description
pub const DESCRIPTION_ANNOTATION: &str = "kantaloupe.dynamia.ai/description";
/// Cluster that always lists first
pub const LOCAL_CLUSTER: &str = "local-cluster";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterProvider {
    #[default]
    Generic,
    RedhatOpenshift4,
    SuseRancher,
    VmwareTanzu,
    AwsEks,
    AliyunAck,
    HuaweiCce,
    GcpGke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    Nvidia,
    Metax,
    Cambricon,
    MooreThreads,
    IluvatarCorex,
    Hygon,
    Ascend,
    Neuron,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    #[default]
    Running,
    Unhealth,
}

/// Parse an enum from its wire name; empty and `*_UNSPECIFIED` mean "none"
pub fn parse_enum<T: DeserializeOwned>(what: &str, raw: Option<&str>) -> GatewayResult<Option<T>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let upper = raw.to_ascii_uppercase();
    if upper.ends_with("UNSPECIFIED") {
        return Ok(None);
    }
    // Accept the prefixed form too, e.g. CLUSTER_TYPE_NVIDIA.
    let prefix = format!("{}_", what.to_ascii_uppercase());
    let bare = upper.strip_prefix(&prefix).unwrap_or(&upper);
    serde_json::from_value(serde_json::Value::String(bare.to_string()))
        .map(Some)
        .map_err(|_| GatewayError::invalid(format!("unknown {} '{}'", what.to_lowercase(), raw)))
}

/// Total/ready pair; `-1` when the cluster could not be asked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub total_num: i64,
    pub ready_num: i64,
}

impl Default for ResourceSummary {
    fn default() -> Self {
        Self {
            total_num: -1,
            ready_num: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub provider: ClusterProvider,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<ClusterType>,
    #[serde(default)]
    pub api_endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub alias_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prometheus_address: String,
    #[serde(default)]
    pub gateway_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(rename = "kubeSystemID", default)]
    pub kube_system_id: String,
    #[serde(default)]
    pub state: ClusterState,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub node_summary: ResourceSummary,
    #[serde(default)]
    pub pod_summary: ResourceSummary,
    #[serde(default)]
    pub kantaloupeflow_summary: ResourceSummary,

    #[serde(default)]
    pub cpu_total: f64,
    #[serde(default)]
    pub memory_total: f64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub gpu_core_usage: f64,
    #[serde(default)]
    pub gpu_memory_usage: f64,
    #[serde(default)]
    pub gpu_core_allocated: f64,
    #[serde(default)]
    pub gpu_memory_allocated: f64,
    #[serde(default)]
    pub gpu_total: i64,
    #[serde(default)]
    pub gpu_memory_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn is_ready(&self) -> bool {
        self.status.state == ClusterState::Running
    }
}

impl Listable for Cluster {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "creationTimestamp",
        "provider",
        "type",
        "state",
        "kubernetesVersion",
        "apiEndpoint",
        "aliasName",
        "region",
        "zone",
    ];

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "provider" => SortKey::from(wire_name(&self.spec.provider)),
            "type" => self
                .spec
                .type_
                .map_or(SortKey::Null, |t| SortKey::from(wire_name(&t))),
            "state" => SortKey::from(wire_name(&self.status.state)),
            "kubernetesVersion" => SortKey::from(self.status.kubernetes_version.as_str()),
            "apiEndpoint" => SortKey::from(self.spec.api_endpoint.as_str()),
            "aliasName" => SortKey::from(self.spec.alias_name.as_str()),
            "region" => SortKey::from(self.spec.region.as_str()),
            "zone" => SortKey::from(self.spec.zone.as_str()),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }

    fn pinned(&self) -> bool {
        self.metadata.name == LOCAL_CLUSTER
    }
}

/// Wire name of a unit enum variant
pub fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrateClusterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kube_config: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub alias_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub prometheus_address: String,
    #[serde(default)]
    pub gateway_address: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterRequest {
    #[serde(default)]
    pub alias_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prometheus_address: String,
    #[serde(default)]
    pub gateway_address: String,
    #[serde(default)]
    pub kube_config: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Optimistic concurrency token from a previous read
    #[serde(default)]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKubeconfigRequest {
    #[serde(default)]
    pub kube_config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateKubeconfigResponse {
    pub valid: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersions {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlugin {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlugins {
    pub plugins: Vec<ClusterPlugin>,
}

/// Resource keys for one card model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceName {
    /// Empty when the keys apply to every model
    pub card_model: String,
    pub resource_keys: Vec<String>,
}

/// One way a workload can ask for accelerators, e.g. `NVIDIA vGPU`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRequestType {
    pub request_type: String,
    pub resource_names: Vec<ResourceName>,
}

impl CardRequestType {
    pub fn uniform(request_type: &str, keys: &[&str]) -> Self {
        Self {
            request_type: request_type.to_string(),
            resource_names: vec![ResourceName {
                card_model: String::new(),
                resource_keys: keys.iter().map(|k| k.to_string()).collect(),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRequestTypes {
    pub request_types: Vec<CardRequestType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_value(ClusterProvider::RedhatOpenshift4).unwrap(),
            "REDHAT_OPENSHIFT4"
        );
        assert_eq!(serde_json::to_value(ClusterType::MooreThreads).unwrap(), "MOORE_THREADS");
        assert_eq!(serde_json::to_value(ClusterState::Unhealth).unwrap(), "UNHEALTH");
    }

    #[test]
    fn test_parse_enum() {
        let t: Option<ClusterType> = parse_enum("type", Some("nvidia")).unwrap();
        assert_eq!(t, Some(ClusterType::Nvidia));
        let t: Option<ClusterType> = parse_enum("type", Some("TYPE_ASCEND")).unwrap();
        assert_eq!(t, Some(ClusterType::Ascend));
        let t: Option<ClusterType> = parse_enum("type", Some("CLUSTER_TYPE_UNSPECIFIED")).unwrap();
        assert_eq!(t, None);
        assert!(parse_enum::<ClusterType>("type", Some("TPU")).is_err());
    }

    #[test]
    fn test_summary_defaults_to_unknown() {
        let status = ClusterStatus::default();
        assert_eq!(status.node_summary.total_num, -1);
        assert_eq!(status.pod_summary.ready_num, -1);
    }

    #[test]
    fn test_local_cluster_pinned() {
        let mut c = Cluster::default();
        c.metadata.name = LOCAL_CLUSTER.to_string();
        assert!(c.pinned());
        assert_eq!(c.field("provider"), SortKey::from("GENERIC"));
        assert_eq!(c.field("type"), SortKey::Null);
    }
}
