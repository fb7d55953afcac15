//! Kantaloupeflow wire shapes and lifecycle state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{EnvVar, PodTemplateSpec, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::types::ClusterProvider;
use crate::error::{GatewayError, GatewayResult};
use crate::resources::list::{Listable, SortKey};
use crate::resources::meta::{format_time, Condition, ObjectMeta};
use crate::validation;

/// Label the controller puts on every pod of a flow; the spelling is what clusters carry
pub const FLOW_POD_LABEL: &str = "katanloupeflow-name";
/// `"<current>,<previous>"` GPU memory of a flow's pods, in MiB
pub const POD_ALLOCATION_ANNOTATION: &str = "kantaloupe.dynamia.io/pod-allocation-meet";

const AVAILABLE: &str = "Available";
const PROGRESSING: &str = "Progressing";

pub const NVIDIA_GPU: &str = "nvidia.com/gpu";
pub const NVIDIA_GPU_CORES: &str = "nvidia.com/gpucores";
pub const NVIDIA_GPU_MEMORY: &str = "nvidia.com/gpumem";
pub const AWS_NEURON: &str = "aws.amazon.com/neuron";
pub const AWS_NEURON_CORE: &str = "aws.amazon.com/neuroncore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Ssh,
    Vscode,
    Jupyter,
}

impl PluginType {
    /// Service exposed for the plugin: name, route type, protocol, port
    pub fn service(self) -> (&'static str, &'static str, &'static str, i32) {
        match self {
            PluginType::Ssh => ("sshd", "tcproute", "tcp", 22),
            PluginType::Vscode => ("vscode", "httproute", "tcp", 6666),
            PluginType::Jupyter => ("jupyter", "httproute", "http", 5555),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    Pod,
    #[default]
    Deployment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    #[default]
    Unknown,
    Progressing,
    Running,
    Failed,
}

impl FlowState {
    pub fn parse(raw: &str) -> GatewayResult<Option<Self>> {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.trim_start_matches("KANTALOUPEFLOW_STATE_") {
            "" | "UNSPECIFIED" => Ok(None),
            "UNKNOWN" => Ok(Some(FlowState::Unknown)),
            "PROGRESSING" => Ok(Some(FlowState::Progressing)),
            "RUNNING" => Ok(Some(FlowState::Running)),
            "FAILED" => Ok(Some(FlowState::Failed)),
            _ => Err(GatewayError::invalid(format!("unknown status '{}'", raw))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowState::Unknown => "Unknown",
            FlowState::Progressing => "Progressing",
            FlowState::Running => "Running",
            FlowState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    #[serde(default)]
    pub plugins: Vec<PluginType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub workload: WorkloadType,
    #[serde(default)]
    pub networking: Vec<Networking>,
}

impl FlowSpec {
    pub fn containers_mut(&mut self) -> impl Iterator<Item = &mut k8s_openapi::api::core::v1::Container> {
        self.template
            .spec
            .iter_mut()
            .flat_map(|s| s.containers.iter_mut())
    }

    fn container_count(&self) -> usize {
        self.template.spec.as_ref().map_or(0, |s| s.containers.len())
    }
}

/// Status condition as the controller writes it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl From<&RawCondition> for Condition {
    fn from(c: &RawCondition) -> Self {
        Condition {
            type_: c.type_.clone(),
            status: c.status.clone(),
            reason: c.reason.clone(),
            message: c.message.clone(),
            last_transition_time: c.last_transition_time.map(format_time).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub networking: Vec<Networking>,
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
}

/// The custom resource as stored on a member cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowObject {
    #[serde(default)]
    pub metadata: KubeObjectMeta,
    #[serde(default)]
    pub spec: FlowSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RawStatus>,
}

/// Lifecycle state from the `Available` and `Progressing` conditions
pub fn flow_state(conditions: &[RawCondition], created: bool) -> FlowState {
    let find = |t: &str| conditions.iter().find(|c| c.type_ == t);
    match (find(AVAILABLE), find(PROGRESSING)) {
        (Some(a), _) if a.status == "True" => FlowState::Running,
        (_, Some(p)) if p.status == "True" => FlowState::Progressing,
        (Some(a), _) if a.status == "False" => FlowState::Failed,
        _ if created => FlowState::Progressing,
        _ => FlowState::Unknown,
    }
}

/// Whether a raw flow object is in the `Running` state
pub fn flow_is_running(flow: &Value) -> bool {
    let conditions: Vec<RawCondition> = flow
        .pointer("/status/conditions")
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default();
    flow_state(&conditions, true) == FlowState::Running
}

// ============================================================================
// Gateway view
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub url: String,
}

/// One accelerator bound to a flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub uuid: String,
    pub model: String,
    /// MiB
    pub memory: i64,
    /// Share of one card, 1.0 is a whole device
    pub core: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub networks: Vec<Network>,
    pub state: FlowState,
    pub conditions: Vec<Condition>,
    pub gpus: Vec<Gpu>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kantaloupeflow {
    pub metadata: ObjectMeta,
    pub spec: FlowSpec,
    pub status: FlowStatus,
}

impl Kantaloupeflow {
    pub fn from_kube(flow: &FlowObject, cluster: &str) -> Self {
        let metadata = ObjectMeta::from_kube(&flow.metadata, cluster);
        let raw = flow.status.clone().unwrap_or_default();
        let created = metadata.creation_timestamp.is_some();
        Self {
            status: FlowStatus {
                replicas: raw.replicas,
                ready_replicas: raw.ready_replicas,
                networks: raw
                    .networking
                    .iter()
                    .map(|n| Network {
                        name: n.name.clone(),
                        url: n.url.clone(),
                    })
                    .collect(),
                state: flow_state(&raw.conditions, created),
                conditions: raw.conditions.iter().map(Condition::from).collect(),
                gpus: Vec::new(),
            },
            metadata,
            spec: flow.spec.clone(),
        }
    }

    /// `<namespace>/<name>`, the key workload metrics carry
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name
        )
    }
}

impl Listable for Kantaloupeflow {
    const FIELDS: &'static [&'static str] = &["name", "namespace", "uid", "creationTimestamp", "state"];

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
            "state" => SortKey::from(self.status.state.as_str()),
            other => self.metadata.field(other).unwrap_or(SortKey::Null),
        }
    }
}

/// `GET` of one flow: the flow and the node its first pod landed on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDetail {
    pub kantaloupeflow: Kantaloupeflow,
    pub node: String,
}

/// A condition or event line in the flow's history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionLine {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowConditions {
    pub conditions: Vec<ConditionLine>,
}

// ============================================================================
// Requests
// ============================================================================

/// Body of a create; only `metadata` and `spec` are read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateFlowRequest {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<FlowSpec>,
}

impl CreateFlowRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        validation::dns1035_label("kantaloupeflow name", &self.metadata.name)?;
        validation::labels(&self.metadata.labels)?;
        validation::annotations(&self.metadata.annotations)?;
        if self.spec.as_ref().map_or(0, FlowSpec::container_count) == 0 {
            return Err(GatewayError::invalid("podTemplate must have at least one container"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpuMemoryRequest {
    pub gpumemory: i64,
}

/// Filters of the flow list beyond the shared list parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowFilters {
    #[serde(default)]
    pub status: Option<String>,
}

// ============================================================================
// Pod template defaults
// ============================================================================

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn limits_any(container: &k8s_openapi::api::core::v1::Container, keys: &[&str]) -> bool {
    container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .is_some_and(|l| keys.iter().any(|k| l.contains_key(*k)))
}

/// Secrets generated for plugins that need one
pub trait SecretSource {
    fn secret(&mut self, len: usize) -> String;
}

impl<F: FnMut(usize) -> String> SecretSource for F {
    fn secret(&mut self, len: usize) -> String {
        self(len)
    }
}

/// Networking entries and environment for the requested plugins
///
/// Everything lands on the first container, which is the one the
/// controller exposes.
pub fn apply_plugins(spec: &mut FlowSpec, cuda_log_level: &str, secrets: &mut impl SecretSource) {
    let plugins = spec.plugins.clone();
    let mut networking = Vec::new();
    let Some(container) = spec.containers_mut().next() else {
        return;
    };
    let envs = container.env.get_or_insert_with(Vec::new);
    envs.push(env("LIBCUDA_LOG_LEVEL", cuda_log_level));
    envs.push(env("GPU_CORE_UTILIZATION_POLICY", "force"));
    for plugin in plugins {
        let (name, type_, protocol, port) = plugin.service();
        networking.push(Networking {
            name: name.to_string(),
            type_: type_.to_string(),
            protocol: protocol.to_string(),
            port,
            url: String::new(),
        });
        match plugin {
            PluginType::Ssh => envs.push(env("ROOT_PASSWORD", secrets.secret(15))),
            PluginType::Vscode => envs.push(env("ENABLE_CODE_SERVER", "true")),
            PluginType::Jupyter => {
                envs.push(env("ENABLE_JUPYTERLAB", "true"));
                envs.push(env("JUPYTER_TOKEN", secrets.secret(64)));
            }
        }
    }
    spec.networking = networking;
}

/// Scheduling tweaks some managed providers need
pub fn patch_for_provider(spec: &mut FlowSpec, provider: ClusterProvider, namespace: &str, name: &str) {
    match provider {
        ClusterProvider::AwsEks => {
            if let Some(pod) = spec.template.spec.as_mut() {
                pod.scheduler_name = Some("hami-scheduler".to_string());
            }
            let tag = format!("{}/{}", namespace, name);
            for c in spec.containers_mut() {
                if limits_any(c, &[AWS_NEURON, AWS_NEURON_CORE]) {
                    c.env
                        .get_or_insert_with(Vec::new)
                        .push(env("NEURON_PROCESS_TAG", tag.clone()));
                }
            }
        }
        ClusterProvider::GcpGke => {
            let wants_nvidia = spec
                .template
                .spec
                .as_ref()
                .is_some_and(|s| {
                    s.containers
                        .iter()
                        .any(|c| limits_any(c, &[NVIDIA_GPU, NVIDIA_GPU_CORES, NVIDIA_GPU_MEMORY]))
                });
            if let (true, Some(pod)) = (wants_nvidia, spec.template.spec.as_mut()) {
                pod.tolerations.get_or_insert_with(Vec::new).push(Toleration {
                    key: Some(NVIDIA_GPU.to_string()),
                    operator: Some("Equal".to_string()),
                    value: Some("present".to_string()),
                    effect: Some("NoSchedule".to_string()),
                    ..Default::default()
                });
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use serde_json::json;

    fn cond(type_: &str, status: &str) -> RawCondition {
        RawCondition {
            type_: type_.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    fn spec_with(limits: &[&str]) -> FlowSpec {
        let limits = limits
            .iter()
            .map(|k| (k.to_string(), Quantity("1".into())))
            .collect();
        FlowSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "main".into(),
                        resources: Some(ResourceRequirements {
                            limits: Some(limits),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_state_machine() {
        assert_eq!(flow_state(&[cond("Available", "True")], true), FlowState::Running);
        assert_eq!(
            flow_state(&[cond("Available", "False"), cond("Progressing", "True")], true),
            FlowState::Progressing
        );
        assert_eq!(
            flow_state(&[cond("Available", "False"), cond("Progressing", "False")], true),
            FlowState::Failed
        );
        assert_eq!(flow_state(&[], true), FlowState::Progressing);
        assert_eq!(flow_state(&[], false), FlowState::Unknown);
    }

    #[test]
    fn test_flow_is_running() {
        let running = json!({"status": {"conditions": [{"type": "Available", "status": "True"}]}});
        assert!(flow_is_running(&running));
        assert!(!flow_is_running(&json!({"metadata": {"name": "x"}})));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(FlowState::parse("").unwrap(), None);
        assert_eq!(FlowState::parse("running").unwrap(), Some(FlowState::Running));
        assert_eq!(
            FlowState::parse("KANTALOUPEFLOW_STATE_UNSPECIFIED").unwrap(),
            None
        );
        assert!(FlowState::parse("sleeping").is_err());
    }

    #[test]
    fn test_create_validation() {
        let mut req = CreateFlowRequest {
            metadata: ObjectMeta::namespaced("team-a", "train"),
            spec: Some(spec_with(&[])),
        };
        assert!(req.validate().is_ok());

        req.metadata.name = "1train".into();
        assert!(req.validate().is_err());

        req.metadata.name = "train".into();
        req.spec = Some(FlowSpec::default());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_plugins_add_networking_and_env() {
        let mut spec = spec_with(&[]);
        spec.plugins = vec![PluginType::Ssh, PluginType::Jupyter];
        let mut secrets = |n: usize| "x".repeat(n);
        apply_plugins(&mut spec, "2", &mut secrets);

        let names: Vec<&str> = spec.networking.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["sshd", "jupyter"]);
        let env = spec.containers_mut().next().unwrap().env.clone().unwrap();
        let root = env.iter().find(|e| e.name == "ROOT_PASSWORD").unwrap();
        assert_eq!(root.value.as_deref().map(str::len), Some(15));
        assert!(env.iter().any(|e| e.name == "LIBCUDA_LOG_LEVEL"));
    }

    #[test]
    fn test_provider_patches() {
        let mut spec = spec_with(&[NVIDIA_GPU_MEMORY]);
        patch_for_provider(&mut spec, ClusterProvider::GcpGke, "team-a", "train");
        let tolerations = spec.template.spec.as_ref().unwrap().tolerations.clone().unwrap();
        assert_eq!(tolerations[0].key.as_deref(), Some(NVIDIA_GPU));

        let mut spec = spec_with(&[AWS_NEURON]);
        patch_for_provider(&mut spec, ClusterProvider::AwsEks, "team-a", "train");
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.scheduler_name.as_deref(), Some("hami-scheduler"));
        let env = pod.containers[0].env.clone().unwrap();
        assert_eq!(env[0].value.as_deref(), Some("team-a/train"));

        let mut spec = spec_with(&[]);
        patch_for_provider(&mut spec, ClusterProvider::Generic, "team-a", "train");
        assert!(spec.template.spec.as_ref().unwrap().tolerations.is_none());
    }
}
