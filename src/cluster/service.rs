//! Cluster lifecycle and read-side enrichment

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::health::set_ready;
use super::kubeconfig;
use super::registry::{secret_name, ClusterEntry, ClusterRegistry};
use super::types::*;
use crate::aggregate::{ClusterOutcome, FanOut};
use crate::backend::{list_as, BackendFactory, ClusterBackend, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::gpu::{GpuFilter, GpuReading};
use crate::monitoring::{ClusterMetrics, Quantity, ResourceType, Scope};
use crate::resources::list::{ListOptions, ListQuery, Page};
use crate::resources::meta::ObjectMeta;
use crate::resources::node::is_ready as node_is_ready;
use crate::resources::quantity::parse_quantity;
use crate::resources::selector::LabelSelector;
use crate::validation;
use crate::workload::types::flow_is_running;

pub const HAMI_SCHEDULER_LABEL: (&str, &str) = ("app.kubernetes.io/component", "hami-scheduler");
pub const HAMI_NODE_REGISTER_PREFIX: &str = "hami.io/node-register-";

/// Filters of `GET /clusters` beyond the common list parameters
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ClusterFilters {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

pub struct ClusterService {
    registry: Arc<ClusterRegistry>,
    factory: Arc<dyn BackendFactory>,
    fanout: FanOut,
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|s| !s.is_empty())
}

fn check_gateway_address(address: &str) -> GatewayResult<()> {
    if let Some(address) = non_empty(address) {
        reqwest::Url::parse(address).map_err(|e| {
            GatewayError::invalid(format!("invalid gatewayAddress '{}': {}", address, e))
        })?;
    }
    Ok(())
}

fn percent(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total * 100.0
    }
}

impl ClusterService {
    pub fn new(registry: Arc<ClusterRegistry>, factory: Arc<dyn BackendFactory>, fanout: FanOut) -> Self {
        Self {
            registry,
            factory,
            fanout,
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn fanout(&self) -> FanOut {
        self.fanout
    }

    /// Backend of a registered cluster
    pub async fn backend(&self, cluster: &str) -> GatewayResult<Arc<dyn ClusterBackend>> {
        Ok(self.registry.get(cluster).await?.backend.clone())
    }

    /// Metrics bound to a registered cluster
    pub async fn metrics(&self, cluster: &str) -> GatewayResult<ClusterMetrics> {
        let entry = self.registry.get(cluster).await?;
        Ok(self.registry.metrics_for(&entry))
    }

    // ========================================================================
    // Integration
    // ========================================================================

    /// Connect and probe a kubeconfig, returning the backend and server version
    async fn connect(&self, name: &str, kubeconfig: &str) -> GatewayResult<(Arc<dyn ClusterBackend>, String)> {
        let backend = self
            .factory
            .connect(name, kubeconfig)
            .await
            .map_err(|e| match e {
                GatewayError::InvalidCredential(_) => e,
                other => GatewayError::InvalidCredential(other.message().to_string()),
            })?;
        let version = self
            .fanout
            .call(name, backend.server_version())
            .await
            .map_err(|e| {
                GatewayError::InvalidCredential(format!(
                    "cluster '{}' is not reachable with the given kubeconfig: {}",
                    name,
                    e.message()
                ))
            })?;
        Ok((backend, version))
    }

    async fn probe_prometheus(&self, address: &str) -> GatewayResult<()> {
        self.fanout
            .call(address, self.factory.probe_metrics(address))
            .await
            .map_err(|e| {
                GatewayError::invalid(format!(
                    "prometheusAddress '{}' is not healthy: {}",
                    address,
                    e.message()
                ))
            })
    }

    /// Validate, probe and register a new cluster
    ///
    /// Nothing is stored unless every check passes.
    pub async fn integrate(&self, req: IntegrateClusterRequest) -> GatewayResult<Cluster> {
        if req.kube_config.trim().is_empty() {
            return Err(GatewayError::invalid("kubeConfig must not be empty"));
        }
        validation::dns1035_label("cluster name", &req.name)?;
        validation::labels(&req.labels)?;
        validation::annotations(&req.annotations)?;
        let type_: ClusterType = parse_enum("type", req.type_.as_deref())?
            .ok_or_else(|| GatewayError::invalid("cluster type must be specified"))?;
        let provider: ClusterProvider = parse_enum("provider", req.provider.as_deref())?.unwrap_or_default();

        if self.registry.contains(&req.name).await {
            return Err(GatewayError::AlreadyExists(format!(
                "cluster '{}' already exists",
                req.name
            )));
        }

        let summary = kubeconfig::inspect(&req.kube_config).map_err(|e| match e {
            GatewayError::InvalidArgument(m) => GatewayError::InvalidCredential(m),
            other => other,
        })?;
        let (backend, version) = self.connect(&req.name, &req.kube_config).await?;

        let metrics = match non_empty(&req.prometheus_address) {
            Some(address) => {
                self.probe_prometheus(address).await?;
                Some(self.factory.metrics(address)?)
            }
            None => None,
        };
        check_gateway_address(&req.gateway_address)?;

        let kube_system = self
            .fanout
            .call(
                &req.name,
                backend.get(ResourceKind::Namespace, None, "kube-system"),
            )
            .await
            .map_err(|e| {
                GatewayError::InvalidCredential(format!(
                    "cannot read kube-system namespace of '{}': {}",
                    req.name,
                    e.message()
                ))
            })?;
        let kube_system_id = kube_system
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut annotations = req.annotations.clone();
        annotations.insert(ALIAS_ANNOTATION.to_string(), req.alias_name.clone());
        annotations.insert(DESCRIPTION_ANNOTATION.to_string(), req.description.clone());

        let mut status = ClusterStatus {
            kubernetes_version: version,
            kube_system_id,
            state: ClusterState::Running,
            ..Default::default()
        };
        set_ready(&mut status.conditions, true, "ClusterReady", "cluster is healthy");

        let entry = ClusterEntry {
            cluster: Cluster {
                metadata: ObjectMeta {
                    name: req.name.clone(),
                    uid: uuid::Uuid::new_v4().to_string(),
                    creation_timestamp: Some(Utc::now()),
                    labels: req.labels.clone(),
                    annotations,
                    ..Default::default()
                },
                spec: ClusterSpec {
                    provider,
                    type_: Some(type_),
                    api_endpoint: summary.server,
                    region: req.region.clone(),
                    zone: req.zone.clone(),
                    alias_name: req.alias_name.clone(),
                    description: req.description.clone(),
                    prometheus_address: req.prometheus_address.trim().to_string(),
                    gateway_address: req.gateway_address.trim().to_string(),
                },
                status,
            },
            secret_ref: secret_name(&req.name),
            kubeconfig_digest: kubeconfig::digest(&req.kube_config),
            backend,
            metrics,
            health: Default::default(),
        };

        let entry = self.registry.insert(entry, req.kube_config).await?;
        info!(cluster = %req.name, provider = ?provider, "Cluster integrated");
        Ok(entry.cluster.clone())
    }

    /// Side-effect-free reachability check of a kubeconfig
    pub async fn validate_kubeconfig(&self, kubeconfig: &str) -> ValidateKubeconfigResponse {
        let outcome = async {
            kubeconfig::inspect(kubeconfig)?;
            self.connect("kubeconfig-validation", kubeconfig).await
        }
        .await;
        match outcome {
            Ok((_, version)) => ValidateKubeconfigResponse {
                valid: true,
                message: format!("connected, Kubernetes {}", version),
            },
            Err(e) => ValidateKubeconfigResponse {
                valid: false,
                message: e.message().to_string(),
            },
        }
    }

    /// Merge a patch into a cluster
    pub async fn update(&self, name: &str, req: UpdateClusterRequest) -> GatewayResult<()> {
        let current = self.registry.get(name).await?;
        validation::labels(&req.labels)?;
        validation::annotations(&req.annotations)?;
        if let Some(expected) = req.resource_version.as_deref().filter(|v| !v.is_empty()) {
            if expected != current.resource_version() {
                return Err(GatewayError::Conflict(format!(
                    "cluster '{}' was modified; re-fetch it and retry",
                    name
                )));
            }
        }

        let mut new_kubeconfig = None;
        if let Some(kubeconfig) = non_empty(&req.kube_config) {
            let digest = kubeconfig::digest(kubeconfig);
            if digest != current.kubeconfig_digest {
                let (backend, version) = self.connect(name, kubeconfig).await?;
                new_kubeconfig = Some((kubeconfig.to_string(), digest, backend, version));
            }
        }

        let mut new_metrics = None;
        if let Some(address) = non_empty(&req.prometheus_address) {
            if address != current.cluster.spec.prometheus_address {
                self.probe_prometheus(address).await?;
                new_metrics = Some((address.to_string(), self.factory.metrics(address)?));
            }
        }
        check_gateway_address(&req.gateway_address)?;

        let stored_kubeconfig = new_kubeconfig.as_ref().map(|(k, ..)| k.clone());
        self.registry
            .update(name, req.resource_version.as_deref(), stored_kubeconfig, |entry| {
                let meta = &mut entry.cluster.metadata;
                meta.labels.extend(req.labels);
                meta.annotations.extend(req.annotations);
                let spec = &mut entry.cluster.spec;
                if let Some(alias) = non_empty(&req.alias_name) {
                    spec.alias_name = alias.to_string();
                    meta.annotations
                        .insert(ALIAS_ANNOTATION.to_string(), alias.to_string());
                }
                if let Some(description) = non_empty(&req.description) {
                    spec.description = description.to_string();
                    meta.annotations
                        .insert(DESCRIPTION_ANNOTATION.to_string(), description.to_string());
                }
                if let Some(gateway) = non_empty(&req.gateway_address) {
                    spec.gateway_address = gateway.to_string();
                }
                if let Some((address, source)) = new_metrics {
                    spec.prometheus_address = address;
                    entry.metrics = Some(source);
                }
                if let Some((_, digest, backend, version)) = new_kubeconfig {
                    entry.kubeconfig_digest = digest;
                    entry.backend = backend;
                    entry.cluster.status.kubernetes_version = version;
                }
                Ok(())
            })
            .await?;
        info!(cluster = %name, "Cluster updated");
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> GatewayResult<()> {
        self.registry.remove(name).await?;
        info!(cluster = %name, "Cluster removed");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Enriched cluster, including card and GPU memory totals
    pub async fn get(&self, name: &str) -> GatewayResult<Cluster> {
        let entry = self.registry.get(name).await?;
        let mut cluster = self.enrich(&entry).await;
        if cluster.is_ready() {
            let metrics = self.registry.metrics_for(&entry);
            let total = self
                .fanout
                .call(name, metrics.value(Scope::Cluster, Quantity::GpuMemTotal))
                .await;
            match total {
                Ok(total) => cluster.status.gpu_memory_total = total.unwrap_or(0.0),
                Err(e) => warn!(cluster = %name, "GPU memory total unavailable: {}", e),
            }
        }
        Ok(cluster)
    }

    pub async fn list(
        &self,
        query: &ListQuery,
        filters: &ClusterFilters,
        caller: Option<Duration>,
    ) -> GatewayResult<Page<Cluster>> {
        let options: ListOptions = query.to_options()?;
        let type_: Option<ClusterType> = parse_enum("type", filters.type_.as_deref())?;
        let state: Option<ClusterState> = parse_enum("state", filters.state.as_deref())?;
        let provider: Option<ClusterProvider> = parse_enum("provider", filters.provider.as_deref())?;

        let snapshot = self.registry.snapshot().await;
        let candidates: Vec<Cluster> = snapshot
            .entries()
            .map(|e| e.cluster.clone())
            .filter(|c| type_.is_none() || c.spec.type_ == type_)
            .filter(|c| state.map_or(true, |s| s == c.status.state))
            .filter(|c| provider.map_or(true, |p| p == c.spec.provider))
            .collect();
        let page = options.apply(candidates)?;

        // Clusters that miss the deadline are listed as stored
        let names: Vec<String> = page.items.iter().map(|c| c.metadata.name.clone()).collect();
        let fan_in = self
            .fanout
            .bounded_by(caller)
            .run(names, |name| {
                let snapshot = snapshot.clone();
                async move {
                    match snapshot.get(&name) {
                        Some(entry) => Ok(self.enrich(entry).await),
                        None => Err(GatewayError::NotFound(format!("cluster {}", name))),
                    }
                }
            })
            .await;
        let enriched: Vec<Cluster> = fan_in
            .outcomes
            .into_iter()
            .zip(page.items)
            .map(|((_, outcome), stored)| match outcome {
                ClusterOutcome::Ok(cluster) => cluster,
                ClusterOutcome::Err(_) => stored,
            })
            .collect();

        Ok(Page {
            items: enriched,
            pagination: page.pagination,
        })
    }

    /// Sorted, unique Kubernetes versions across clusters
    pub async fn versions(&self) -> ClusterVersions {
        let versions: BTreeSet<String> = self
            .registry
            .list()
            .await
            .iter()
            .map(|e| e.cluster.status.kubernetes_version.clone())
            .filter(|v| !v.is_empty())
            .collect();
        ClusterVersions {
            versions: versions.into_iter().collect(),
        }
    }

    /// Scheduling plugins detected on a cluster
    pub async fn plugins(&self, name: &str) -> GatewayResult<ClusterPlugins> {
        let backend = self.backend(name).await?;
        let selector = LabelSelector::matching(HAMI_SCHEDULER_LABEL.0, HAMI_SCHEDULER_LABEL.1);
        let pods = self
            .fanout
            .call(name, backend.list(ResourceKind::Pod, None, Some(&selector)))
            .await?;
        let mut plugins = Vec::new();
        if let Some(pod) = pods.first() {
            plugins.push(ClusterPlugin {
                name: "HAMI".to_string(),
                namespace: pod
                    .pointer("/metadata/namespace")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(ClusterPlugins { plugins })
    }

    /// Resource keys workloads use to request this cluster's accelerators
    pub async fn card_request_types(&self, name: &str) -> GatewayResult<CardRequestTypes> {
        let entry = self.registry.get(name).await?;
        let request_types = match entry.cluster.spec.type_ {
            Some(ClusterType::Nvidia) => vec![
                CardRequestType::uniform("NVIDIA GPU", &["nvidia.com/gpu"]),
                CardRequestType::uniform(
                    "NVIDIA vGPU",
                    &["nvidia.com/gpu", "nvidia.com/gpumem", "nvidia.com/gpucores"],
                ),
            ],
            Some(ClusterType::Metax) => vec![
                CardRequestType::uniform("MetaX GPU", &["metax-tech.com/gpu"]),
                CardRequestType::uniform(
                    "MetaX sGPU",
                    &["metax-tech.com/sgpu", "metax-tech.com/vmemory", "metax-tech.com/vcore"],
                ),
            ],
            Some(ClusterType::Neuron) => vec![
                CardRequestType::uniform("Neuron GPU", &["aws.amazon.com/neuron"]),
                CardRequestType::uniform("Neuron Core", &["aws.amazon.com/neuroncore"]),
            ],
            Some(ClusterType::Ascend) => {
                let models = self.ascend_models(&entry).await?;
                let npu = models
                    .iter()
                    .map(|m| ResourceName {
                        card_model: m.clone(),
                        resource_keys: vec![format!("huawei.com/{}", m)],
                    })
                    .collect();
                let vnpu = models
                    .iter()
                    .map(|m| ResourceName {
                        card_model: m.clone(),
                        resource_keys: vec![
                            format!("huawei.com/{}", m),
                            format!("huawei.com/{}-memory", m),
                        ],
                    })
                    .collect();
                vec![
                    CardRequestType {
                        request_type: "ASCEND NPU".to_string(),
                        resource_names: npu,
                    },
                    CardRequestType {
                        request_type: "ASCEND vNPU".to_string(),
                        resource_names: vnpu,
                    },
                ]
            }
            _ => Vec::new(),
        };
        Ok(CardRequestTypes { request_types })
    }

    async fn ascend_models(&self, entry: &ClusterEntry) -> GatewayResult<BTreeSet<String>> {
        let nodes: Vec<Node> = self
            .fanout
            .call(
                entry.name(),
                list_as(entry.backend.as_ref(), ResourceKind::Node, None, None),
            )
            .await?;
        Ok(nodes
            .iter()
            .filter_map(|n| n.metadata.annotations.as_ref())
            .flat_map(|a| a.keys())
            .filter_map(|k| k.strip_prefix(HAMI_NODE_REGISTER_PREFIX))
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect())
    }

    // ========================================================================
    // Enrichment
    // ========================================================================

    /// Stored view plus live summaries and usage; unready clusters are returned as stored
    pub async fn enrich(&self, entry: &ClusterEntry) -> Cluster {
        let mut cluster = entry.cluster.clone();
        if !cluster.is_ready() {
            return cluster;
        }
        let name = entry.name();
        let backend = entry.backend.as_ref();

        let (nodes, pods, flows) = futures::join!(
            self.fanout
                .call(name, list_as::<Node>(backend, ResourceKind::Node, None, None)),
            self.fanout
                .call(name, list_as::<Pod>(backend, ResourceKind::Pod, None, None)),
            self.fanout
                .call(name, backend.list(ResourceKind::KantaloupeFlow, None, None)),
        );
        let status = &mut cluster.status;
        match nodes {
            Ok(nodes) => {
                status.node_summary = ResourceSummary {
                    total_num: nodes.len() as i64,
                    ready_num: nodes.iter().filter(|n| node_is_ready(n)).count() as i64,
                };
                let (cpu, memory) = allocatable_totals(&nodes);
                status.cpu_total = cpu;
                status.memory_total = memory;
            }
            Err(e) => debug!(cluster = %name, "Node summary unavailable: {}", e),
        }
        match pods {
            Ok(pods) => {
                let running = pods
                    .iter()
                    .filter(|p| {
                        p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
                    })
                    .count();
                status.pod_summary = ResourceSummary {
                    total_num: pods.len() as i64,
                    ready_num: running as i64,
                };
            }
            Err(e) => debug!(cluster = %name, "Pod summary unavailable: {}", e),
        }
        match flows {
            Ok(flows) => {
                status.kantaloupeflow_summary = ResourceSummary {
                    total_num: flows.len() as i64,
                    ready_num: flows.iter().filter(|f| flow_is_running(f)).count() as i64,
                };
            }
            Err(e) => debug!(cluster = %name, "Kantaloupeflow summary unavailable: {}", e),
        }

        let metrics = self.registry.metrics_for(entry);
        if let Err(e) = self.fanout.call(name, fill_usage(&metrics, status)).await {
            warn!(cluster = %name, "Cluster usage unavailable: {}", e);
        }
        cluster
    }
}

/// Usage percentages and card count from the metrics backend
async fn fill_usage(metrics: &ClusterMetrics, status: &mut ClusterStatus) -> GatewayResult<()> {
    if !metrics.is_configured() {
        return Ok(());
    }
    for resource in [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::GpuCore,
        ResourceType::GpuMemory,
    ] {
        let q = resource.quantities()?;
        let total = match metrics.value(Scope::Cluster, q.total).await? {
            Some(total) if total != 0.0 => total,
            _ => continue,
        };
        let used = metrics.value(Scope::Cluster, q.used).await?.unwrap_or(0.0);
        let usage = percent(used, total);
        match resource {
            ResourceType::Cpu => status.cpu_usage = usage,
            ResourceType::Memory => status.memory_usage = usage,
            ResourceType::GpuCore | ResourceType::GpuMemory => {
                let allocated = metrics.value(Scope::Cluster, q.allocated).await?.unwrap_or(0.0);
                let allocated = percent(allocated, total);
                if resource == ResourceType::GpuCore {
                    status.gpu_core_usage = usage;
                    status.gpu_core_allocated = allocated;
                } else {
                    status.gpu_memory_usage = usage;
                    status.gpu_memory_allocated = allocated;
                }
            }
            _ => {}
        }
    }
    status.gpu_total = metrics
        .gpu_vector(GpuReading::Temp, &GpuFilter::default())
        .await?
        .len() as i64;
    Ok(())
}

/// Allocatable CPU cores and memory bytes summed over nodes
fn allocatable_totals(nodes: &[Node]) -> (f64, f64) {
    let mut totals = BTreeMap::new();
    for node in nodes {
        let Some(allocatable) = node.status.as_ref().and_then(|s| s.allocatable.as_ref()) else {
            continue;
        };
        for resource in ["cpu", "memory"] {
            if let Some(q) = allocatable.get(resource) {
                *totals.entry(resource).or_insert(0.0) += parse_quantity(&q.0).unwrap_or(0.0);
            }
        }
    }
    (
        totals.get("cpu").copied().unwrap_or(0.0),
        totals.get("memory").copied().unwrap_or(0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, StaticBackendFactory};
    use crate::monitoring::fixed::StaticMetrics;
    use serde_json::json;

    const SERVER: &str = "https://prod-1.example:6443";

    fn kubeconfig(server: &str) -> String {
        kubeconfig::render("prod-1", server, "token")
    }

    fn setup() -> (ClusterService, Arc<InMemoryBackend>, Arc<StaticMetrics>) {
        let factory = Arc::new(StaticBackendFactory::new());
        let backend = Arc::new(
            InMemoryBackend::new("prod-1", "v1.28.3")
                .with_object(
                    ResourceKind::Node,
                    json!({
                        "metadata": {"name": "n1", "annotations": {"hami.io/node-register-910B": "x"}},
                        "status": {
                            "allocatable": {"cpu": "8", "memory": "16Gi"},
                            "conditions": [{"type": "Ready", "status": "True"}]
                        }
                    }),
                )
                .with_object(
                    ResourceKind::Pod,
                    json!({
                        "metadata": {"name": "hami-scheduler-0", "namespace": "hami-system",
                                     "labels": {"app.kubernetes.io/component": "hami-scheduler"}},
                        "status": {"phase": "Running"}
                    }),
                ),
        );
        factory.add_cluster(SERVER, backend.clone());
        let metrics = Arc::new(
            StaticMetrics::new()
                .with_sample("kantaloupe_cluster_cpu_total", &[("cluster", "prod-1")], 8.0)
                .with_sample("kantaloupe_cluster_cpu_used", &[("cluster", "prod-1")], 2.0)
                .with_sample("kantaloupe_cluster_gpucore_total", &[("cluster", "prod-1")], 200.0)
                .with_sample("kantaloupe_cluster_gpucore_allocated", &[("cluster", "prod-1")], 50.0)
                .with_sample("kantaloupe_cluster_gpumem_total", &[("cluster", "prod-1")], 81920.0)
                .with_sample("kantaloupe_gpu_temp", &[("cluster", "prod-1"), ("UUID", "gpu-0")], 40.0)
                .with_sample("kantaloupe_gpu_temp", &[("cluster", "prod-1"), ("UUID", "gpu-1")], 41.0),
        );
        factory.add_metrics("http://prom:9090", metrics.clone());
        let registry = Arc::new(ClusterRegistry::new(None));
        (
            ClusterService::new(registry, factory, FanOut::default()),
            backend,
            metrics,
        )
    }

    fn request() -> IntegrateClusterRequest {
        IntegrateClusterRequest {
            name: "prod-1".into(),
            kube_config: kubeconfig(SERVER),
            provider: Some("GENERIC".into()),
            type_: Some("NVIDIA".into()),
            alias_name: "Production".into(),
            prometheus_address: "http://prom:9090".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_integrate_and_get() {
        let (service, _, _) = setup();
        let created = service.integrate(request()).await.unwrap();
        assert_eq!(created.metadata.annotations[ALIAS_ANNOTATION], "Production");
        assert_eq!(created.spec.api_endpoint, SERVER);

        let cluster = service.get("prod-1").await.unwrap();
        assert_eq!(cluster.metadata.name, "prod-1");
        assert_eq!(cluster.spec.provider, ClusterProvider::Generic);
        assert_eq!(cluster.status.kubernetes_version, "v1.28.3");
        assert_eq!(cluster.status.node_summary.ready_num, 1);
        assert_eq!(cluster.status.cpu_total, 8.0);
        assert_eq!(cluster.status.cpu_usage, 25.0);
        assert_eq!(cluster.status.memory_usage, 0.0);
        assert_eq!(cluster.status.gpu_core_allocated, 25.0);
        assert_eq!(cluster.status.gpu_total, 2);
        assert_eq!(cluster.status.gpu_memory_total, 81920.0);
    }

    #[tokio::test]
    async fn test_integrate_rejections() {
        let (service, _, metrics) = setup();

        let mut bad = request();
        bad.name = "Prod_1".into();
        assert!(matches!(service.integrate(bad).await, Err(GatewayError::InvalidArgument(_))));

        let mut bad = request();
        bad.type_ = None;
        assert!(matches!(service.integrate(bad).await, Err(GatewayError::InvalidArgument(_))));

        let mut bad = request();
        bad.kube_config = kubeconfig("https://nowhere:6443");
        assert!(matches!(service.integrate(bad).await, Err(GatewayError::InvalidCredential(_))));

        let mut bad = request();
        bad.kube_config = "{{not yaml".into();
        assert!(matches!(service.integrate(bad).await, Err(GatewayError::InvalidCredential(_))));

        metrics.set_healthy(false);
        assert!(matches!(
            service.integrate(request()).await,
            Err(GatewayError::InvalidArgument(_))
        ));
        metrics.set_healthy(true);

        let mut bad = request();
        bad.gateway_address = "::not a url".into();
        assert!(matches!(service.integrate(bad).await, Err(GatewayError::InvalidArgument(_))));

        // Nothing above left a trace.
        assert!(service.registry().list().await.is_empty());

        service.integrate(request()).await.unwrap();
        assert!(matches!(
            service.integrate(request()).await,
            Err(GatewayError::AlreadyExists(_))
        ));

        let mut same_cluster = request();
        same_cluster.name = "prod-2".into();
        assert!(matches!(
            service.integrate(same_cluster).await,
            Err(GatewayError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_kubeconfig_never_registers() {
        let (service, _, _) = setup();
        assert!(service.validate_kubeconfig(&kubeconfig(SERVER)).await.valid);
        let resp = service.validate_kubeconfig("garbage: [").await;
        assert!(!resp.valid);
        assert!(!service.validate_kubeconfig("").await.valid);
        assert!(service.registry().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_checks_version() {
        let (service, _, _) = setup();
        service.integrate(request()).await.unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        service
            .update(
                "prod-1",
                UpdateClusterRequest {
                    description: "primary".into(),
                    kube_config: kubeconfig(SERVER),
                    labels,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let cluster = service.get("prod-1").await.unwrap();
        assert_eq!(cluster.spec.description, "primary");
        assert_eq!(cluster.spec.alias_name, "Production");
        assert_eq!(cluster.metadata.labels["env"], "prod");

        let err = service
            .update(
                "prod-1",
                UpdateClusterRequest {
                    resource_version: Some("1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));

        let err = service
            .update(
                "prod-1",
                UpdateClusterRequest {
                    kube_config: kubeconfig("https://elsewhere:6443"),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_unready_cluster_is_not_enriched() {
        let (service, backend, _) = setup();
        service.integrate(request()).await.unwrap();
        service
            .registry()
            .update_status("prod-1", |e| {
                e.cluster.status.state = ClusterState::Unhealth;
                Ok(())
            })
            .await
            .unwrap();
        backend.set_available(false);

        let cluster = service.get("prod-1").await.unwrap();
        assert_eq!(cluster.status.node_summary, ResourceSummary::default());
        assert_eq!(cluster.status.gpu_total, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_pins_local_cluster() {
        let (service, _, _) = setup();
        service.integrate(request()).await.unwrap();
        let page = service
            .list(
                &ListQuery::default(),
                &ClusterFilters {
                    type_: Some("ASCEND".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 0);

        let page = service
            .list(&ListQuery::default(), &ClusterFilters::default(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].status.pod_summary.total_num, 1);
    }

    #[tokio::test]
    async fn test_list_falls_back_to_stored_view_past_deadline() {
        let registry = Arc::new(ClusterRegistry::new(None));
        for i in 0..6 {
            let name = format!("slow-{}", i);
            let backend = Arc::new(InMemoryBackend::new(&name, "v1.28.3").with_object(
                ResourceKind::Node,
                json!({"metadata": {"name": "n1"}}),
            ));
            backend.set_latency(Duration::from_millis(200));
            registry
                .insert(crate::cluster::registry::tests::entry_for(&name, backend), "cfg".into())
                .await
                .unwrap();
        }
        let fanout = FanOut {
            call_timeout: Duration::from_secs(1),
            deadline: Duration::from_millis(300),
            concurrency: 1,
        };
        let service = ClusterService::new(registry, Arc::new(StaticBackendFactory::new()), fanout);

        let started = std::time::Instant::now();
        let page = service
            .list(&ListQuery::default(), &ClusterFilters::default(), None)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(800));
        assert_eq!(page.items.len(), 6);
        // The first cluster answered in time, the rest are listed as stored
        let enriched = page
            .items
            .iter()
            .filter(|c| c.status.node_summary.total_num == 1)
            .count();
        assert_eq!(enriched, 1);
        assert!(page.items.iter().any(|c| c.status.node_summary == ResourceSummary::default()));

        // A tighter caller deadline wins over the configured one
        let started = std::time::Instant::now();
        let page = service
            .list(
                &ListQuery::default(),
                &ClusterFilters::default(),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(page.items.len(), 6);
        assert!(page.items.iter().all(|c| c.status.node_summary == ResourceSummary::default()));
    }

    #[tokio::test]
    async fn test_plugins_versions_and_request_types() {
        let (service, _, _) = setup();
        service.integrate(request()).await.unwrap();

        let plugins = service.plugins("prod-1").await.unwrap();
        assert_eq!(plugins.plugins[0].namespace, "hami-system");
        assert_eq!(service.versions().await.versions, vec!["v1.28.3"]);

        let types = service.card_request_types("prod-1").await.unwrap();
        assert_eq!(types.request_types.len(), 2);
        assert_eq!(types.request_types[1].resource_names[0].resource_keys.len(), 3);

        service.delete("prod-1").await.unwrap();
        assert!(matches!(service.delete("prod-1").await, Err(GatewayError::NotFound(_))));
    }
}
