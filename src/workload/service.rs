//! Kantaloupeflow operations

use std::sync::Arc;

use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{Pod, ResourceQuota as KubeResourceQuota};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gpu::{allocated_memory, bound_cards, metax_limits, pod_gpus};
use super::types::{
    apply_plugins, patch_for_provider, ConditionLine, CreateFlowRequest, FlowConditions, FlowDetail,
    FlowFilters, FlowObject, FlowState, Gpu, GpuMemoryRequest, Kantaloupeflow, WorkloadType,
    FLOW_POD_LABEL, POD_ALLOCATION_ANNOTATION,
};
use crate::backend::{encode, ResourceKind};
use crate::cluster::registry::ClusterEntry;
use crate::cluster::types::ClusterType;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::gpu::{card_uuid, GpuFilter, GpuReading};
use crate::monitoring::service::{Quantity, Scope};
use crate::monitoring::ClusterMetrics;
use crate::resources::core::EventFilters;
use crate::resources::meta::ObjectMeta;
use crate::resources::quantity::parse_quantity;
use crate::resources::quota::GPU_MEMORY_QUOTA_KEY;
use crate::resources::service::{check_namespace, filter_value};
use crate::resources::{LabelSelector, ListQuery, Page, ResourceService};
use crate::validation;

pub const DEFAULT_CUDA_LOG_LEVEL: &str = "2";

/// Random alphanumeric secret for plugin passwords and tokens
fn random_secret(len: usize) -> String {
    let mut out = String::with_capacity(len + 32);
    while out.len() < len {
        out.push_str(&Uuid::new_v4().simple().to_string());
    }
    out.truncate(len);
    out
}

/// Current size in the `requested,previous` allocation annotation
fn annotated_memory(raw: &str) -> GatewayResult<i64> {
    let parts: Vec<&str> = raw.split(',').collect();
    match parts.as_slice() {
        [current, _] => current.trim().parse().map_err(|_| {
            GatewayError::invalid(format!(
                "annotation {} has a non-numeric size '{}'",
                POD_ALLOCATION_ANNOTATION, current
            ))
        }),
        _ => Err(GatewayError::invalid(format!(
            "annotation {} must look like 'new,old', got '{}'",
            POD_ALLOCATION_ANNOTATION, raw
        ))),
    }
}

fn check_flow_name(name: &str) -> GatewayResult<()> {
    validation::dns1035_label("kantaloupeflow name", name)
}

pub struct FlowService {
    resources: Arc<ResourceService>,
    cuda_log_level: String,
}

impl FlowService {
    pub fn new(resources: Arc<ResourceService>) -> Self {
        Self {
            resources,
            cuda_log_level: DEFAULT_CUDA_LOG_LEVEL.to_string(),
        }
    }

    pub fn with_cuda_log_level(mut self, level: impl Into<String>) -> Self {
        self.cuda_log_level = level.into();
        self
    }

    /// Create a flow; the namespace comes from `metadata.namespace`
    pub async fn create(&self, cluster: &str, req: CreateFlowRequest) -> GatewayResult<Kantaloupeflow> {
        req.validate()?;
        let namespace = req
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| GatewayError::invalid("metadata.namespace is required"))?;
        check_namespace(&namespace)?;
        let entry = self.resources.entry(cluster).await?;

        let name = req.metadata.name.clone();
        let mut spec = req.spec.unwrap_or_default();
        spec.workload = WorkloadType::Deployment;
        apply_plugins(&mut spec, &self.cuda_log_level, &mut random_secret);
        patch_for_provider(&mut spec, entry.cluster.spec.provider, &namespace, &name);

        let metadata = ObjectMeta {
            name: name.clone(),
            namespace: Some(namespace.clone()),
            labels: req.metadata.labels,
            annotations: req.metadata.annotations,
            ..Default::default()
        };
        let object = encode(
            ResourceKind::KantaloupeFlow,
            &FlowObject {
                metadata: metadata.to_kube(),
                spec,
                status: None,
            },
        )?;
        let created = self
            .resources
            .call(
                cluster,
                entry
                    .backend
                    .create(ResourceKind::KantaloupeFlow, Some(&namespace), object),
            )
            .await?;
        info!(cluster = %cluster, namespace = %namespace, name = %name, "Created kantaloupeflow");
        let flow: FlowObject = serde_json::from_value(created)?;
        Ok(Kantaloupeflow::from_kube(&flow, cluster))
    }

    pub async fn get(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<FlowDetail> {
        check_namespace(namespace)?;
        check_flow_name(name)?;
        let entry = self.resources.entry(cluster).await?;
        let flow: FlowObject = self
            .resources
            .get_typed(cluster, ResourceKind::KantaloupeFlow, Some(namespace), name)
            .await?;
        let mut kantaloupeflow = Kantaloupeflow::from_kube(&flow, cluster);
        let (gpus, node) = self.flow_gpus(&entry, namespace, name).await?;
        kantaloupeflow.status.gpus = gpus;
        Ok(FlowDetail { kantaloupeflow, node })
    }

    /// Flows of a namespace, or of every namespace when `namespace` is `None`
    pub async fn list(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        query: &ListQuery,
        filters: &FlowFilters,
    ) -> GatewayResult<Page<Kantaloupeflow>> {
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let options = query.to_options()?.with_default_sort("creationTimestamp", true);
        let state = filter_value(filters.status.as_deref())
            .map(FlowState::parse)
            .transpose()?
            .flatten();

        let entry = self.resources.entry(cluster).await?;
        let flows: Vec<FlowObject> = self
            .resources
            .list_typed(cluster, ResourceKind::KantaloupeFlow, namespace, None)
            .await?;
        let items = flows
            .iter()
            .map(|f| Kantaloupeflow::from_kube(f, cluster))
            .filter(|f| state.map_or(true, |s| f.status.state == s))
            .collect();
        let mut page = options.apply(items)?;

        // Only the page's flows get their pods looked up
        let bound = try_join_all(page.items.iter().map(|f| {
            let ns = f.metadata.namespace.clone().unwrap_or_default();
            let name = f.metadata.name.clone();
            let entry = entry.clone();
            async move { self.flow_gpus(&entry, &ns, &name).await }
        }))
        .await?;
        for (flow, (gpus, _)) in page.items.iter_mut().zip(bound) {
            flow.status.gpus = gpus;
        }
        Ok(page)
    }

    /// Request deletion; the controller tears the flow down asynchronously
    pub async fn delete(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<()> {
        check_namespace(namespace)?;
        check_flow_name(name)?;
        self.resources
            .delete_object(cluster, ResourceKind::KantaloupeFlow, Some(namespace), name)
            .await?;
        info!(cluster = %cluster, namespace = %namespace, name = %name, "Kantaloupeflow deletion accepted");
        Ok(())
    }

    /// Resize the GPU memory of a running flow in place
    ///
    /// The new size must fit on every card the pod is bound to and inside
    /// the namespace's GPU memory quota once the flow's current share is
    /// given back. The write carries the flow's resourceVersion, so a
    /// concurrent change fails with `Conflict`.
    pub async fn update_gpu_memory(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        req: &GpuMemoryRequest,
    ) -> GatewayResult<()> {
        check_namespace(namespace)?;
        check_flow_name(name)?;
        if req.gpumemory <= 0 {
            return Err(GatewayError::invalid(format!(
                "gpumemory must be greater than 0, got {}",
                req.gpumemory
            )));
        }
        let requested = req.gpumemory;

        let backend = self.resources.backend(cluster).await?;
        let mut object = self
            .resources
            .call(
                cluster,
                backend.get(ResourceKind::KantaloupeFlow, Some(namespace), name),
            )
            .await?;
        let flow: FlowObject = serde_json::from_value(object.clone())?;
        let pod = self.first_pod(cluster, namespace, name).await?;

        let annotated = flow
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(POD_ALLOCATION_ANNOTATION));
        let current = match annotated {
            Some(raw) => annotated_memory(raw)?,
            None => pod
                .as_ref()
                .map(allocated_memory)
                .transpose()?
                .flatten()
                .unwrap_or(0),
        };

        if let Some(pod) = &pod {
            self.check_cards(cluster, pod, current, requested).await?;
        }
        self.check_quota(cluster, namespace, current, requested).await?;

        let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) else {
            return Err(GatewayError::Internal(format!(
                "kantaloupeflow '{}' has no metadata",
                name
            )));
        };
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| json!({}));
        if !annotations.is_object() {
            *annotations = json!({});
        }
        annotations[POD_ALLOCATION_ANNOTATION] = json!(format!("{},{}", requested, current));

        self.resources
            .call(
                cluster,
                backend.replace(ResourceKind::KantaloupeFlow, Some(namespace), name, object),
            )
            .await?;
        info!(
            cluster = %cluster,
            namespace = %namespace,
            name = %name,
            from = current,
            to = requested,
            "Resized kantaloupeflow GPU memory"
        );
        Ok(())
    }

    /// The flow's conditions followed by its latest event
    pub async fn conditions(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<FlowConditions> {
        check_namespace(namespace)?;
        check_flow_name(name)?;
        let flow: FlowObject = self
            .resources
            .get_typed(cluster, ResourceKind::KantaloupeFlow, Some(namespace), name)
            .await?;
        let mut conditions: Vec<ConditionLine> = flow
            .status
            .map(|s| s.conditions)
            .unwrap_or_default()
            .into_iter()
            .map(|c| ConditionLine {
                type_: c.type_,
                status: c.status,
                message: c.message,
            })
            .collect();

        let latest = ListQuery {
            page_size: Some("1".to_string()),
            ..Default::default()
        };
        let filters = EventFilters {
            kind: None,
            kind_name: Some(name.to_string()),
        };
        let events = self
            .resources
            .list_events(cluster, Some(namespace), &latest, &filters)
            .await?;
        if let Some(event) = events.items.into_iter().next() {
            conditions.push(ConditionLine {
                type_: event.type_,
                status: event.reason,
                message: event.message,
            });
        }
        Ok(FlowConditions { conditions })
    }

    async fn first_pod(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<Option<Pod>> {
        let selector = LabelSelector::matching(FLOW_POD_LABEL, name);
        let pods: Vec<Pod> = self
            .resources
            .list_typed(cluster, ResourceKind::Pod, Some(namespace), Some(&selector))
            .await?;
        Ok(pods.into_iter().next())
    }

    /// GPUs bound to the flow's first pod and the node it runs on
    async fn flow_gpus(
        &self,
        entry: &ClusterEntry,
        namespace: &str,
        name: &str,
    ) -> GatewayResult<(Vec<Gpu>, String)> {
        let cluster = entry.name();
        let Some(pod) = self.first_pod(cluster, namespace, name).await? else {
            return Ok((Vec::new(), String::new()));
        };
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        let metrics = self.resources.clusters().registry().metrics_for(entry);
        let cluster_type = entry.cluster.spec.type_;

        let gpus = match cluster_type {
            Some(ClusterType::Metax) => {
                self.metax_gpus(&metrics, &pod, namespace, name).await?
            }
            _ => {
                let mut gpus = match pod_gpus(&pod, cluster_type) {
                    Ok(gpus) => gpus,
                    Err(e) => {
                        warn!(cluster = %cluster, namespace = %namespace, name = %name, error = %e, "Ignoring unreadable device allocation");
                        Vec::new()
                    }
                };
                if cluster_type == Some(ClusterType::Nvidia) {
                    for gpu in gpus.iter_mut() {
                        gpu.model = self.card_model(&metrics, &gpu.uuid).await?;
                    }
                }
                gpus
            }
        };
        Ok((gpus, node))
    }

    async fn card_model(&self, metrics: &ClusterMetrics, uuid: &str) -> GatewayResult<String> {
        let samples = self
            .resources
            .call(
                metrics.cluster(),
                metrics.gpu_vector(GpuReading::MemTotal, &GpuFilter::uuid(uuid)),
            )
            .await?;
        Ok(samples
            .iter()
            .find_map(|s| s.label("modelName"))
            .unwrap_or_default()
            .to_string())
    }

    /// MetaX pods name no card; the card comes from the workload's usage series
    async fn metax_gpus(
        &self,
        metrics: &ClusterMetrics,
        pod: &Pod,
        namespace: &str,
        name: &str,
    ) -> GatewayResult<Vec<Gpu>> {
        let samples = self
            .resources
            .call(
                metrics.cluster(),
                metrics.vector(Scope::Workload { namespace, name }, Quantity::GpuMemUsed),
            )
            .await?;
        let (memory, core) = metax_limits(pod);
        Ok(samples
            .iter()
            .filter_map(|s| {
                card_uuid(s).map(|uuid| Gpu {
                    uuid: uuid.to_string(),
                    model: s.label("modelName").unwrap_or_default().to_string(),
                    memory,
                    core,
                })
            })
            .collect())
    }

    async fn check_cards(&self, cluster: &str, pod: &Pod, current: i64, requested: i64) -> GatewayResult<()> {
        for uuid in bound_cards(pod)? {
            let card = match self.resources.get_accelerator_card(cluster, &uuid).await {
                Ok(card) => card,
                Err(GatewayError::NotFound(_)) => {
                    warn!(cluster = %cluster, uuid = %uuid, "Bound card has no metrics, skipping capacity check");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let after = card.gpu_memory_allocated - current as f64 + requested as f64;
            debug!(uuid = %uuid, after, allocatable = card.gpu_memory_allocatable, "Card capacity check");
            if after > card.gpu_memory_allocatable {
                return Err(GatewayError::ResourceExceeded(format!(
                    "card {} cannot fit {}MiB: {}MiB of {}MiB would be allocated",
                    uuid, requested, after, card.gpu_memory_allocatable
                )));
            }
        }
        Ok(())
    }

    async fn check_quota(&self, cluster: &str, namespace: &str, current: i64, requested: i64) -> GatewayResult<()> {
        let quotas: Vec<KubeResourceQuota> = self
            .resources
            .list_typed(cluster, ResourceKind::ResourceQuota, Some(namespace), None)
            .await?;
        for rq in &quotas {
            let Some(hard) = rq
                .spec
                .as_ref()
                .and_then(|s| s.hard.as_ref())
                .and_then(|h| h.get(GPU_MEMORY_QUOTA_KEY))
            else {
                continue;
            };
            let hard = parse_quantity(&hard.0)?;
            let used = match rq
                .status
                .as_ref()
                .and_then(|s| s.used.as_ref())
                .and_then(|u| u.get(GPU_MEMORY_QUOTA_KEY))
            {
                Some(q) => parse_quantity(&q.0)?,
                None => 0.0,
            };
            let after = used - current as f64 + requested as f64;
            if after > hard {
                return Err(GatewayError::ResourceExceeded(format!(
                    "quota '{}' in namespace '{}' allows {} of {}, {} requested",
                    rq.metadata.name.as_deref().unwrap_or_default(),
                    namespace,
                    hard,
                    GPU_MEMORY_QUOTA_KEY,
                    after
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FanOut;
    use crate::backend::{InMemoryBackend, StaticBackendFactory};
    use crate::cluster::registry::tests::entry_for;
    use crate::cluster::registry::ClusterRegistry;
    use crate::cluster::service::ClusterService;
    use crate::monitoring::fixed::StaticMetrics;
    use crate::monitoring::MetricsSource;
    use crate::workload::gpu::NVIDIA_ALLOCATED_ANNOTATION;
    use crate::workload::types::PluginType;

    async fn flows_with(
        backend: Arc<InMemoryBackend>,
        metrics: Option<Arc<StaticMetrics>>,
        cluster_type: Option<ClusterType>,
    ) -> FlowService {
        let registry = Arc::new(ClusterRegistry::new(None));
        let mut entry = entry_for("c1", backend);
        entry.metrics = metrics.map(|m| m as Arc<dyn MetricsSource>);
        entry.cluster.spec.type_ = cluster_type;
        registry.insert(entry, "kubeconfig".into()).await.unwrap();
        let clusters = ClusterService::new(
            registry,
            Arc::new(StaticBackendFactory::new()),
            FanOut::default(),
        );
        FlowService::new(Arc::new(ResourceService::new(Arc::new(clusters))))
    }

    fn flow(name: &str, annotations: Value, conditions: Value) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "team-a", "annotations": annotations},
            "spec": {"template": {"spec": {"containers": [{"name": "main", "image": "cuda:12"}]}}},
            "status": {"replicas": 1, "readyReplicas": 1, "conditions": conditions}
        })
    }

    fn running() -> Value {
        json!([
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "True"}
        ])
    }

    fn pod(flow: &str, allocation: &str) -> Value {
        json!({
            "metadata": {
                "name": format!("{}-0", flow),
                "namespace": "team-a",
                "labels": {FLOW_POD_LABEL: flow},
                "annotations": {NVIDIA_ALLOCATED_ANNOTATION: allocation}
            },
            "spec": {"nodeName": "gpu-node-1", "containers": [{"name": "main"}]}
        })
    }

    fn card_metrics(uuid: &str, total: f64, allocated: f64) -> StaticMetrics {
        let labels = [("cluster", "c1"), ("UUID", uuid), ("modelName", "A100"), ("node", "gpu-node-1")];
        StaticMetrics::new()
            .with_sample(&GpuReading::Temp.metric(), &labels, 40.0)
            .with_sample(&GpuReading::MemTotal.metric(), &labels, total)
            .with_sample(&GpuReading::MemAllocated.metric(), &labels, allocated)
    }

    fn create_request(name: &str) -> CreateFlowRequest {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "team-a"},
            "spec": {
                "plugins": ["ssh", "jupyter"],
                "template": {"spec": {"containers": [{"name": "main", "image": "cuda:12"}]}}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_defaults_spec() {
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        let flows = flows_with(backend.clone(), None, None).await;

        let created = flows.create("c1", create_request("train")).await.unwrap();
        assert_eq!(created.metadata.name, "train");
        assert_eq!(created.spec.workload, WorkloadType::Deployment);
        assert_eq!(created.spec.plugins, vec![PluginType::Ssh, PluginType::Jupyter]);

        let stored = backend
            .object(ResourceKind::KantaloupeFlow, Some("team-a"), "train")
            .unwrap();
        assert_eq!(stored["spec"]["networking"].as_array().unwrap().len(), 2);
        let envs = stored["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap();
        let token = envs.iter().find(|e| e["name"] == "JUPYTER_TOKEN").unwrap();
        assert_eq!(token["value"].as_str().unwrap().len(), 64);

        let dup = flows.create("c1", create_request("train")).await;
        assert!(matches!(dup, Err(GatewayError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let backend = Arc::new(InMemoryBackend::new("c1", "v1.28.3"));
        let flows = flows_with(backend, None, None).await;

        let mut req = create_request("train");
        req.metadata.namespace = None;
        assert!(matches!(
            flows.create("c1", req).await,
            Err(GatewayError::InvalidArgument(_))
        ));

        let req = create_request("Train_1");
        assert!(matches!(
            flows.create("c1", req).await,
            Err(GatewayError::InvalidArgument(_))
        ));

        assert!(matches!(
            flows.create("missing", create_request("train")).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_reports_gpus_and_node() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(ResourceKind::Pod, pod("train", "GPU-a,NVIDIA,4096,30:;")),
        );
        let metrics = Arc::new(card_metrics("GPU-a", 81920.0, 4096.0));
        let flows = flows_with(backend, Some(metrics), Some(ClusterType::Nvidia)).await;

        let detail = flows.get("c1", "team-a", "train").await.unwrap();
        assert_eq!(detail.node, "gpu-node-1");
        assert_eq!(detail.kantaloupeflow.status.state, FlowState::Running);
        let gpus = &detail.kantaloupeflow.status.gpus;
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].model, "A100");
        assert_eq!(gpus[0].memory, 4096);

        assert!(matches!(
            flows.get("c1", "team-a", "absent").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(
                    ResourceKind::KantaloupeFlow,
                    flow("broken", json!({}), json!([{"type": "ReplicaFailure", "status": "True"}])),
                ),
        );
        let flows = flows_with(backend, None, None).await;

        let all = flows
            .list("c1", Some("team-a"), &ListQuery::default(), &FlowFilters::default())
            .await
            .unwrap();
        assert_eq!(all.pagination.total, 2);

        let running_only = flows
            .list(
                "c1",
                None,
                &ListQuery::default(),
                &FlowFilters {
                    status: Some("KANTALOUPEFLOW_STATE_RUNNING".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(running_only.items.len(), 1);
        assert_eq!(running_only.items[0].metadata.name, "train");

        let bad = flows
            .list(
                "c1",
                None,
                &ListQuery::default(),
                &FlowFilters {
                    status: Some("SLEEPING".to_string()),
                },
            )
            .await;
        assert!(matches!(bad, Err(GatewayError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_update_gpu_memory_writes_annotation() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(ResourceKind::Pod, pod("train", "GPU-a,NVIDIA,4096,30:;")),
        );
        let metrics = Arc::new(card_metrics("GPU-a", 16384.0, 4096.0));
        let flows = flows_with(backend.clone(), Some(metrics), Some(ClusterType::Nvidia)).await;

        flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 8192 })
            .await
            .unwrap();
        let stored = backend
            .object(ResourceKind::KantaloupeFlow, Some("team-a"), "train")
            .unwrap();
        assert_eq!(
            stored["metadata"]["annotations"][POD_ALLOCATION_ANNOTATION],
            "8192,4096"
        );

        // A second resize starts from the annotated size
        flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 2048 })
            .await
            .unwrap();
        let stored = backend
            .object(ResourceKind::KantaloupeFlow, Some("team-a"), "train")
            .unwrap();
        assert_eq!(
            stored["metadata"]["annotations"][POD_ALLOCATION_ANNOTATION],
            "2048,8192"
        );
    }

    #[tokio::test]
    async fn test_update_gpu_memory_over_capacity() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(ResourceKind::Pod, pod("train", "GPU-a,NVIDIA,4096,30:;")),
        );
        let metrics = Arc::new(card_metrics("GPU-a", 16384.0, 12288.0));
        let flows = flows_with(backend.clone(), Some(metrics), Some(ClusterType::Nvidia)).await;

        let err = flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 9000 })
            .await;
        assert!(matches!(err, Err(GatewayError::ResourceExceeded(_))));
        let stored = backend
            .object(ResourceKind::KantaloupeFlow, Some("team-a"), "train")
            .unwrap();
        assert!(stored["metadata"]["annotations"]
            .get(POD_ALLOCATION_ANNOTATION)
            .is_none());

        let zero = flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 0 })
            .await;
        assert!(matches!(zero, Err(GatewayError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_update_gpu_memory_respects_quota() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(
                    ResourceKind::ResourceQuota,
                    json!({
                        "metadata": {"name": "gpu", "namespace": "team-a"},
                        "spec": {"hard": {GPU_MEMORY_QUOTA_KEY: "10000"}},
                        "status": {"used": {GPU_MEMORY_QUOTA_KEY: "6000"}}
                    }),
                ),
        );
        let flows = flows_with(backend, None, None).await;

        // No pod yet, so the flow holds nothing and 4000 is the headroom
        flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 4000 })
            .await
            .unwrap();
        let err = flows
            .update_gpu_memory("c1", "team-a", "train", &GpuMemoryRequest { gpumemory: 9000 })
            .await;
        assert!(matches!(err, Err(GatewayError::ResourceExceeded(_))));
    }

    #[tokio::test]
    async fn test_conditions_append_latest_event() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running()))
                .with_object(
                    ResourceKind::Event,
                    json!({
                        "metadata": {"name": "train.1", "namespace": "team-a"},
                        "involvedObject": {"kind": "KantaloupeFlow", "name": "train", "namespace": "team-a"},
                        "reason": "Scheduled",
                        "message": "pod scheduled",
                        "type": "Normal",
                        "lastTimestamp": "2026-01-01T00:00:00Z"
                    }),
                ),
        );
        let flows = flows_with(backend, None, None).await;

        let got = flows.conditions("c1", "team-a", "train").await.unwrap();
        assert_eq!(got.conditions.len(), 3);
        let last = &got.conditions[2];
        assert_eq!(last.type_, "Normal");
        assert_eq!(last.status, "Scheduled");
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = Arc::new(
            InMemoryBackend::new("c1", "v1.28.3")
                .with_object(ResourceKind::KantaloupeFlow, flow("train", json!({}), running())),
        );
        let flows = flows_with(backend.clone(), None, None).await;
        flows.delete("c1", "team-a", "train").await.unwrap();
        assert!(backend
            .object(ResourceKind::KantaloupeFlow, Some("team-a"), "train")
            .is_none());
        assert!(matches!(
            flows.delete("c1", "team-a", "train").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn test_annotated_memory() {
        assert_eq!(annotated_memory("8192,4096").unwrap(), 8192);
        assert!(annotated_memory("8192").is_err());
        assert!(annotated_memory("lots,1").is_err());
        assert_eq!(random_secret(64).len(), 64);
    }
}
