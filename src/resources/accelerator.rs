//! Accelerator cards
//!
//! Cards have no Kubernetes object of their own. A card exists when the
//! metrics backend exports a temperature sample for it; every other field
//! is joined in by UUID, then decorated with the hosting node's addresses
//! and memory factor.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Node as KubeNode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::list::{fuzzy_regex, ListQuery, Listable, Page, SortKey};
use super::node::{memory_factor, NodeAddress};
use super::service::{filter_value, ResourceService};
use crate::backend::ResourceKind;
use crate::cluster::types::{wire_name, ClusterProvider, ClusterType};
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::gpu::{CardReading, GpuFilter, GpuReading};

/// HAMi's record of an NVIDIA node, `uuid,split,memory,...`
pub const NVIDIA_REGISTER_ANNOTATION: &str = "hami.io/node-nvidia-register";
/// MetaX cards are always shared by at most this many workloads
pub const METAX_WORKLOAD_LIMIT: i64 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    #[default]
    Health,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorCard {
    pub uuid: String,
    pub node: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ClusterProvider>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<ClusterType>,
    pub state: CardState,
    pub temperature: f64,
    pub power: f64,
    pub node_addresses: Vec<NodeAddress>,
    pub gpu_core_total: f64,
    pub gpu_core_allocated: f64,
    pub gpu_core_usage: f64,
    pub gpu_memory_total: f64,
    pub gpu_memory_allocatable: f64,
    pub gpu_memory_allocated: f64,
    pub gpu_memory_usage: f64,
    pub workload_limit: i64,
}

impl From<CardReading> for AcceleratorCard {
    fn from(r: CardReading) -> Self {
        let allocatable = r.mem_total.unwrap_or(0.0);
        Self {
            uuid: r.uuid,
            node: r.node,
            model: r.model,
            state: if r.errors > 0.0 {
                CardState::Error
            } else {
                CardState::Health
            },
            temperature: r.temperature,
            power: r.power,
            gpu_core_total: r.core_total.unwrap_or(0.0),
            gpu_core_allocated: r.core_allocated,
            gpu_core_usage: r.core_used,
            gpu_memory_total: allocatable,
            gpu_memory_allocatable: allocatable,
            gpu_memory_allocated: r.mem_allocated,
            gpu_memory_usage: r.mem_used,
            ..Default::default()
        }
    }
}

impl AcceleratorCard {
    fn decorate(&mut self, node: &KubeNode) {
        let annotations = node.metadata.annotations.clone().unwrap_or_default();
        self.gpu_memory_total = (self.gpu_memory_allocatable / memory_factor(&annotations)).trunc();
        self.node_addresses = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .map(|addrs| {
                addrs
                    .iter()
                    .filter(|a| a.type_ != "Hostname")
                    .map(|a| NodeAddress {
                        type_: a.type_.clone(),
                        address: a.address.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
    }
}

impl Listable for AcceleratorCard {
    const FIELDS: &'static [&'static str] = &[
        "name",
        "uuid",
        "node",
        "model",
        "state",
        "temperature",
        "power",
        "gpuCoreTotal",
        "gpuCoreAllocated",
        "gpuCoreUsage",
        "gpuMemoryTotal",
        "gpuMemoryAllocatable",
        "gpuMemoryAllocated",
        "gpuMemoryUsage",
    ];

    fn name(&self) -> &str {
        &self.uuid
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "name" | "uuid" => SortKey::from(self.uuid.as_str()),
            "node" => SortKey::from(self.node.as_str()),
            "model" => SortKey::from(self.model.as_str()),
            "state" => SortKey::from(wire_name(&self.state)),
            "temperature" => SortKey::from(self.temperature),
            "power" => SortKey::from(self.power),
            "gpuCoreTotal" => SortKey::from(self.gpu_core_total),
            "gpuCoreAllocated" => SortKey::from(self.gpu_core_allocated),
            "gpuCoreUsage" => SortKey::from(self.gpu_core_usage),
            "gpuMemoryTotal" => SortKey::from(self.gpu_memory_total),
            "gpuMemoryAllocatable" => SortKey::from(self.gpu_memory_allocatable),
            "gpuMemoryAllocated" => SortKey::from(self.gpu_memory_allocated),
            "gpuMemoryUsage" => SortKey::from(self.gpu_memory_usage),
            _ => SortKey::Null,
        }
    }
}

/// Filters of `GET .../acceleratorcards`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcceleratorFilters {
    /// Fuzzy UUID match
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelNames {
    pub model_names: Vec<String>,
}

fn parse_state(raw: &str) -> GatewayResult<CardState> {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.trim_start_matches("ACCELERATORCARD_STATE_") {
        "HEALTH" => Ok(CardState::Health),
        "ERROR" => Ok(CardState::Error),
        _ => Err(GatewayError::invalid(format!("unknown card state '{}'", raw))),
    }
}

/// How many workloads may share one card on `node`
pub fn workload_limit(node: &KubeNode, cluster_type: Option<ClusterType>) -> GatewayResult<i64> {
    if cluster_type == Some(ClusterType::Metax) {
        return Ok(METAX_WORKLOAD_LIMIT);
    }
    let Some(register) = node
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(NVIDIA_REGISTER_ANNOTATION))
    else {
        return Ok(0);
    };
    let fields: Vec<&str> = register.split(',').collect();
    if fields.len() < 2 {
        debug!(annotation = %register, "Malformed GPU register annotation");
        return Ok(0);
    }
    fields[1].trim().parse::<i64>().map_err(|_| {
        GatewayError::Internal(format!(
            "node '{}' has a non-numeric split count in {}",
            node.metadata.name.as_deref().unwrap_or_default(),
            NVIDIA_REGISTER_ANNOTATION
        ))
    })
}

impl ResourceService {
    async fn nodes_by_name(&self, cluster: &str) -> GatewayResult<BTreeMap<String, KubeNode>> {
        let nodes: Vec<KubeNode> = self
            .list_typed(cluster, ResourceKind::Node, None, None)
            .await?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| n.metadata.name.clone().map(|name| (name, n)))
            .collect())
    }

    pub async fn list_accelerator_cards(
        &self,
        cluster: &str,
        query: &ListQuery,
        filters: &AcceleratorFilters,
    ) -> GatewayResult<Page<AcceleratorCard>> {
        let options = query.to_options()?;
        let uuid = filter_value(filters.uuid.as_deref()).map(fuzzy_regex).transpose()?;
        let state = filter_value(filters.state.as_deref())
            .map(parse_state)
            .transpose()?;
        let gpu_filter = GpuFilter {
            node: filter_value(filters.node.as_deref()).map(str::to_string),
            model: filter_value(filters.model.as_deref()).map(str::to_string),
            ..Default::default()
        };

        let metrics = self.metrics(cluster).await?;
        let readings = self
            .call(cluster, metrics.cards(GpuReading::Temp, &gpu_filter))
            .await?;
        let nodes = self.nodes_by_name(cluster).await?;

        let cards: Vec<AcceleratorCard> = readings
            .into_iter()
            .map(AcceleratorCard::from)
            .filter(|c| uuid.as_ref().map_or(true, |re| re.is_match(&c.uuid)))
            .filter(|c| state.map_or(true, |s| c.state == s))
            .map(|mut card| {
                if let Some(node) = nodes.get(&card.node) {
                    card.decorate(node);
                }
                card
            })
            .collect();
        options.apply(cards)
    }

    pub async fn get_accelerator_card(&self, cluster: &str, uuid: &str) -> GatewayResult<AcceleratorCard> {
        let entry = self.entry(cluster).await?;
        let metrics = self.clusters().registry().metrics_for(&entry);
        let reading = self
            .call(cluster, metrics.cards(GpuReading::Temp, &GpuFilter::uuid(uuid)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found("accelerator card", uuid))?;

        let mut card = AcceleratorCard::from(reading);
        card.provider = Some(entry.cluster.spec.provider);
        card.type_ = entry.cluster.spec.type_;
        if card.node.is_empty() {
            return Ok(card);
        }
        match self
            .get_typed::<KubeNode>(cluster, ResourceKind::Node, None, &card.node)
            .await
        {
            Ok(node) => {
                card.decorate(&node);
                card.workload_limit = workload_limit(&node, card.type_)?;
            }
            Err(GatewayError::NotFound(_)) => {
                warn!(cluster = %cluster, node = %card.node, "Card reports a node that no longer exists")
            }
            Err(e) => return Err(e),
        }
        Ok(card)
    }

    /// Distinct card models seen by the metrics backend, sorted
    pub async fn list_model_names(&self, cluster: &str) -> GatewayResult<ModelNames> {
        let metrics = self.metrics(cluster).await?;
        let samples = self
            .call(
                cluster,
                metrics.gpu_vector(GpuReading::Temp, &GpuFilter::default()),
            )
            .await?;
        let names: BTreeSet<String> = samples
            .iter()
            .filter_map(|s| s.label("modelName"))
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        Ok(ModelNames {
            model_names: names.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::monitoring::fixed::StaticMetrics;
    use crate::resources::service::tests::service_with;
    use serde_json::json;
    use std::sync::Arc;

    fn labels<'a>(uuid: &'a str, node: &'a str, model: &'a str) -> [(&'a str, &'a str); 4] {
        [("cluster", "c1"), ("UUID", uuid), ("node", node), ("modelName", model)]
    }

    fn metrics() -> Arc<StaticMetrics> {
        Arc::new(
            StaticMetrics::new()
                .with_sample("kantaloupe_gpu_temp", &labels("gpu-a", "n1", "A100"), -1.0)
                .with_sample("kantaloupe_gpu_temp", &labels("gpu-b", "n1", "A100"), 55.0)
                .with_sample("kantaloupe_gpu_temp", &labels("gpu-c", "n2", "H100"), 60.0)
                .with_sample("kantaloupe_gpu_errors", &labels("gpu-b", "n1", "A100"), 2.0)
                .with_sample("kantaloupe_gpu_mem_total", &labels("gpu-a", "n1", "A100"), 81920.0)
                .with_sample("kantaloupe_gpu_mem_allocated", &labels("gpu-a", "n1", "A100"), 1024.0),
        )
    }

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::new("c1", "v1.28.3").with_object(
            ResourceKind::Node,
            json!({
                "metadata": {
                    "name": "n1",
                    "annotations": {
                        "NVIDIA_GPU_MEMORY_FACTOR": "2",
                        "hami.io/node-nvidia-register": "gpu-a,10,81920,100,NVIDIA-A100,0,true:"
                    }
                },
                "status": {"addresses": [
                    {"type": "InternalIP", "address": "10.0.0.5"},
                    {"type": "Hostname", "address": "n1"}
                ]}
            }),
        ))
    }

    #[tokio::test]
    async fn test_list_cards() {
        let service = service_with("c1", backend(), Some(metrics())).await;
        let page = service
            .list_accelerator_cards("c1", &ListQuery::default(), &AcceleratorFilters::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 3);
        let a = &page.items[0];
        assert_eq!(a.uuid, "gpu-a");
        assert_eq!(a.temperature, 0.0);
        assert_eq!(a.gpu_memory_allocatable, 81920.0);
        assert_eq!(a.gpu_memory_total, 40960.0);
        assert_eq!(a.node_addresses.len(), 1);
        assert_eq!(page.items[1].state, CardState::Error);

        let filters = AcceleratorFilters {
            model: Some("__ALL__".into()),
            node: Some("n1".into()),
            state: Some("HEALTH".into()),
            uuid: Some("gpu".into()),
        };
        let page = service
            .list_accelerator_cards("c1", &ListQuery::default(), &filters)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].uuid, "gpu-a");

        let bad = AcceleratorFilters {
            uuid: Some("(".into()),
            ..Default::default()
        };
        let err = service
            .list_accelerator_cards("c1", &ListQuery::default(), &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_card_and_model_names() {
        let service = service_with("c1", backend(), Some(metrics())).await;
        let card = service.get_accelerator_card("c1", "gpu-a").await.unwrap();
        assert_eq!(card.workload_limit, 10);
        assert_eq!(card.provider, Some(ClusterProvider::Generic));

        let err = service.get_accelerator_card("c1", "nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        let names = service.list_model_names("c1").await.unwrap();
        assert_eq!(names.model_names, vec!["A100", "H100"]);
    }

    #[test]
    fn test_workload_limit() {
        let mut node = KubeNode::default();
        assert_eq!(workload_limit(&node, Some(ClusterType::Metax)).unwrap(), 16);
        assert_eq!(workload_limit(&node, Some(ClusterType::Nvidia)).unwrap(), 0);

        let mut annotations = BTreeMap::new();
        annotations.insert(NVIDIA_REGISTER_ANNOTATION.to_string(), "gpu-a".to_string());
        node.metadata.annotations = Some(annotations.clone());
        assert_eq!(workload_limit(&node, None).unwrap(), 0);

        annotations.insert(NVIDIA_REGISTER_ANNOTATION.to_string(), "gpu-a,x".to_string());
        node.metadata.annotations = Some(annotations);
        assert!(workload_limit(&node, None).is_err());
    }
}
