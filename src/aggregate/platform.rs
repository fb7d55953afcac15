//! Platform-wide and per-cluster aggregates
//!
//! Everything here is read-only. Cross-cluster answers go through
//! [`FanOut`]; a cluster that fails is dropped from the totals and listed
//! in the response's `failedClusters`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{Degraded, FanOut};
use crate::backend::{ClusterBackend, ResourceKind};
use crate::cluster::registry::ClusterEntry;
use crate::cluster::service::ClusterService;
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::gpu::{card_uuid, CardReading, GpuFilter, GpuReading};
use crate::monitoring::trend::{calculate_workload_usage, raw_series, TrendPoint, TrendResponse};
use crate::monitoring::{ClusterMetrics, Quantity, RangeQuery, RangeWindow, ResourceType, Scope};
use crate::resources::selector::LabelSelector;
use crate::workload::types::FLOW_POD_LABEL;

pub const DEFAULT_IDLE_THRESHOLD: f64 = 5.0;
pub const DEFAULT_TOP_LIMIT: usize = 5;

/// Width of one bucket in the workload distribution
const BUCKET_WIDTH: i64 = 10;
const MAX_BUCKETS: usize = 5;
/// Upper bound of the last bucket once counts run past it
const OPEN_BUCKET_END: i64 = 999;
/// Label joining workload metrics to their flow, `<namespace>/<name>`
const DEPLOYMENT_LABEL: &str = "deployment";

// ============================================================================
// Request options
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GpuRank {
    #[default]
    Total,
    Core,
    Memory,
}

impl GpuRank {
    pub fn parse(raw: Option<&str>) -> GatewayResult<Self> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(GpuRank::Total);
        };
        match raw.to_ascii_uppercase().as_str() {
            "TOTAL" => Ok(GpuRank::Total),
            "CORE" => Ok(GpuRank::Core),
            "MEMORY" | "MEM" => Ok(GpuRank::Memory),
            _ => Err(GatewayError::invalid(format!("unknown rankOption '{}'", raw))),
        }
    }
}

/// What a workload is ranked by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadRank {
    Core,
    Memory,
}

impl WorkloadRank {
    pub fn parse(raw: Option<&str>) -> GatewayResult<Self> {
        match raw.map(|r| r.trim().to_ascii_uppercase()).as_deref() {
            None | Some("") | Some("CORE") | Some("GPU_CORE") => Ok(WorkloadRank::Core),
            Some("MEMORY") | Some("GPU_MEMORY") => Ok(WorkloadRank::Memory),
            Some(_) => Err(GatewayError::invalid(format!(
                "unknown type '{}', expected CORE or MEMORY",
                raw.unwrap_or_default()
            ))),
        }
    }
}

/// Numerator of a node ranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeRank {
    Allocated,
    #[default]
    Used,
}

impl NodeRank {
    pub fn parse(raw: Option<&str>) -> GatewayResult<Self> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(NodeRank::Used);
        };
        match raw.to_ascii_uppercase().trim_start_matches("RANKING_TYPE_") {
            "ALLOCATED" => Ok(NodeRank::Allocated),
            "USED" => Ok(NodeRank::Used),
            _ => Err(GatewayError::invalid(format!(
                "unknown rankingType '{}', expected ALLOCATED or USED",
                raw
            ))),
        }
    }
}

fn limit_or_default(limit: Option<i64>) -> usize {
    match limit {
        Some(l) if l > 0 => l as usize,
        _ => DEFAULT_TOP_LIMIT,
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub mode: String,
    pub total_num: i64,
    pub useage_num: i64,
    pub idel_num: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSummary {
    pub cluster_num: i64,
    pub node_num: i64,
    pub kantaloupeflow_num: i64,
    pub accelerator_card_num: i64,
    pub accelerator_card_summury: Vec<ModelSummary>,
    #[serde(flatten)]
    pub degraded: Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuModelUsage {
    pub model: String,
    pub total: i64,
    /// Ratio of memory allocated, 0..1
    pub mem_allocated: f64,
    /// Ratio of memory used, 0..1
    pub mem_usage: f64,
    /// Percent of core allocated
    pub core_allocated: f64,
    /// Percent of core used
    pub core_usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuTop {
    pub data: Vec<GpuModelUsage>,
    #[serde(flatten)]
    pub degraded: Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KantaloupeTree {
    pub data: Vec<TreeNode>,
    #[serde(flatten)]
    pub degraded: Degraded,
}

/// A name with a figure attached; used by rankings and distributions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedValues {
    pub data: Vec<NamedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUsage {
    /// `<namespace>/<name>`
    pub name: String,
    pub value: f64,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadsTop {
    pub data: Vec<WorkloadUsage>,
    #[serde(flatten)]
    pub degraded: Degraded,
}

// ============================================================================
// Reductions
// ============================================================================

fn ratio(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total
    }
}

/// `(value desc, name asc)`, the order every ranking uses
fn rank_desc<T>(items: &mut [T], key: impl Fn(&T) -> (f64, &str)) {
    items.sort_by(|a, b| {
        let (va, na) = key(a);
        let (vb, nb) = key(b);
        vb.total_cmp(&va).then_with(|| na.cmp(nb))
    });
}

/// Cards grouped by model with used and idle counts
pub fn summarize_cards(cards: &[CardReading], threshold: f64) -> Vec<ModelSummary> {
    let mut by_model: BTreeMap<&str, ModelSummary> = BTreeMap::new();
    for card in cards {
        let entry = by_model
            .entry(card.model.as_str())
            .or_insert_with(|| ModelSummary {
                mode: card.model.clone(),
                ..Default::default()
            });
        entry.total_num += 1;
        let used = card.mem_allocated > 0.0 || card.core_allocated > 0.0;
        if used {
            entry.useage_num += 1;
            if card.core_used < threshold && card.mem_usage_percent() < threshold {
                entry.idel_num += 1;
            }
        }
    }
    let mut models: Vec<ModelSummary> = by_model.into_values().collect();
    models.sort_by(|a, b| b.idel_num.cmp(&a.idel_num).then_with(|| a.mode.cmp(&b.mode)));
    models
}

/// Per-model averages; cards without a memory or core total are left out
pub fn rank_models(cards: &[CardReading], rank: GpuRank, topn: i64) -> Vec<GpuModelUsage> {
    let mut by_model: BTreeMap<&str, (GpuModelUsage, f64)> = BTreeMap::new();
    for card in cards {
        let (Some(mem_total), Some(core_total)) = (card.mem_total, card.core_total) else {
            continue;
        };
        if mem_total <= 0.0 || core_total <= 0.0 {
            continue;
        }
        let (acc, _) = by_model.entry(card.model.as_str()).or_insert_with(|| {
            (
                GpuModelUsage {
                    model: card.model.clone(),
                    ..Default::default()
                },
                0.0,
            )
        });
        acc.total += 1;
        acc.mem_allocated += card.mem_allocated / mem_total;
        acc.mem_usage += card.mem_used / mem_total;
        acc.core_allocated += card.core_allocated / core_total * 100.0;
        acc.core_usage += card.core_used / core_total * 100.0;
    }

    let mut models: Vec<GpuModelUsage> = by_model
        .into_values()
        .map(|(mut m, _)| {
            let n = m.total as f64;
            m.mem_allocated /= n;
            m.mem_usage /= n;
            m.core_allocated /= n;
            m.core_usage /= n;
            m
        })
        .collect();
    rank_desc(&mut models, |m| {
        let value = match rank {
            GpuRank::Total => m.total as f64,
            GpuRank::Core => m.core_usage,
            GpuRank::Memory => m.mem_usage,
        };
        (value, m.model.as_str())
    });
    if topn > 0 && (topn as usize) < models.len() {
        models.truncate(topn as usize);
    }
    models
}

/// Node counts folded into ranges of ten, at most five of them
pub fn bucket_counts(counts: &BTreeMap<String, i64>) -> Vec<NamedValue> {
    let Some(&max) = counts.values().max() else {
        return Vec::new();
    };
    let mut buckets: Vec<(i64, i64, i64)> = Vec::new();
    let mut start = 0;
    while start <= max && buckets.len() < MAX_BUCKETS {
        buckets.push((start, start + BUCKET_WIDTH - 1, 0));
        start += BUCKET_WIDTH;
    }
    if max > (MAX_BUCKETS as i64 - 1) * BUCKET_WIDTH {
        if let Some(last) = buckets.last_mut() {
            last.1 = OPEN_BUCKET_END;
        }
    }
    for &count in counts.values() {
        if let Some(bucket) = buckets
            .iter_mut()
            .find(|(lo, hi, _)| *lo <= count && count <= *hi)
        {
            bucket.2 += 1;
        }
    }
    buckets
        .into_iter()
        .filter(|(_, _, n)| *n > 0)
        .map(|(lo, hi, n)| NamedValue {
            name: if lo == hi {
                lo.to_string()
            } else {
                format!("{}-{}", lo, hi)
            },
            value: n as f64,
        })
        .collect()
}

fn flow_key(flow: &Value) -> Option<String> {
    let meta = flow.get("metadata")?;
    let ns = meta.get("namespace")?.as_str()?;
    let name = meta.get("name")?.as_str()?;
    Some(format!("{}/{}", ns, name))
}

// ============================================================================
// Service
// ============================================================================

/// Per-cluster figures folded into the platform summary
struct ClusterCounts {
    nodes: i64,
    flows: i64,
    cards: Vec<CardReading>,
}

pub struct PlatformService {
    clusters: Arc<ClusterService>,
    idle_threshold: f64,
}

impl PlatformService {
    pub fn new(clusters: Arc<ClusterService>, idle_threshold: f64) -> Self {
        let idle_threshold = if idle_threshold > 0.0 {
            idle_threshold
        } else {
            DEFAULT_IDLE_THRESHOLD
        };
        Self {
            clusters,
            idle_threshold,
        }
    }

    fn fanout(&self, caller: Option<Duration>) -> FanOut {
        self.clusters.fanout().bounded_by(caller)
    }

    async fn entries(&self) -> (Vec<String>, HashMap<String, Arc<ClusterEntry>>) {
        let entries = self.clusters.registry().list().await;
        let names = entries.iter().map(|e| e.name().to_string()).collect();
        let by_name = entries
            .into_iter()
            .map(|e| (e.name().to_string(), e))
            .collect();
        (names, by_name)
    }

    async fn entry(&self, cluster: &str) -> GatewayResult<Arc<ClusterEntry>> {
        crate::validation::dns1035_label("cluster name", cluster)?;
        self.clusters.registry().get(cluster).await
    }

    async fn metrics(&self, cluster: &str) -> GatewayResult<ClusterMetrics> {
        let entry = self.entry(cluster).await?;
        Ok(self.clusters.registry().metrics_for(&entry))
    }

    /// `<namespace>/<name>` of every flow on a cluster
    async fn flow_keys(&self, cluster: &str, backend: &dyn ClusterBackend) -> GatewayResult<BTreeSet<String>> {
        let flows = self
            .clusters
            .fanout()
            .call(cluster, backend.list(ResourceKind::KantaloupeFlow, None, None))
            .await?;
        Ok(flows.iter().filter_map(flow_key).collect())
    }

    /// Nodes and flows from every cluster; cards only from ready ones
    async fn cluster_counts(&self, entry: &ClusterEntry) -> GatewayResult<ClusterCounts> {
        let backend = entry.backend.as_ref();
        let metrics = self.clusters.registry().metrics_for(entry);
        let filter = GpuFilter::default();
        let cards = async {
            if entry.cluster.is_ready() {
                metrics.cards(GpuReading::CoreUsed, &filter).await
            } else {
                Ok(Vec::new())
            }
        };
        let (nodes, flows, cards) = futures::try_join!(
            backend.list(ResourceKind::Node, None, None),
            backend.list(ResourceKind::KantaloupeFlow, None, None),
            cards,
        )?;
        Ok(ClusterCounts {
            nodes: nodes.len() as i64,
            flows: flows.len() as i64,
            cards,
        })
    }

    // ========================================================================
    // Platform
    // ========================================================================

    /// Cluster, node, flow and card counts across the platform
    ///
    /// Every registered cluster counts toward `clusterNum`; nodes, flows
    /// and cards come only from clusters that answered.
    pub async fn summary(&self, threshold: Option<f64>, caller: Option<Duration>) -> PlatformSummary {
        let threshold = threshold.filter(|t| *t > 0.0).unwrap_or(self.idle_threshold);
        let (names, entries) = self.entries().await;
        let cluster_num = names.len() as i64;

        let (answers, degraded) = self
            .fanout(caller)
            .run(names, |name| {
                let entry = entries.get(&name).cloned();
                async move {
                    let entry = entry.ok_or_else(|| GatewayError::not_found("cluster", &name))?;
                    self.cluster_counts(&entry).await
                }
            })
            .await
            .partition();

        let mut summary = PlatformSummary {
            cluster_num,
            degraded,
            ..Default::default()
        };
        let mut cards = Vec::new();
        for (_, counts) in answers {
            summary.node_num += counts.nodes;
            summary.kantaloupeflow_num += counts.flows;
            cards.extend(counts.cards);
        }
        summary.accelerator_card_num = cards.len() as i64;
        summary.accelerator_card_summury = summarize_cards(&cards, threshold);
        if summary.degraded.degraded {
            info!(
                failed = summary.degraded.failed_clusters.len(),
                "Platform summary degraded"
            );
        }
        summary
    }

    /// GPU models ranked across every running cluster
    pub async fn gpu_top(&self, rank: GpuRank, topn: i64, caller: Option<Duration>) -> GpuTop {
        let (names, entries) = self.entries().await;
        let registry = self.clusters.registry();
        let (answers, degraded) = self
            .fanout(caller)
            .run(names, |name| {
                let entry = entries.get(&name).cloned();
                async move {
                    let entry = entry.ok_or_else(|| GatewayError::not_found("cluster", &name))?;
                    if !entry.cluster.is_ready() {
                        return Ok(Vec::new());
                    }
                    registry
                        .metrics_for(&entry)
                        .cards(GpuReading::MemUsed, &GpuFilter::default())
                        .await
                }
            })
            .await
            .partition();
        let cards: Vec<CardReading> = answers.into_iter().flat_map(|(_, c)| c).collect();
        GpuTop {
            data: rank_models(&cards, rank, topn),
            degraded,
        }
    }

    /// Flow pods per running cluster, broken down by node
    pub async fn kantaloupe_tree(&self, caller: Option<Duration>) -> KantaloupeTree {
        let (names, entries) = self.entries().await;
        let selector = LabelSelector::exists(FLOW_POD_LABEL);
        let (answers, degraded) = self
            .fanout(caller)
            .run(names, |name| {
                let entry = entries.get(&name).cloned();
                let selector = &selector;
                async move {
                    let entry = entry.ok_or_else(|| GatewayError::not_found("cluster", &name))?;
                    if !entry.cluster.is_ready() {
                        return Ok(None);
                    }
                    let pods = entry
                        .backend
                        .list(ResourceKind::Pod, None, Some(selector))
                        .await?;
                    Ok(Some(pods))
                }
            })
            .await
            .partition();

        let data = answers
            .into_iter()
            .filter_map(|(cluster, pods)| {
                let pods = pods?;
                let mut per_node: BTreeMap<String, i64> = BTreeMap::new();
                for pod in &pods {
                    if let Some(node) = pod
                        .pointer("/spec/nodeName")
                        .and_then(Value::as_str)
                        .filter(|n| !n.is_empty())
                    {
                        *per_node.entry(node.to_string()).or_default() += 1;
                    }
                }
                Some(TreeNode {
                    name: cluster,
                    value: pods.len() as i64,
                    children: per_node
                        .into_iter()
                        .map(|(name, value)| TreeNode {
                            name,
                            value,
                            children: Vec::new(),
                        })
                        .collect(),
                })
            })
            .collect();
        KantaloupeTree { data, degraded }
    }

    // ========================================================================
    // Trends
    // ========================================================================

    fn window(query: &RangeQuery) -> GatewayResult<RangeWindow> {
        query.resolve(Utc::now())
    }

    pub async fn platform_trend(&self, resource: ResourceType, query: &RangeQuery) -> GatewayResult<TrendResponse> {
        let window = Self::window(query)?;
        self.clusters
            .registry()
            .global_metrics()
            .usage_trend(Scope::Global, resource, &window)
            .await
    }

    pub async fn cluster_trend(
        &self,
        cluster: &str,
        resource: ResourceType,
        query: &RangeQuery,
    ) -> GatewayResult<TrendResponse> {
        let window = Self::window(query)?;
        self.metrics(cluster)
            .await?
            .usage_trend(Scope::Cluster, resource, &window)
            .await
    }

    pub async fn node_trend(
        &self,
        cluster: &str,
        node: &str,
        resource: ResourceType,
        query: &RangeQuery,
    ) -> GatewayResult<TrendResponse> {
        let window = Self::window(query)?;
        self.metrics(cluster)
            .await?
            .usage_trend(Scope::Node(node), resource, &window)
            .await
    }

    /// A flow's usage relative to what it was allocated
    pub async fn flow_trend(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        resource: ResourceType,
        query: &RangeQuery,
    ) -> GatewayResult<TrendResponse> {
        let window = Self::window(query)?;
        self.metrics(cluster)
            .await?
            .workload_trend(namespace, name, resource, &window, "used")
            .await
    }

    pub async fn card_trend(
        &self,
        cluster: &str,
        uuid: &str,
        resource: ResourceType,
        query: &RangeQuery,
    ) -> GatewayResult<TrendResponse> {
        let window = Self::window(query)?;
        self.metrics(cluster)
            .await?
            .gpu_trend(uuid, resource, &window)
            .await
    }

    // ========================================================================
    // Cluster rankings
    // ========================================================================

    /// Flows ranked by GPU usage over a window, with their series
    pub async fn cluster_workloads_top(
        &self,
        cluster: &str,
        rank: WorkloadRank,
        limit: Option<i64>,
        query: &RangeQuery,
        caller: Option<Duration>,
    ) -> GatewayResult<WorkloadsTop> {
        let window = Self::window(query)?;
        let entry = self.entry(cluster).await?;
        let metrics = self.clusters.registry().metrics_for(&entry);
        if !metrics.is_configured() {
            return Ok(WorkloadsTop::default());
        }
        let flows = self.flow_keys(cluster, entry.backend.as_ref()).await?;

        let (answers, degraded) = self
            .fanout(caller)
            .run(flows.into_iter().collect(), |key| {
                let metrics = &metrics;
                let window = &window;
                async move { workload_usage(metrics, &key, rank, window).await }
            })
            .await
            .partition();

        let mut data: Vec<WorkloadUsage> = answers.into_iter().filter_map(|(_, w)| w).collect();
        rank_desc(&mut data, |w| (w.value, w.name.as_str()));
        data.truncate(limit_or_default(limit));
        debug!(cluster = %cluster, workloads = data.len(), "Ranked workloads");
        Ok(WorkloadsTop { data, degraded })
    }

    /// Nodes ranked by `used` or `allocated` as a percent of their total
    pub async fn top_nodes(
        &self,
        cluster: &str,
        resource: ResourceType,
        rank: NodeRank,
        limit: Option<i64>,
    ) -> GatewayResult<NamedValues> {
        let q = resource.quantities()?;
        let metrics = self.metrics(cluster).await?;
        let numerator = match rank {
            NodeRank::Allocated => q.allocated,
            NodeRank::Used => q.used,
        };
        let (totals, parts) = futures::try_join!(
            metrics.by_label(Scope::Nodes, q.total, "node"),
            metrics.by_label(Scope::Nodes, numerator, "node"),
        )?;
        let mut data: Vec<NamedValue> = totals
            .iter()
            .map(|(node, total)| NamedValue {
                name: node.clone(),
                value: ratio(parts.get(node).copied().unwrap_or(0.0), *total) * 100.0,
            })
            .collect();
        rank_desc(&mut data, |v| (v.value, v.name.as_str()));
        data.truncate(limit_or_default(limit));
        Ok(NamedValues { data })
    }

    /// Distinct flows per node, from GPU allocation samples
    async fn workloads_per_node(&self, cluster: &str, node: Option<&str>) -> GatewayResult<Vec<(String, String, String)>> {
        let entry = self.entry(cluster).await?;
        let metrics = self.clusters.registry().metrics_for(&entry);
        if !metrics.is_configured() {
            return Ok(Vec::new());
        }
        let flows = self.flow_keys(cluster, entry.backend.as_ref()).await?;
        let samples = self
            .clusters
            .fanout()
            .call(cluster, metrics.vector(Scope::Workloads, Quantity::GpuCoreAllocated))
            .await?;
        Ok(samples
            .iter()
            .filter_map(|s| {
                let deployment = s.label(DEPLOYMENT_LABEL).filter(|d| flows.contains(*d))?;
                let on = s.label("node").filter(|n| !n.is_empty())?;
                if node.is_some_and(|n| n != on) {
                    return None;
                }
                let card = card_uuid(s).unwrap_or_default();
                Some((on.to_string(), deployment.to_string(), card.to_string()))
            })
            .collect())
    }

    async fn flow_counts(&self, cluster: &str) -> GatewayResult<BTreeMap<String, i64>> {
        let placements = self.workloads_per_node(cluster, None).await?;
        let mut distinct: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (node, deployment, _) in placements {
            distinct.entry(node).or_default().insert(deployment);
        }
        Ok(distinct
            .into_iter()
            .map(|(node, set)| (node, set.len() as i64))
            .collect())
    }

    /// How many nodes carry 0-9, 10-19, ... flows
    pub async fn cluster_workload_distribution(&self, cluster: &str) -> GatewayResult<NamedValues> {
        let counts = self.flow_counts(cluster).await?;
        Ok(NamedValues {
            data: bucket_counts(&counts),
        })
    }

    /// Nodes with the most flows
    pub async fn top_node_workloads(&self, cluster: &str, limit: Option<i64>) -> GatewayResult<NamedValues> {
        let counts = self.flow_counts(cluster).await?;
        let mut data: Vec<NamedValue> = counts
            .into_iter()
            .map(|(name, n)| NamedValue {
                name,
                value: n as f64,
            })
            .collect();
        rank_desc(&mut data, |v| (v.value, v.name.as_str()));
        data.truncate(limit_or_default(limit));
        Ok(NamedValues { data })
    }

    /// Flows per card on one node, ordered by card id
    pub async fn node_workload_distribution(&self, cluster: &str, node: &str) -> GatewayResult<NamedValues> {
        let placements = self.workloads_per_node(cluster, Some(node)).await?;
        let mut per_card: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (_, deployment, card) in placements {
            if !card.is_empty() {
                per_card.entry(card).or_default().insert(deployment);
            }
        }
        Ok(NamedValues {
            data: per_card
                .into_iter()
                .map(|(name, set)| NamedValue {
                    name,
                    value: set.len() as f64,
                })
                .collect(),
        })
    }
}

/// Rank value and series of one flow; `None` when it exports nothing
async fn workload_usage(
    metrics: &ClusterMetrics,
    key: &str,
    rank: WorkloadRank,
    window: &RangeWindow,
) -> GatewayResult<Option<WorkloadUsage>> {
    let Some((namespace, name)) = key.split_once('/') else {
        return Ok(None);
    };
    let scope = Scope::Workload { namespace, name };
    match rank {
        WorkloadRank::Core => {
            let used = metrics.range(scope, Quantity::GpuCoreUsed, window).await?;
            let Some(value) = used.first().and_then(|s| s.average()) else {
                return Ok(None);
            };
            Ok(Some(WorkloadUsage {
                name: key.to_string(),
                value,
                points: raw_series(&used, window, key).points,
            }))
        }
        WorkloadRank::Memory => {
            let (allocated, used) = futures::try_join!(
                metrics.range(scope, Quantity::GpuMemAllocated, window),
                metrics.range(scope, Quantity::GpuMemUsed, window),
            )?;
            let Some(avg_used) = used.first().and_then(|s| s.average()) else {
                return Ok(None);
            };
            let avg_allocated = allocated
                .first()
                .and_then(|s| s.average())
                .unwrap_or(0.0);
            let points = calculate_workload_usage(&allocated, &used, window, key)
                .data
                .into_iter()
                .next()
                .map(|s| s.points)
                .unwrap_or_default();
            Ok(Some(WorkloadUsage {
                name: key.to_string(),
                value: ratio(avg_used, avg_allocated),
                points,
            }))
        }
    }
}
