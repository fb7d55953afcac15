//! Cluster-scoped metric queries
//!
//! [`ClusterMetrics`] binds a metrics source to one cluster. A cluster
//! without a configured source answers every query with empty data, so
//! metric-backed endpoints degrade to blanks instead of failing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use super::gpu::{assemble, CardReading, GpuFilter, GpuReading};
use super::trend::{calculate_usage, calculate_workload_usage, raw_series, TrendResponse};
use super::window::RangeWindow;
use super::{sum, MetricsSource, Point, Sample, Selector, Series};
use crate::error::{GatewayError, GatewayResult};

/// Aggregated resource quantities exported per cluster, node and workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    CpuTotal,
    CpuAllocated,
    CpuUsed,
    MemTotal,
    MemAllocated,
    MemUsed,
    GpuCoreTotal,
    GpuCoreAllocated,
    GpuCoreUsed,
    GpuMemTotal,
    GpuMemAllocated,
    GpuMemUsed,
}

impl Quantity {
    pub fn as_str(self) -> &'static str {
        match self {
            Quantity::CpuTotal => "cpu_total",
            Quantity::CpuAllocated => "cpu_allocated",
            Quantity::CpuUsed => "cpu_used",
            Quantity::MemTotal => "mem_total",
            Quantity::MemAllocated => "mem_allocated",
            Quantity::MemUsed => "mem_used",
            Quantity::GpuCoreTotal => "gpucore_total",
            Quantity::GpuCoreAllocated => "gpucore_allocated",
            Quantity::GpuCoreUsed => "gpucore_used",
            Quantity::GpuMemTotal => "gpumem_total",
            Quantity::GpuMemAllocated => "gpumem_allocated",
            Quantity::GpuMemUsed => "gpumem_used",
        }
    }

    /// CPU and memory are exported per pod, accelerators per deployment
    fn per_pod(self) -> bool {
        matches!(
            self,
            Quantity::CpuTotal
                | Quantity::CpuAllocated
                | Quantity::CpuUsed
                | Quantity::MemTotal
                | Quantity::MemAllocated
                | Quantity::MemUsed
        )
    }
}

/// The `total`/`allocated`/`used` triple behind a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageQuantities {
    pub total: Quantity,
    pub allocated: Quantity,
    pub used: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Cpu,
    Memory,
    GpuCore,
    GpuMemory,
    Temp,
    Power,
}

impl ResourceType {
    /// Accepts `CPU`, `gpu_core`, `RESOURCE_TYPE_GPU_MEMORY` and the like
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let upper = raw.trim().to_ascii_uppercase().replace('-', "_");
        match upper.trim_start_matches("RESOURCE_TYPE_") {
            "CPU" => Ok(ResourceType::Cpu),
            "MEMORY" | "MEM" => Ok(ResourceType::Memory),
            "GPU_CORE" | "CORE" => Ok(ResourceType::GpuCore),
            "GPU_MEMORY" | "GPU_MEM" => Ok(ResourceType::GpuMemory),
            "TEMP" | "TEMPERATURE" => Ok(ResourceType::Temp),
            "POWER" => Ok(ResourceType::Power),
            "" | "UNSPECIFIED" => Err(GatewayError::invalid("resourceType must be specified")),
            _ => Err(GatewayError::invalid(format!("unsupported resourceType '{}'", raw))),
        }
    }

    pub fn quantities(self) -> GatewayResult<UsageQuantities> {
        let q = |total, allocated, used| {
            Ok(UsageQuantities {
                total,
                allocated,
                used,
            })
        };
        match self {
            ResourceType::Cpu => q(Quantity::CpuTotal, Quantity::CpuAllocated, Quantity::CpuUsed),
            ResourceType::Memory => q(Quantity::MemTotal, Quantity::MemAllocated, Quantity::MemUsed),
            ResourceType::GpuCore => q(
                Quantity::GpuCoreTotal,
                Quantity::GpuCoreAllocated,
                Quantity::GpuCoreUsed,
            ),
            ResourceType::GpuMemory => q(
                Quantity::GpuMemTotal,
                Quantity::GpuMemAllocated,
                Quantity::GpuMemUsed,
            ),
            ResourceType::Temp | ResourceType::Power => Err(GatewayError::invalid(format!(
                "{:?} is only available per card",
                self
            ))),
        }
    }
}

/// Which family of series a quantity is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    Cluster,
    /// Every node of the cluster
    Nodes,
    Node(&'a str),
    /// Every workload of the cluster
    Workloads,
    Workload { namespace: &'a str, name: &'a str },
}

/// Sum same-timestamp points of several series into one
pub fn sum_series(series: Vec<Series>) -> Vec<Series> {
    if series.len() <= 1 {
        return series;
    }
    let mut points: BTreeMap<i64, f64> = BTreeMap::new();
    for s in &series {
        for p in &s.points {
            *points.entry((p.timestamp * 1000.0).round() as i64).or_default() += p.value;
        }
    }
    vec![Series {
        labels: Default::default(),
        points: points
            .into_iter()
            .map(|(ms, value)| Point {
                timestamp: ms as f64 / 1000.0,
                value,
            })
            .collect(),
    }]
}

/// Metric queries bound to one cluster
#[derive(Clone)]
pub struct ClusterMetrics {
    cluster: String,
    source: Option<Arc<dyn MetricsSource>>,
}

impl ClusterMetrics {
    pub fn new(cluster: impl Into<String>, source: Option<Arc<dyn MetricsSource>>) -> Self {
        Self {
            cluster: cluster.into(),
            source,
        }
    }

    /// Platform-wide metrics, not tied to a cluster label
    pub fn global(source: Option<Arc<dyn MetricsSource>>) -> Self {
        Self::new("", source)
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn selector(&self, scope: Scope<'_>, quantity: Quantity) -> Selector {
        let family = match scope {
            Scope::Global => "global",
            Scope::Cluster => "cluster",
            Scope::Nodes | Scope::Node(_) => "node",
            Scope::Workloads | Scope::Workload { .. } => "workload",
        };
        let mut s = Selector::new(format!("kantaloupe_{}_{}", family, quantity.as_str()));
        if scope != Scope::Global && !self.cluster.is_empty() {
            s = s.eq("cluster", self.cluster.clone());
        }
        match scope {
            Scope::Node(node) => s.eq("node", node),
            Scope::Workload { namespace, name } if quantity.per_pod() => s
                .eq("namespace", namespace)
                .re("pod", format!("{}.+", regex::escape(name))),
            Scope::Workload { namespace, name } => {
                s.eq("deployment", format!("{}/{}", namespace, name))
            }
            _ => s,
        }
    }

    pub fn gpu_selector(&self, reading: GpuReading, filter: &GpuFilter) -> Selector {
        let mut s = Selector::new(reading.metric());
        if !self.cluster.is_empty() {
            s = s.eq("cluster", self.cluster.clone());
        }
        filter.apply(s)
    }

    pub async fn instant(&self, selector: &Selector) -> GatewayResult<Vec<Sample>> {
        match &self.source {
            Some(source) => source.instant(selector).await,
            None => Ok(Vec::new()),
        }
    }

    async fn range_raw(&self, selector: &Selector, window: &RangeWindow) -> GatewayResult<Vec<Series>> {
        match &self.source {
            Some(source) => source.range(selector, window).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn vector(&self, scope: Scope<'_>, quantity: Quantity) -> GatewayResult<Vec<Sample>> {
        self.instant(&self.selector(scope, quantity)).await
    }

    /// Summed value, `None` when nothing is exported
    pub async fn value(&self, scope: Scope<'_>, quantity: Quantity) -> GatewayResult<Option<f64>> {
        Ok(sum(&self.vector(scope, quantity).await?))
    }

    /// Values summed per distinct value of `label`
    pub async fn by_label(
        &self,
        scope: Scope<'_>,
        quantity: Quantity,
        label: &str,
    ) -> GatewayResult<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for sample in self.vector(scope, quantity).await? {
            if let Some(key) = sample.label(label).filter(|k| !k.is_empty()) {
                *out.entry(key.to_string()).or_insert(0.0) += sample.value;
            }
        }
        Ok(out)
    }

    /// Range vector summed into at most one series
    pub async fn range(
        &self,
        scope: Scope<'_>,
        quantity: Quantity,
        window: &RangeWindow,
    ) -> GatewayResult<Vec<Series>> {
        let selector = self.selector(scope, quantity);
        Ok(sum_series(self.range_raw(&selector, window).await?))
    }

    pub async fn gpu_vector(&self, reading: GpuReading, filter: &GpuFilter) -> GatewayResult<Vec<Sample>> {
        self.instant(&self.gpu_selector(reading, filter)).await
    }

    pub async fn gpu_range(
        &self,
        reading: GpuReading,
        uuid: &str,
        window: &RangeWindow,
    ) -> GatewayResult<Vec<Series>> {
        let selector = self.gpu_selector(reading, &GpuFilter::uuid(uuid));
        Ok(sum_series(self.range_raw(&selector, window).await?))
    }

    /// All GPU readings, joined into cards driven by `base`
    pub async fn cards(&self, base: GpuReading, filter: &GpuFilter) -> GatewayResult<Vec<CardReading>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }
        let vectors = try_join_all(GpuReading::ALL.iter().map(|&reading| async move {
            self.gpu_vector(reading, filter).await.map(|v| (reading, v))
        }))
        .await?;
        let vectors: HashMap<GpuReading, Vec<Sample>> = vectors.into_iter().collect();
        Ok(assemble(base, &vectors))
    }

    /// `allocated`/`used` percentages of a resource over a window
    pub async fn usage_trend(
        &self,
        scope: Scope<'_>,
        resource: ResourceType,
        window: &RangeWindow,
    ) -> GatewayResult<TrendResponse> {
        let q = resource.quantities()?;
        let (total, allocated, used) = futures::try_join!(
            self.range(scope, q.total, window),
            self.range(scope, q.allocated, window),
            self.range(scope, q.used, window),
        )?;
        Ok(calculate_usage(&total, &allocated, &used, window))
    }

    /// Workload usage relative to its own allocation
    pub async fn workload_trend(
        &self,
        namespace: &str,
        name: &str,
        resource: ResourceType,
        window: &RangeWindow,
        metric: &str,
    ) -> GatewayResult<TrendResponse> {
        let q = resource.quantities()?;
        let scope = Scope::Workload { namespace, name };
        let (allocated, used) = futures::try_join!(
            self.range(scope, q.allocated, window),
            self.range(scope, q.used, window),
        )?;
        Ok(calculate_workload_usage(&allocated, &used, window, metric))
    }

    /// Trend of one card; temperature and power come back as a raw `used` series
    pub async fn gpu_trend(
        &self,
        uuid: &str,
        resource: ResourceType,
        window: &RangeWindow,
    ) -> GatewayResult<TrendResponse> {
        let single = match resource {
            ResourceType::Temp => Some(GpuReading::Temp),
            ResourceType::Power => Some(GpuReading::Power),
            _ => None,
        };
        if let Some(reading) = single {
            let series = self.gpu_range(reading, uuid, window).await?;
            return Ok(TrendResponse {
                data: vec![raw_series(&series, window, "used")],
            });
        }
        let (total, allocated, used) = match resource {
            ResourceType::GpuCore => (
                GpuReading::CoreTotal,
                GpuReading::CoreAllocated,
                GpuReading::CoreUsed,
            ),
            ResourceType::GpuMemory => (
                GpuReading::MemTotal,
                GpuReading::MemAllocated,
                GpuReading::MemUsed,
            ),
            other => {
                return Err(GatewayError::invalid(format!(
                    "{:?} is not a per-card resource",
                    other
                )))
            }
        };
        let (total, allocated, used) = futures::try_join!(
            self.gpu_range(total, uuid, window),
            self.gpu_range(allocated, uuid, window),
            self.gpu_range(used, uuid, window),
        )?;
        Ok(calculate_usage(&total, &allocated, &used, window))
    }
}
