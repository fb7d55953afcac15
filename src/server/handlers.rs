//! Cluster, platform and monitoring endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::{ApiJson, ApiQuery, CallerDeadline};
use super::state::AppState;
use crate::aggregate::platform::{
    GpuTop, KantaloupeTree, NamedValues, NodeRank, PlatformSummary, WorkloadRank, WorkloadsTop, GpuRank,
};
use crate::cluster::service::ClusterFilters;
use crate::cluster::types::{
    CardRequestTypes, Cluster, ClusterPlugins, ClusterVersions, IntegrateClusterRequest,
    UpdateClusterRequest, ValidateKubeconfigRequest, ValidateKubeconfigResponse,
};
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::trend::TrendResponse;
use crate::monitoring::{RangeQuery, ResourceType};
use crate::resources::{ListQuery, Page};

pub type ApiResult<T> = GatewayResult<Json<T>>;

/// Body of every void response
pub fn empty() -> Json<Value> {
    Json(json!({}))
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> GatewayResult<Option<T>> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(r) => r
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::invalid(format!("{} must be a number, got '{}'", name, r))),
    }
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Clusters
// ============================================================================

pub async fn list_clusters(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<ClusterFilters>,
    CallerDeadline(caller): CallerDeadline,
) -> ApiResult<Page<Cluster>> {
    Ok(Json(state.clusters.list(&query, &filters, caller).await?))
}

pub async fn integrate_cluster(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<IntegrateClusterRequest>,
) -> ApiResult<Cluster> {
    Ok(Json(state.clusters.integrate(req).await?))
}

pub async fn get_cluster(State(state): State<AppState>, Path(cluster): Path<String>) -> ApiResult<Cluster> {
    Ok(Json(state.clusters.get(&cluster).await?))
}

pub async fn update_cluster(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiJson(req): ApiJson<UpdateClusterRequest>,
) -> ApiResult<Value> {
    state.clusters.update(&cluster, req).await?;
    Ok(empty())
}

pub async fn delete_cluster(State(state): State<AppState>, Path(cluster): Path<String>) -> ApiResult<Value> {
    state.clusters.delete(&cluster).await?;
    Ok(empty())
}

pub async fn validate_kubeconfig(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ValidateKubeconfigRequest>,
) -> Json<ValidateKubeconfigResponse> {
    Json(state.clusters.validate_kubeconfig(&req.kube_config).await)
}

pub async fn cluster_versions(State(state): State<AppState>) -> Json<ClusterVersions> {
    Json(state.clusters.versions().await)
}

pub async fn cluster_plugins(State(state): State<AppState>, Path(cluster): Path<String>) -> ApiResult<ClusterPlugins> {
    Ok(Json(state.clusters.plugins(&cluster).await?))
}

pub async fn card_request_types(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> ApiResult<CardRequestTypes> {
    Ok(Json(state.clusters.card_request_types(&cluster).await?))
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub threshold: Option<String>,
}

pub async fn platform_summary(
    State(state): State<AppState>,
    CallerDeadline(caller): CallerDeadline,
    ApiQuery(query): ApiQuery<SummaryQuery>,
) -> ApiResult<PlatformSummary> {
    let threshold = parse_number::<f64>("threshold", query.threshold.as_deref())?;
    Ok(Json(state.platform.summary(threshold, caller).await))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuTopQuery {
    #[serde(default)]
    pub rank_option: Option<String>,
    #[serde(default)]
    pub topn: Option<String>,
}

pub async fn platform_gpu_top(
    State(state): State<AppState>,
    CallerDeadline(caller): CallerDeadline,
    ApiQuery(query): ApiQuery<GpuTopQuery>,
) -> ApiResult<GpuTop> {
    let rank = GpuRank::parse(query.rank_option.as_deref())?;
    let topn = parse_number::<i64>("topn", query.topn.as_deref())?.unwrap_or(0);
    Ok(Json(state.platform.gpu_top(rank, topn, caller).await))
}

pub async fn kantaloupe_tree(
    State(state): State<AppState>,
    CallerDeadline(caller): CallerDeadline,
) -> Json<KantaloupeTree> {
    Json(state.platform.kantaloupe_tree(caller).await)
}

/// `resourceType` plus the range window
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendQuery {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(flatten)]
    pub range: RangeQuery,
}

impl TrendQuery {
    fn resource(&self) -> GatewayResult<ResourceType> {
        ResourceType::parse(self.resource_type.as_deref().unwrap_or_default())
    }
}

pub async fn platform_trend(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TrendQuery>,
) -> ApiResult<TrendResponse> {
    Ok(Json(state.platform.platform_trend(query.resource()?, &query.range).await?))
}

// ============================================================================
// Cluster monitoring
// ============================================================================

pub async fn cluster_trend(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<TrendQuery>,
) -> ApiResult<TrendResponse> {
    Ok(Json(
        state
            .platform
            .cluster_trend(&cluster, query.resource()?, &query.range)
            .await?,
    ))
}

pub async fn node_trend(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<TrendQuery>,
) -> ApiResult<TrendResponse> {
    Ok(Json(
        state
            .platform
            .node_trend(&cluster, &node, query.resource()?, &query.range)
            .await?,
    ))
}

pub async fn flow_trend(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiQuery(query): ApiQuery<TrendQuery>,
) -> ApiResult<TrendResponse> {
    Ok(Json(
        state
            .platform
            .flow_trend(&cluster, &namespace, &name, query.resource()?, &query.range)
            .await?,
    ))
}

pub async fn card_trend(
    State(state): State<AppState>,
    Path((cluster, uuid)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<TrendQuery>,
) -> ApiResult<TrendResponse> {
    Ok(Json(
        state
            .platform
            .card_trend(&cluster, &uuid, query.resource()?, &query.range)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkloadsTopQuery {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(flatten)]
    pub range: RangeQuery,
}

pub async fn cluster_workloads_top(
    State(state): State<AppState>,
    CallerDeadline(caller): CallerDeadline,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<WorkloadsTopQuery>,
) -> ApiResult<WorkloadsTop> {
    let rank = WorkloadRank::parse(query.type_.as_deref())?;
    let limit = parse_number::<i64>("limit", query.limit.as_deref())?;
    Ok(Json(
        state
            .platform
            .cluster_workloads_top(&cluster, rank, limit, &query.range, caller)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNodesQuery {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub ranking_type: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

pub async fn top_nodes(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<TopNodesQuery>,
) -> ApiResult<NamedValues> {
    let resource = ResourceType::parse(query.resource_type.as_deref().unwrap_or_default())?;
    let rank = NodeRank::parse(query.ranking_type.as_deref())?;
    let limit = parse_number::<i64>("limit", query.limit.as_deref())?;
    Ok(Json(state.platform.top_nodes(&cluster, resource, rank, limit).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<String>,
}

pub async fn workload_distribution(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> ApiResult<NamedValues> {
    Ok(Json(state.platform.cluster_workload_distribution(&cluster).await?))
}

pub async fn top_node_workloads(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> ApiResult<NamedValues> {
    let limit = parse_number::<i64>("limit", query.limit.as_deref())?;
    Ok(Json(state.platform.top_node_workloads(&cluster, limit).await?))
}

pub async fn node_workload_distribution(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
) -> ApiResult<NamedValues> {
    Ok(Json(state.platform.node_workload_distribution(&cluster, &node).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<i64>("limit", None).unwrap(), None);
        assert_eq!(parse_number::<i64>("limit", Some(" ")).unwrap(), None);
        assert_eq!(parse_number::<i64>("limit", Some("7")).unwrap(), Some(7));
        assert!(matches!(
            parse_number::<f64>("threshold", Some("high")),
            Err(GatewayError::InvalidArgument(_))
        ));
    }
}
