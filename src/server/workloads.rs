//! Kantaloupeflow endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use super::extract::{ApiJson, ApiQuery};
use super::handlers::{empty, ApiResult};
use super::state::AppState;
use crate::resources::{ListQuery, Page};
use crate::workload::types::{
    CreateFlowRequest, FlowConditions, FlowDetail, FlowFilters, GpuMemoryRequest, Kantaloupeflow,
};

pub async fn list_cluster_flows(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<FlowFilters>,
) -> ApiResult<Page<Kantaloupeflow>> {
    Ok(Json(state.flows.list(&cluster, None, &query, &filters).await?))
}

pub async fn list_namespace_flows(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<FlowFilters>,
) -> ApiResult<Page<Kantaloupeflow>> {
    Ok(Json(
        state
            .flows
            .list(&cluster, Some(&namespace), &query, &filters)
            .await?,
    ))
}

pub async fn create_flow(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiJson(req): ApiJson<CreateFlowRequest>,
) -> ApiResult<Kantaloupeflow> {
    Ok(Json(state.flows.create(&cluster, req).await?))
}

pub async fn get_flow(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<FlowDetail> {
    Ok(Json(state.flows.get(&cluster, &namespace, &name).await?))
}

pub async fn delete_flow(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    state.flows.delete(&cluster, &namespace, &name).await?;
    Ok(empty())
}

pub async fn update_flow_gpu_memory(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiJson(req): ApiJson<GpuMemoryRequest>,
) -> ApiResult<Value> {
    state
        .flows
        .update_gpu_memory(&cluster, &namespace, &name, &req)
        .await?;
    Ok(empty())
}

pub async fn flow_conditions(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<FlowConditions> {
    Ok(Json(state.flows.conditions(&cluster, &namespace, &name).await?))
}
