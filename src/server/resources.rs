//! Per-cluster resource endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use super::extract::{ApiJson, ApiQuery};
use super::handlers::{empty, ApiResult};
use super::state::AppState;
use crate::resources::accelerator::{AcceleratorCard, AcceleratorFilters, ModelNames};
use crate::resources::core::{
    ConfigMap, Event, EventFilters, Namespace, NamespaceFilters, Secret, SecretRequest,
};
use crate::resources::credential::{Credential, CredentialFilters, CredentialRequest};
use crate::resources::node::{Node, NodeFilters, PutMapRequest, PutTaintsRequest};
use crate::resources::quota::{Quota, QuotaRequest};
use crate::resources::storage::{PersistentVolume, PersistentVolumeClaim, StorageClass};
use crate::resources::{ListQuery, Page};

// ============================================================================
// Nodes
// ============================================================================

pub async fn list_nodes(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<NodeFilters>,
) -> ApiResult<Page<Node>> {
    Ok(Json(state.resources.list_nodes(&cluster, &query, &filters).await?))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
) -> ApiResult<Node> {
    Ok(Json(state.resources.get_node(&cluster, &name).await?))
}

pub async fn put_node_labels(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
    ApiJson(req): ApiJson<PutMapRequest>,
) -> ApiResult<Value> {
    state.resources.put_node_labels(&cluster, &name, &req.values).await?;
    Ok(empty())
}

pub async fn put_node_annotations(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
    ApiJson(req): ApiJson<PutMapRequest>,
) -> ApiResult<Value> {
    state
        .resources
        .update_node_annotations(&cluster, &name, &req.values)
        .await?;
    Ok(empty())
}

pub async fn put_node_taints(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
    ApiJson(req): ApiJson<PutTaintsRequest>,
) -> ApiResult<Value> {
    state.resources.put_node_taints(&cluster, &name, &req.taints).await?;
    Ok(empty())
}

pub async fn schedule_node(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
) -> ApiResult<Value> {
    state.resources.schedule_node(&cluster, &name).await?;
    Ok(empty())
}

pub async fn unschedule_node(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
) -> ApiResult<Value> {
    state.resources.unschedule_node(&cluster, &name).await?;
    Ok(empty())
}

// ============================================================================
// Accelerator cards
// ============================================================================

pub async fn list_accelerator_cards(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<AcceleratorFilters>,
) -> ApiResult<Page<AcceleratorCard>> {
    Ok(Json(
        state
            .resources
            .list_accelerator_cards(&cluster, &query, &filters)
            .await?,
    ))
}

pub async fn get_accelerator_card(
    State(state): State<AppState>,
    Path((cluster, uuid)): Path<(String, String)>,
) -> ApiResult<AcceleratorCard> {
    Ok(Json(state.resources.get_accelerator_card(&cluster, &uuid).await?))
}

pub async fn list_model_names(State(state): State<AppState>, Path(cluster): Path<String>) -> ApiResult<ModelNames> {
    Ok(Json(state.resources.list_model_names(&cluster).await?))
}

// ============================================================================
// Namespaces and events
// ============================================================================

pub async fn list_namespaces(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<NamespaceFilters>,
) -> ApiResult<Page<Namespace>> {
    Ok(Json(state.resources.list_namespaces(&cluster, &query, &filters).await?))
}

pub async fn list_cluster_events(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<EventFilters>,
) -> ApiResult<Page<Event>> {
    Ok(Json(state.resources.list_events(&cluster, None, &query, &filters).await?))
}

pub async fn list_namespace_events(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<EventFilters>,
) -> ApiResult<Page<Event>> {
    Ok(Json(
        state
            .resources
            .list_events(&cluster, Some(&namespace), &query, &filters)
            .await?,
    ))
}

// ============================================================================
// Secrets and config maps
// ============================================================================

pub async fn list_cluster_secrets(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Secret>> {
    Ok(Json(state.resources.list_secrets(&cluster, None, &query).await?))
}

pub async fn list_namespace_secrets(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Secret>> {
    Ok(Json(state.resources.list_secrets(&cluster, Some(&namespace), &query).await?))
}

pub async fn create_secret(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiJson(req): ApiJson<SecretRequest>,
) -> ApiResult<Secret> {
    Ok(Json(state.resources.create_secret(&cluster, &namespace, &req).await?))
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Secret> {
    Ok(Json(state.resources.get_secret(&cluster, &namespace, &name).await?))
}

pub async fn update_secret(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiJson(req): ApiJson<SecretRequest>,
) -> ApiResult<Secret> {
    Ok(Json(
        state
            .resources
            .update_secret(&cluster, &namespace, &name, &req)
            .await?,
    ))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    state.resources.delete_secret(&cluster, &namespace, &name).await?;
    Ok(empty())
}

pub async fn list_config_maps(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<ConfigMap>> {
    Ok(Json(state.resources.list_config_maps(&cluster, None, &query).await?))
}

pub async fn list_namespace_config_maps(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<ConfigMap>> {
    Ok(Json(
        state
            .resources
            .list_config_maps(&cluster, Some(&namespace), &query)
            .await?,
    ))
}

pub async fn get_config_map(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<ConfigMap> {
    Ok(Json(state.resources.get_config_map(&cluster, &namespace, &name).await?))
}

pub async fn update_config_map(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiJson(body): ApiJson<ConfigMap>,
) -> ApiResult<ConfigMap> {
    Ok(Json(
        state
            .resources
            .update_config_map(&cluster, &namespace, &name, &body)
            .await?,
    ))
}

// ============================================================================
// Storage
// ============================================================================

pub async fn list_persistent_volumes(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<PersistentVolume>> {
    Ok(Json(state.resources.list_persistent_volumes(&cluster, &query).await?))
}

pub async fn create_persistent_volume(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiJson(req): ApiJson<PersistentVolume>,
) -> ApiResult<PersistentVolume> {
    Ok(Json(state.resources.create_persistent_volume(&cluster, &req).await?))
}

pub async fn get_persistent_volume(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
) -> ApiResult<PersistentVolume> {
    Ok(Json(state.resources.get_persistent_volume(&cluster, &name).await?))
}

pub async fn delete_persistent_volume(
    State(state): State<AppState>,
    Path((cluster, name)): Path<(String, String)>,
) -> ApiResult<Value> {
    state.resources.delete_persistent_volume(&cluster, &name).await?;
    Ok(empty())
}

pub async fn list_cluster_claims(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<PersistentVolumeClaim>> {
    Ok(Json(
        state
            .resources
            .list_persistent_volume_claims(&cluster, None, &query)
            .await?,
    ))
}

pub async fn list_namespace_claims(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<PersistentVolumeClaim>> {
    Ok(Json(
        state
            .resources
            .list_persistent_volume_claims(&cluster, Some(&namespace), &query)
            .await?,
    ))
}

pub async fn create_claim(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiJson(req): ApiJson<PersistentVolumeClaim>,
) -> ApiResult<PersistentVolumeClaim> {
    Ok(Json(
        state
            .resources
            .create_persistent_volume_claim(&cluster, &namespace, &req)
            .await?,
    ))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<PersistentVolumeClaim> {
    Ok(Json(
        state
            .resources
            .get_persistent_volume_claim(&cluster, &namespace, &name)
            .await?,
    ))
}

pub async fn delete_claim(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    state
        .resources
        .delete_persistent_volume_claim(&cluster, &namespace, &name)
        .await?;
    Ok(empty())
}

pub async fn list_storage_classes(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<StorageClass>> {
    Ok(Json(state.resources.list_storage_classes(&cluster, &query).await?))
}

// ============================================================================
// Quotas
// ============================================================================

pub async fn list_cluster_quotas(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Quota>> {
    Ok(Json(state.resources.list_quotas(&cluster, None, &query).await?))
}

pub async fn list_namespace_quotas(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Page<Quota>> {
    Ok(Json(state.resources.list_quotas(&cluster, Some(&namespace), &query).await?))
}

pub async fn create_quota(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiJson(req): ApiJson<QuotaRequest>,
) -> ApiResult<Quota> {
    Ok(Json(state.resources.create_quota(&cluster, &namespace, &req).await?))
}

pub async fn get_quota(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Quota> {
    Ok(Json(state.resources.get_quota(&cluster, &namespace, &name).await?))
}

pub async fn update_quota(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiJson(req): ApiJson<QuotaRequest>,
) -> ApiResult<Quota> {
    Ok(Json(
        state
            .resources
            .update_quota(&cluster, &namespace, &name, &req)
            .await?,
    ))
}

pub async fn delete_quota(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    state.resources.delete_quota(&cluster, &namespace, &name).await?;
    Ok(empty())
}

// ============================================================================
// Credentials
// ============================================================================

pub async fn list_cluster_credentials(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(filters): ApiQuery<CredentialFilters>,
) -> ApiResult<Page<Credential>> {
    Ok(Json(state.resources.list_credentials(&cluster, &query, &filters).await?))
}

pub async fn list_namespace_credentials(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
    ApiQuery(mut filters): ApiQuery<CredentialFilters>,
) -> ApiResult<Page<Credential>> {
    filters.namespace = Some(namespace);
    Ok(Json(state.resources.list_credentials(&cluster, &query, &filters).await?))
}

pub async fn create_credential(
    State(state): State<AppState>,
    Path((cluster, namespace)): Path<(String, String)>,
    ApiJson(req): ApiJson<CredentialRequest>,
) -> ApiResult<Credential> {
    Ok(Json(
        state
            .resources
            .create_credential(&cluster, &namespace, &req)
            .await?,
    ))
}

pub async fn update_credential(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
    ApiJson(req): ApiJson<CredentialRequest>,
) -> ApiResult<Credential> {
    Ok(Json(
        state
            .resources
            .update_credential(&cluster, &namespace, &name, &req)
            .await?,
    ))
}

pub async fn delete_credential(
    State(state): State<AppState>,
    Path((cluster, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    state
        .resources
        .delete_credential(&cluster, &namespace, &name)
        .await?;
    Ok(empty())
}
