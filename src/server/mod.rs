//! HTTP API
//!
//! Every route lives under [`API_BASE`]; liveness is `GET /healthz`.
//! Handlers return `Result<Json<T>, GatewayError>`, so failures share the
//! error body defined in [`crate::error`].

pub mod extract;
pub mod handlers;
pub mod resources;
pub mod state;
pub mod workloads;

pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use self::handlers as h;
use self::resources as r;
use self::workloads as w;

pub const API_BASE: &str = "/apis/kantaloupe.dynamia.ai/v1";

/// Routes under [`API_BASE`]
fn api_routes() -> Router<AppState> {
    Router::new()
        // Clusters
        .route("/clusters", get(h::list_clusters).post(h::integrate_cluster))
        .route("/clusters/kubeconfig:validate", post(h::validate_kubeconfig))
        .route("/clusters/versions", get(h::cluster_versions))
        .route(
            "/clusters/{cluster}",
            get(h::get_cluster).put(h::update_cluster).delete(h::delete_cluster),
        )
        .route("/clusters/{cluster}/plugins", get(h::cluster_plugins))
        .route("/clusters/{cluster}/cardrequesttypes", get(h::card_request_types))
        // Platform
        .route("/platform/summury", get(h::platform_summary))
        .route("/platform/gpu/top", get(h::platform_gpu_top))
        .route("/platform/resource/trend", get(h::platform_trend))
        .route("/platform/kantaloupeflows/tree", get(h::kantaloupe_tree))
        // Cluster monitoring
        .route("/clusters/{cluster}/resource/trend", get(h::cluster_trend))
        .route("/clusters/{cluster}/workloads/top", get(h::cluster_workloads_top))
        .route("/clusters/{cluster}/workloads/distribution", get(h::workload_distribution))
        .route("/clusters/{cluster}/nodes/workloads/top", get(h::top_node_workloads))
        .route("/clusters/{cluster}/nodes/top", get(h::top_nodes))
        // Nodes
        .route("/clusters/{cluster}/nodes", get(r::list_nodes))
        .route("/clusters/{cluster}/nodes/{name}", get(r::get_node))
        .route("/clusters/{cluster}/nodes/{name}/labels", put(r::put_node_labels))
        .route("/clusters/{cluster}/nodes/{name}/taints", put(r::put_node_taints))
        .route("/clusters/{cluster}/nodes/{name}/annotations", put(r::put_node_annotations))
        .route("/clusters/{cluster}/nodes/{name}/schedule", post(r::schedule_node))
        .route("/clusters/{cluster}/nodes/{name}/unschedule", post(r::unschedule_node))
        .route("/clusters/{cluster}/nodes/{name}/resource/trend", get(h::node_trend))
        .route(
            "/clusters/{cluster}/nodes/{name}/workloads/distribution",
            get(h::node_workload_distribution),
        )
        // Accelerator cards
        .route("/clusters/{cluster}/acceleratorcards", get(r::list_accelerator_cards))
        .route("/clusters/{cluster}/acceleratorcards/modelnames", get(r::list_model_names))
        .route("/clusters/{cluster}/acceleratorcards/{uuid}", get(r::get_accelerator_card))
        .route(
            "/clusters/{cluster}/acceleratorcards/{uuid}/resource/trend",
            get(h::card_trend),
        )
        // Namespaces and events
        .route("/clusters/{cluster}/namespaces", get(r::list_namespaces))
        .route("/clusters/{cluster}/events", get(r::list_cluster_events))
        .route("/clusters/{cluster}/namespaces/{namespace}/events", get(r::list_namespace_events))
        // Secrets and config maps
        .route("/clusters/{cluster}/secrets", get(r::list_cluster_secrets))
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/secrets",
            get(r::list_namespace_secrets).post(r::create_secret),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/secrets/{name}",
            get(r::get_secret).put(r::update_secret).delete(r::delete_secret),
        )
        .route("/clusters/{cluster}/configmaps", get(r::list_config_maps))
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/configmaps",
            get(r::list_namespace_config_maps),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/configmaps/{name}",
            get(r::get_config_map).put(r::update_config_map),
        )
        // Storage
        .route(
            "/clusters/{cluster}/persistentvolumes",
            get(r::list_persistent_volumes).post(r::create_persistent_volume),
        )
        .route(
            "/clusters/{cluster}/persistentvolumes/{name}",
            get(r::get_persistent_volume).delete(r::delete_persistent_volume),
        )
        .route("/clusters/{cluster}/persistentvolumeclaims", get(r::list_cluster_claims))
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/persistentvolumeclaims",
            get(r::list_namespace_claims).post(r::create_claim),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/persistentvolumeclaims/{name}",
            get(r::get_claim).delete(r::delete_claim),
        )
        .route("/clusters/{cluster}/storageclasses", get(r::list_storage_classes))
        // Quotas
        .route("/clusters/{cluster}/quotas", get(r::list_cluster_quotas))
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/quotas",
            get(r::list_namespace_quotas).post(r::create_quota),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/quotas/{name}",
            get(r::get_quota).put(r::update_quota).delete(r::delete_quota),
        )
        // Credentials
        .route("/clusters/{cluster}/credentials", get(r::list_cluster_credentials))
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/credentials",
            get(r::list_namespace_credentials).post(r::create_credential),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/credentials/{name}",
            put(r::update_credential).delete(r::delete_credential),
        )
        // Kantaloupeflows
        .route(
            "/clusters/{cluster}/kantaloupeflows",
            get(w::list_cluster_flows).post(w::create_flow),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/kantaloupeflows",
            get(w::list_namespace_flows),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/kantaloupeflows/{name}",
            get(w::get_flow).delete(w::delete_flow),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/kantaloupeflows/{name}/gpumemory",
            post(w::update_flow_gpu_memory),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/kantaloupeflows/{name}/conditions",
            get(w::flow_conditions),
        )
        .route(
            "/clusters/{cluster}/namespaces/{namespace}/kantaloupeflows/{name}/resource/trend",
            get(h::flow_trend),
        )
}

/// The full application: API, liveness, tracing and CORS
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(h::healthz))
        .nest(API_BASE, api_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    max_concurrency: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state).layer(GlobalConcurrencyLimitLayer::new(max_concurrency));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}{}", listener.local_addr()?, API_BASE);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
