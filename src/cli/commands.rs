//! Command implementations for the CLI
//!
//! SBIO pattern: commands return Results, printing is left to the caller

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::BackendFactory;
use crate::cluster::kubeconfig;
use crate::cluster::registry::ClusterRegistry;
use crate::cluster::service::ClusterService;
use crate::cluster::types::Cluster;
use crate::config::{read_kubeconfig, ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::server::{AppState, API_BASE};

use super::ServeArgs;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Serve
// ============================================================================

/// Fold command-line overrides into the loaded config
pub fn apply_serve_overrides(config: &mut GatewayConfig, args: &ServeArgs) {
    if let Some(ref bind) = args.bind_addr {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref prometheus) = args.prometheus {
        config.prometheus = Some(prometheus.clone());
    }
}

/// Registry, services and the clusters listed in the config
///
/// A bootstrap cluster that cannot be integrated is logged and skipped;
/// the gateway still starts with the rest.
pub async fn build_gateway(
    config: &GatewayConfig,
    factory: Arc<dyn BackendFactory>,
) -> CommandResult<AppState> {
    let global_metrics = match config.prometheus.as_deref() {
        Some(address) => Some(factory.metrics(address)?),
        None => None,
    };
    let registry = Arc::new(ClusterRegistry::new(global_metrics));
    let clusters = ClusterService::new(registry, factory, config.fanout.to_fanout());

    for bootstrap in &config.clusters {
        let kube_config = read_kubeconfig(bootstrap)?;
        match clusters.integrate(bootstrap.to_request(kube_config)).await {
            Ok(cluster) => info!(
                cluster = %cluster.metadata.name,
                version = %cluster.status.kubernetes_version,
                "Bootstrap cluster integrated"
            ),
            Err(e) => warn!(cluster = %bootstrap.name, error = %e, "Bootstrap cluster skipped"),
        }
    }

    Ok(AppState::from_config(clusters, config))
}

// ============================================================================
// Validate Commands
// ============================================================================

/// Result of checking a kubeconfig file
#[derive(Debug)]
pub struct KubeconfigCheck {
    pub server: String,
    pub context: Option<String>,
    /// Kubernetes version, when a connection was attempted and succeeded
    pub version: Option<String>,
}

/// Parse a kubeconfig file and optionally connect through `factory`
pub async fn validate_kubeconfig_file(
    path: &Path,
    factory: Option<&dyn BackendFactory>,
) -> CommandResult<KubeconfigCheck> {
    let text = std::fs::read_to_string(path)?;
    let summary = kubeconfig::inspect(&text)?;
    let version = match factory {
        Some(factory) => {
            let backend = factory.connect("kubeconfig-validation", &text).await?;
            Some(backend.server_version().await?)
        }
        None => None,
    };
    Ok(KubeconfigCheck {
        server: summary.server,
        context: summary.context,
        version,
    })
}

// ============================================================================
// HTTP Client for a running gateway
// ============================================================================

/// Client for a gateway's cluster endpoints
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_BASE, path)
    }

    /// Every registered cluster, optionally fuzzy-filtered by name
    pub async fn list_clusters(&self, name: Option<&str>) -> CommandResult<Vec<Cluster>> {
        let mut query = vec![("pageSize", "-1".to_string())];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        let resp = self
            .client
            .get(self.url("/clusters"))
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(CommandError::Server(error_message(status, &body)));
        }
        Ok(serde_json::from_value(body["items"].clone())?)
    }
}

/// Message of a gateway error body
fn error_message(status: reqwest::StatusCode, body: &serde_json::Value) -> String {
    match body["error"]["message"].as_str() {
        Some(message) => format!("{} ({})", message, status),
        None => status.to_string(),
    }
}
