//! Kubeconfig inspection that never touches the network

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Deserialize)]
struct RawKubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextRef,
}

#[derive(Debug, Deserialize)]
struct ContextRef {
    cluster: String,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterRef,
}

#[derive(Debug, Deserialize)]
struct ClusterRef {
    server: String,
}

/// What the gateway needs to know about a kubeconfig before connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigSummary {
    /// API server URL of the selected context
    pub server: String,
    pub context: Option<String>,
}

/// Resolve the API server of the current context (or the only cluster)
pub fn inspect(text: &str) -> GatewayResult<KubeconfigSummary> {
    if text.trim().is_empty() {
        return Err(GatewayError::invalid("kubeconfig must not be empty"));
    }
    let raw: RawKubeconfig = serde_yaml::from_str(text)
        .map_err(|e| GatewayError::InvalidCredential(format!("malformed kubeconfig: {}", e)))?;

    let cluster_name = match raw.current_context.as_deref().filter(|c| !c.is_empty()) {
        Some(current) => raw
            .contexts
            .iter()
            .find(|c| c.name == current)
            .map(|c| c.context.cluster.clone())
            .ok_or_else(|| {
                GatewayError::InvalidCredential(format!(
                    "current-context '{}' is not defined",
                    current
                ))
            })?,
        None => match raw.clusters.as_slice() {
            [only] => only.name.clone(),
            _ => {
                return Err(GatewayError::InvalidCredential(
                    "kubeconfig has no current-context".to_string(),
                ))
            }
        },
    };

    let server = raw
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .map(|c| c.cluster.server.clone())
        .ok_or_else(|| {
            GatewayError::InvalidCredential(format!("cluster '{}' is not defined", cluster_name))
        })?;

    Ok(KubeconfigSummary {
        server,
        context: raw.current_context,
    })
}

/// Hex SHA-256 of the kubeconfig text
pub fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Minimal token kubeconfig for one API server
pub fn render(cluster: &str, server: &str, token: &str) -> String {
    format!(
        "apiVersion: v1
kind: Config
current-context: {cluster}
clusters:
- name: {cluster}
  cluster:
    server: {server}
    insecure-skip-tls-verify: true
contexts:
- name: {cluster}
  context:
    cluster: {cluster}
    user: {cluster}-admin
users:
- name: {cluster}-admin
  user:
    token: {token}
"
    )
}
