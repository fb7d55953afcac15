//! Gateway configuration file
//!
//! YAML, read from `~/.kantaloupe/config` unless a path is given. Every
//! field has a default, so an absent file means a gateway on port 8080 with
//! no bootstrap clusters.
//!
//! ```yaml
//! server:
//!   bind: 0.0.0.0
//!   port: 8080
//! fanout:
//!   callTimeoutSecs: 5
//!   deadlineSecs: 15
//!   concurrency: 10
//! prometheus: http://prometheus.monitoring:9090
//! health:
//!   intervalSecs: 30
//!   failureThreshold: 3
//! clusters:
//!   - name: prod-1
//!     kubeconfigPath: ~/.kube/prod-1
//!     type: NVIDIA
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::FanOut;
use crate::cluster::health::HealthCheckerConfig;
use crate::cluster::types::IntegrateClusterRequest;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default config file location: ~/.kantaloupe/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kantaloupe")
        .join("config")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to expand path '{0}': {1}")]
    Expand(String, String),

    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Requests served at once; the rest wait
    pub max_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            max_concurrency: 512,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address {}:{}: {}", self.bind, self.port, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanOutConfig {
    pub call_timeout_secs: u64,
    pub deadline_secs: u64,
    pub concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        let fanout = FanOut::default();
        Self {
            call_timeout_secs: fanout.call_timeout.as_secs(),
            deadline_secs: fanout.deadline.as_secs(),
            concurrency: fanout.concurrency,
        }
    }
}

impl FanOutConfig {
    pub fn to_fanout(&self) -> FanOut {
        FanOut {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            deadline: Duration::from_secs(self.deadline_secs),
            concurrency: self.concurrency,
        }
    }
}

/// A cluster integrated when the gateway starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapCluster {
    pub name: String,
    pub kubeconfig_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prometheus_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub fanout: FanOutConfig,
    /// Prometheus-compatible endpoint holding metrics of every cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<String>,
    pub health: HealthCheckerConfig,
    /// Percent below which a used card counts as idle
    pub idle_threshold: f64,
    /// `LIBCUDA_LOG_LEVEL` given to flow containers
    pub cuda_log_level: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<BootstrapCluster>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fanout: FanOutConfig::default(),
            prometheus: None,
            health: HealthCheckerConfig::default(),
            idle_threshold: crate::aggregate::platform::DEFAULT_IDLE_THRESHOLD,
            cuda_log_level: crate::workload::service::DEFAULT_CUDA_LOG_LEVEL.to_string(),
            clusters: Vec::new(),
        }
    }
}

// ============================================================================
// Pure parsing and validation
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(GatewayConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

impl GatewayConfig {
    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;
        if self.server.max_concurrency == 0 {
            return Err(ConfigError::Invalid("server.maxConcurrency must be positive".into()));
        }
        if self.fanout.call_timeout_secs == 0 || self.fanout.deadline_secs == 0 {
            return Err(ConfigError::Invalid("fanout timeouts must be positive".into()));
        }
        if self.fanout.call_timeout_secs > self.fanout.deadline_secs {
            return Err(ConfigError::Invalid(format!(
                "fanout.callTimeoutSecs ({}) exceeds fanout.deadlineSecs ({})",
                self.fanout.call_timeout_secs, self.fanout.deadline_secs
            )));
        }
        if self.fanout.concurrency == 0 {
            return Err(ConfigError::Invalid("fanout.concurrency must be positive".into()));
        }
        if self.health.failure_threshold == 0 || self.health.success_threshold == 0 {
            return Err(ConfigError::Invalid("health thresholds must be positive".into()));
        }
        if let Some(url) = &self.prometheus {
            reqwest::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("prometheus '{}': {}", url, e)))?;
        }
        let mut seen = std::collections::BTreeSet::new();
        for cluster in &self.clusters {
            crate::validation::dns1035_label("cluster name", &cluster.name)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(cluster.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "cluster '{}' is listed twice",
                    cluster.name
                )));
            }
            if cluster.kubeconfig_path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "cluster '{}' has no kubeconfigPath",
                    cluster.name
                )));
            }
        }
        Ok(())
    }
}

/// Expand `~` and environment variables in a path from the config
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| ConfigError::Expand(raw.to_string(), e.to_string()))
}

impl BootstrapCluster {
    /// Integration request carrying the given kubeconfig text
    pub fn to_request(&self, kube_config: String) -> IntegrateClusterRequest {
        IntegrateClusterRequest {
            name: self.name.clone(),
            kube_config,
            provider: self.provider.clone(),
            type_: self.type_.clone(),
            alias_name: self.alias_name.clone(),
            description: self.description.clone(),
            prometheus_address: self.prometheus_address.clone(),
            gateway_address: self.gateway_address.clone(),
            labels: self.labels.clone(),
            ..Default::default()
        }
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a path; a missing default file is an empty config
pub fn load_config_from(path: &Path, required: bool) -> Result<GatewayConfig, ConfigError> {
    if !path.exists() {
        if required {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        return Ok(GatewayConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    parse_config(&content)
}

/// Load the config named on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let config = match path {
        Some(p) => load_config_from(&expand_path(&p.to_string_lossy())?, true)?,
        None => load_config_from(&default_config_path(), false)?,
    };
    config.validate()?;
    Ok(config)
}

/// Read a bootstrap cluster's kubeconfig
pub fn read_kubeconfig(cluster: &BootstrapCluster) -> Result<String, ConfigError> {
    let path = expand_path(&cluster.kubeconfig_path)?;
    std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(path, e))
}
