use std::sync::Arc;

use crate::aggregate::platform::DEFAULT_IDLE_THRESHOLD;
use crate::aggregate::PlatformService;
use crate::cluster::registry::ClusterRegistry;
use crate::cluster::service::ClusterService;
use crate::config::GatewayConfig;
use crate::resources::ResourceService;
use crate::workload::service::DEFAULT_CUDA_LOG_LEVEL;
use crate::workload::FlowService;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub clusters: Arc<ClusterService>,
    pub resources: Arc<ResourceService>,
    pub platform: Arc<PlatformService>,
    pub flows: Arc<FlowService>,
}

impl AppState {
    pub fn new(clusters: ClusterService) -> Self {
        Self::build(clusters, DEFAULT_IDLE_THRESHOLD, DEFAULT_CUDA_LOG_LEVEL)
    }

    /// State with the tunables of a gateway config
    pub fn from_config(clusters: ClusterService, config: &GatewayConfig) -> Self {
        Self::build(clusters, config.idle_threshold, &config.cuda_log_level)
    }

    fn build(clusters: ClusterService, idle_threshold: f64, cuda_log_level: &str) -> Self {
        let clusters = Arc::new(clusters);
        let resources = Arc::new(ResourceService::new(clusters.clone()));
        Self {
            platform: Arc::new(PlatformService::new(clusters.clone(), idle_threshold)),
            flows: Arc::new(FlowService::new(resources.clone()).with_cuda_log_level(cuda_log_level)),
            resources,
            clusters,
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        self.clusters.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FanOut;
    use crate::backend::StaticBackendFactory;

    #[tokio::test]
    async fn test_services_share_one_registry() {
        let registry = Arc::new(ClusterRegistry::new(None));
        let clusters = ClusterService::new(
            registry.clone(),
            Arc::new(StaticBackendFactory::new()),
            FanOut::default(),
        );
        let state = AppState::new(clusters);

        assert!(Arc::ptr_eq(state.registry(), &registry));
        assert!(Arc::ptr_eq(state.resources.clusters(), &state.clusters));
        assert!(state.registry().list().await.is_empty());
    }
}
