//! API server backend built on `kube`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::{Client, Config};
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use super::{stamp_type, BackendFactory, ClusterBackend, ResourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::prometheus::PrometheusSource;
use crate::monitoring::MetricsSource;
use crate::resources::selector::LabelSelector;

/// A member cluster reached through its kubeconfig
pub struct KubeBackend {
    cluster: String,
    client: Client,
    call_timeout: Duration,
}

impl KubeBackend {
    /// Build a client from kubeconfig text; no request is sent yet
    pub async fn connect(
        cluster: &str,
        kubeconfig: &str,
        call_timeout: Duration,
    ) -> GatewayResult<Self> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            GatewayError::InvalidCredential(format!("{}: {}", what, e))
        };
        let kubeconfig =
            Kubeconfig::from_yaml(kubeconfig).map_err(|e| invalid("malformed kubeconfig", &e))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| invalid("unusable kubeconfig", &e))?;
        let client =
            Client::try_from(config).map_err(|e| invalid("failed to build client", &e))?;

        Ok(Self {
            cluster: cluster.to_string(),
            client,
            call_timeout,
        })
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) if kind.namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                debug!(cluster = %self.cluster, op, error = %e, "kubernetes call failed");
                Err(map_kube_error(&self.cluster, e))
            }
            Err(_) => Err(GatewayError::timeout(&self.cluster, self.call_timeout)),
        }
    }
}

fn api_resource(kind: ResourceKind) -> ApiResource {
    let info = kind.info();
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(info.group, info.version, info.kind),
        info.plural,
    )
}

fn to_value(kind: ResourceKind, object: DynamicObject) -> GatewayResult<Value> {
    let mut value = serde_json::to_value(object)?;
    stamp_type(kind, &mut value);
    Ok(value)
}

fn to_object(kind: ResourceKind, mut value: Value) -> GatewayResult<DynamicObject> {
    stamp_type(kind, &mut value);
    serde_json::from_value(value)
        .map_err(|e| GatewayError::invalid(format!("malformed {} object: {}", kind, e)))
}

/// Convert a `kube` error into the gateway taxonomy
pub fn map_kube_error(cluster: &str, err: kube::Error) -> GatewayError {
    match err {
        kube::Error::Api(resp) => {
            let message = format!("cluster '{}': {}", cluster, resp.message);
            match resp.code {
                404 => GatewayError::NotFound(message),
                409 if resp.reason == "AlreadyExists" => GatewayError::AlreadyExists(message),
                409 => GatewayError::Conflict(format!(
                    "{}; re-fetch the object and retry",
                    message
                )),
                400 | 422 => GatewayError::InvalidArgument(message),
                401 | 403 => GatewayError::InvalidCredential(message),
                429 => GatewayError::ResourceExceeded(message),
                504 => GatewayError::Timeout(message),
                code if code >= 500 => GatewayError::Unavailable(message),
                _ => GatewayError::Internal(message),
            }
        }
        other => GatewayError::unavailable(cluster, other),
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn server_version(&self) -> GatewayResult<String> {
        let info = self
            .call("version", self.client.apiserver_version())
            .await?;
        Ok(info.git_version)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> GatewayResult<Vec<Value>> {
        let api = self.api(kind, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            params = params.labels(&selector.to_string());
        }
        let list = self.call("list", api.list(&params)).await?;
        list.items.into_iter().map(|o| to_value(kind, o)).collect()
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<Value> {
        let api = self.api(kind, namespace);
        let object = self.call("get", api.get(name)).await?;
        to_value(kind, object)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        object: Value,
    ) -> GatewayResult<Value> {
        let api = self.api(kind, namespace);
        let object = to_object(kind, object)?;
        let created = self
            .call("create", api.create(&PostParams::default(), &object))
            .await?;
        to_value(kind, created)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        object: Value,
    ) -> GatewayResult<Value> {
        let api = self.api(kind, namespace);
        let object = to_object(kind, object)?;
        let replaced = self
            .call("replace", api.replace(name, &PostParams::default(), &object))
            .await?;
        to_value(kind, replaced)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> GatewayResult<Value> {
        let api = self.api(kind, namespace);
        let patched = self
            .call(
                "patch",
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
            )
            .await?;
        to_value(kind, patched)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()> {
        let api = self.api(kind, namespace);
        self.call("delete", api.delete(name, &DeleteParams::default()))
            .await?;
        Ok(())
    }
}

/// Factory for real clusters and Prometheus endpoints
pub struct KubeBackendFactory {
    http: reqwest::Client,
    call_timeout: Duration,
}

impl KubeBackendFactory {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            call_timeout,
        }
    }
}

#[async_trait]
impl BackendFactory for KubeBackendFactory {
    async fn connect(
        &self,
        cluster: &str,
        kubeconfig: &str,
    ) -> GatewayResult<Arc<dyn ClusterBackend>> {
        let backend = KubeBackend::connect(cluster, kubeconfig, self.call_timeout).await?;
        Ok(Arc::new(backend))
    }

    fn metrics(&self, address: &str) -> GatewayResult<Arc<dyn MetricsSource>> {
        let source = PrometheusSource::new(self.http.clone(), address, self.call_timeout)?;
        Ok(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_map_kube_error() {
        let kind = |code, reason| map_kube_error("prod-1", api_error(code, reason)).kind();
        assert_eq!(kind(404, "NotFound"), ErrorKind::NotFound);
        assert_eq!(kind(409, "AlreadyExists"), ErrorKind::AlreadyExists);
        assert_eq!(kind(409, "Conflict"), ErrorKind::Conflict);
        assert_eq!(kind(422, "Invalid"), ErrorKind::InvalidArgument);
        assert_eq!(kind(403, "Forbidden"), ErrorKind::InvalidCredential);
        assert_eq!(kind(503, "ServiceUnavailable"), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_kubeconfig() {
        let err = KubeBackend::connect("x", "not: [valid", Duration::from_secs(1))
            .await
            .err()
            .map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::InvalidCredential));
    }

    #[test]
    fn test_api_resource_for_crd() {
        let ar = api_resource(ResourceKind::KantaloupeFlow);
        assert_eq!(ar.group, "kantaloupe.dynamia.ai");
        assert_eq!(ar.plural, "kantaloupeflows");
        assert_eq!(ar.api_version, "kantaloupe.dynamia.ai/v1alpha1");
    }
}
