//! Registry and access-key credentials stored as labelled secrets

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::core::check_object_name;
use super::list::{ListQuery, Listable, Page, SortKey};
use super::selector::{LabelSelector, Requirement};
use super::service::{check_namespace, filter_value, ResourceService, MANAGED_BY_LABEL};
use crate::backend::{encode, ResourceKind};
use crate::error::{GatewayError, GatewayResult};

pub const CREDENTIAL_TYPE_LABEL: &str = "kantaloupe.io/credential-type";

pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialType {
    DockerRegistry,
    AccessKey,
}

impl CredentialType {
    pub fn label_value(self) -> &'static str {
        match self {
            CredentialType::DockerRegistry => "docker-registry",
            CredentialType::AccessKey => "access-key",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "docker-registry" => Some(CredentialType::DockerRegistry),
            "access-key" => Some(CredentialType::AccessKey),
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> GatewayResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DOCKER_REGISTRY" => Ok(CredentialType::DockerRegistry),
            "ACCESS_KEY" => Ok(CredentialType::AccessKey),
            other => Err(GatewayError::invalid(format!("unknown credential type '{}'", other))),
        }
    }

    fn secret_type(self) -> &'static str {
        match self {
            CredentialType::DockerRegistry => DOCKER_CONFIG_JSON_TYPE,
            CredentialType::AccessKey => "Opaque",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: CredentialType,
    pub namespace: String,
    /// Unix seconds
    pub created_time: i64,
    pub labels: BTreeMap<String, String>,
}

impl Credential {
    /// `None` for secrets that are not gateway credentials
    pub fn from_kube(secret: &KubeSecret) -> Option<Self> {
        let labels = secret.metadata.labels.clone().unwrap_or_default();
        if labels.get(MANAGED_BY_LABEL.0).map(String::as_str) != Some(MANAGED_BY_LABEL.1) {
            return None;
        }
        let type_ = labels
            .get(CREDENTIAL_TYPE_LABEL)
            .and_then(|v| CredentialType::from_label(v))?;
        Some(Self {
            name: secret.metadata.name.clone().unwrap_or_default(),
            type_,
            namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            created_time: secret
                .metadata
                .creation_timestamp
                .as_ref()
                .map_or(0, |t| t.0.timestamp()),
            labels,
        })
    }
}

impl Listable for Credential {
    const FIELDS: &'static [&'static str] = &["name", "namespace", "creationTimestamp", "type"];

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.labels)
    }

    fn field(&self, field: &str) -> SortKey {
        match field {
            "name" => SortKey::from(self.name.as_str()),
            "namespace" => SortKey::from(self.namespace.as_str()),
            "creationTimestamp" => SortKey::from(self.created_time),
            "type" => SortKey::from(self.type_.label_value()),
            _ => SortKey::Null,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialFilters {
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Body of credential create and update
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRequest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub type_: CredentialType,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CredentialRequest {
    fn required(&self, key: &str) -> GatewayResult<&str> {
        self.data
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                GatewayError::invalid(format!(
                    "{} is required for {} credential",
                    key,
                    self.type_.label_value()
                ))
            })
    }

    /// Secret `data`, base64 encoded
    fn secret_data(&self) -> GatewayResult<BTreeMap<String, String>> {
        let mut data = BTreeMap::new();
        match self.type_ {
            CredentialType::DockerRegistry => {
                let server = self.required("server")?;
                let username = self.required("username")?;
                let password = self.required("password")?;
                let config = json!({
                    "auths": {
                        server: {
                            "username": username,
                            "password": password,
                            "auth": BASE64.encode(format!("{}:{}", username, password)),
                        }
                    }
                });
                data.insert(
                    DOCKER_CONFIG_JSON_KEY.to_string(),
                    BASE64.encode(serde_json::to_vec(&config)?),
                );
            }
            CredentialType::AccessKey => {
                for key in ["accessKey", "secretKey"] {
                    data.insert(key.to_string(), BASE64.encode(self.required(key)?));
                }
            }
        }
        Ok(data)
    }
}

fn labels_for(type_: CredentialType, existing: Option<&Value>) -> Value {
    let mut labels = existing
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    labels.insert(MANAGED_BY_LABEL.0.to_string(), json!(MANAGED_BY_LABEL.1));
    labels.insert(CREDENTIAL_TYPE_LABEL.to_string(), json!(type_.label_value()));
    Value::Object(labels)
}

fn credential_of(value: Value) -> GatewayResult<Credential> {
    let secret: KubeSecret = serde_json::from_value(value)?;
    Credential::from_kube(&secret)
        .ok_or_else(|| GatewayError::Internal("stored credential lost its labels".to_string()))
}

impl ResourceService {
    pub async fn list_credentials(
        &self,
        cluster: &str,
        query: &ListQuery,
        filters: &CredentialFilters,
    ) -> GatewayResult<Page<Credential>> {
        let namespace = filter_value(filters.namespace.as_deref());
        if let Some(ns) = namespace {
            check_namespace(ns)?;
        }
        let mut selector = LabelSelector::matching(MANAGED_BY_LABEL.0, MANAGED_BY_LABEL.1);
        if let Some(raw) = filter_value(filters.type_.as_deref()) {
            let type_ = CredentialType::parse(raw)?;
            selector = selector.and(Requirement::Equals(
                CREDENTIAL_TYPE_LABEL.to_string(),
                type_.label_value().to_string(),
            ));
        }
        let options = query.to_options()?;
        let secrets: Vec<KubeSecret> = self
            .list_typed(cluster, ResourceKind::Secret, namespace, Some(&selector))
            .await?;
        options.apply(secrets.iter().filter_map(Credential::from_kube).collect())
    }

    pub async fn create_credential(
        &self,
        cluster: &str,
        namespace: &str,
        req: &CredentialRequest,
    ) -> GatewayResult<Credential> {
        check_namespace(namespace)?;
        check_object_name("credential", &req.name)?;
        let body = json!({
            "metadata": {
                "name": req.name,
                "namespace": namespace,
                "labels": labels_for(req.type_, None),
            },
            "type": req.type_.secret_type(),
            "data": req.secret_data()?,
        });
        let kind = ResourceKind::Secret;
        let backend = self.backend(cluster).await?;
        let created = self
            .call(cluster, backend.create(kind, Some(namespace), encode(kind, &body)?))
            .await?;
        info!(cluster = %cluster, namespace = %namespace, credential = %req.name, "Created credential");
        credential_of(created)
    }

    /// Rewrite the secret data, keeping labels, annotations and version
    pub async fn update_credential(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        req: &CredentialRequest,
    ) -> GatewayResult<Credential> {
        check_namespace(namespace)?;
        if !req.name.is_empty() && req.name != name {
            return Err(GatewayError::invalid(format!(
                "The name({}) in the request body is inconsistent with that in the URL.",
                req.name
            )));
        }
        let data = req.secret_data()?;
        let kind = ResourceKind::Secret;
        let backend = self.backend(cluster).await?;
        let mut current = self.call(cluster, backend.get(kind, Some(namespace), name)).await?;
        let labels = labels_for(req.type_, current["metadata"].get("labels"));
        current["metadata"]["labels"] = labels;
        current["type"] = json!(req.type_.secret_type());
        current["data"] = json!(data);
        let updated = self
            .call(cluster, backend.replace(kind, Some(namespace), name, current))
            .await?;
        info!(cluster = %cluster, namespace = %namespace, credential = %name, "Updated credential");
        credential_of(updated)
    }

    /// Delete a gateway credential; other secrets are refused
    pub async fn delete_credential(&self, cluster: &str, namespace: &str, name: &str) -> GatewayResult<()> {
        check_namespace(namespace)?;
        let secret: KubeSecret = self
            .get_typed(cluster, ResourceKind::Secret, Some(namespace), name)
            .await?;
        if Credential::from_kube(&secret).is_none() {
            return Err(GatewayError::invalid(format!(
                "secret {}/{} is not a kantaloupe credential",
                namespace, name
            )));
        }
        self.delete_object(cluster, ResourceKind::Secret, Some(namespace), name)
            .await?;
        info!(cluster = %cluster, namespace = %namespace, credential = %name, "Deleted credential");
        Ok(())
    }
}
