//! Object metadata shared by every resource the gateway returns

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta as KubeObjectMeta, Time};
use serde::{Deserialize, Serialize};

use super::list::SortKey;

/// Metadata in gateway form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Member cluster the object was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

/// Status condition, as reported for clusters, nodes and kantaloupeflows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// `YYYY-MM-DD HH:MM:SS` in UTC
    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(type_: impl Into<String>, ready: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.into(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: format_time(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Human timestamp used in conditions and events
pub fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Fields every metadata-bearing kind can sort and select on
pub const META_FIELDS: &[&str] = &["name", "namespace", "uid", "creationTimestamp"];

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn from_kube(meta: &KubeObjectMeta, cluster: &str) -> Self {
        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone().unwrap_or_default(),
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            cluster: Some(cluster.to_string()),
        }
    }

    /// Metadata for writing back to a member cluster
    pub fn to_kube(&self) -> KubeObjectMeta {
        KubeObjectMeta {
            name: Some(self.name.clone()),
            namespace: self.namespace.clone(),
            resource_version: (!self.resource_version.is_empty())
                .then(|| self.resource_version.clone()),
            labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
            annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
            creation_timestamp: self.creation_timestamp.map(Time),
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<SortKey> {
        match name {
            "name" => Some(SortKey::from(self.name.as_str())),
            "namespace" => Some(SortKey::from(self.namespace.as_deref())),
            "uid" => Some(SortKey::from(self.uid.as_str())),
            "creationTimestamp" => Some(SortKey::from(self.creation_timestamp)),
            _ => None,
        }
    }
}
