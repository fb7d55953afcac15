//! Accelerators bound to a flow's pod
//!
//! HAMi records what it bound on the pod itself, one annotation per device
//! family. Each holds `uuid,vendor,memory,core:` entries; a `;` ends the
//! entries of one container.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;

use super::types::Gpu;
use crate::cluster::types::ClusterType;
use crate::error::{GatewayError, GatewayResult};

pub const NVIDIA_ALLOCATED_ANNOTATION: &str = "hami.io/vgpu-devices-allocated";
pub const NEURON_ALLOCATED_ANNOTATION: &str = "hami.io/aws-neuron-devices-allocated";
/// Suffix shared by every family's allocation annotation
pub const ALLOCATED_SUFFIX: &str = "-devices-allocated";
pub const METAX_VMEMORY: &str = "metax-tech.com/vmemory";
pub const METAX_VCORE: &str = "metax-tech.com/vcore";

/// One entry of an allocation annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub uuid: String,
    pub vendor: String,
    /// MiB
    pub memory: i64,
    /// Percent of the card
    pub core: i64,
}

fn field<T: std::str::FromStr>(entry: &str, raw: &str) -> GatewayResult<T> {
    raw.trim().parse().map_err(|_| {
        GatewayError::Internal(format!("malformed device allocation entry '{}'", entry))
    })
}

/// Decode an allocation annotation
pub fn parse_allocations(raw: &str) -> GatewayResult<Vec<Allocation>> {
    let mut out = Vec::new();
    for container in raw.split(';') {
        for entry in container.split(':').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(',').collect();
            let [uuid, vendor, memory, core] = parts.as_slice() else {
                return Err(GatewayError::Internal(format!(
                    "malformed device allocation entry '{}'",
                    entry
                )));
            };
            out.push(Allocation {
                uuid: uuid.to_string(),
                vendor: vendor.to_string(),
                memory: field(entry, memory)?,
                core: field(entry, core)?,
            });
        }
    }
    Ok(out)
}

/// Share of one card from a device-plugin core percentage
fn core_share(percent: f64) -> f64 {
    percent / 100.0
}

fn annotations(pod: &Pod) -> BTreeMap<String, String> {
    pod.metadata.annotations.clone().unwrap_or_default()
}

/// GPUs recorded on the pod for the cluster's device family
///
/// MetaX pods carry no allocation annotation; their card comes from
/// metrics and only the sizes are read here, see [`metax_limits`].
pub fn pod_gpus(pod: &Pod, cluster_type: Option<ClusterType>) -> GatewayResult<Vec<Gpu>> {
    let annotations = annotations(pod);
    match cluster_type {
        Some(ClusterType::Nvidia) => {
            let Some(raw) = annotations.get(NVIDIA_ALLOCATED_ANNOTATION) else {
                return Ok(Vec::new());
            };
            Ok(parse_allocations(raw)?
                .into_iter()
                .map(|a| Gpu {
                    uuid: a.uuid,
                    model: String::new(),
                    memory: a.memory,
                    core: core_share(a.core as f64),
                })
                .collect())
        }
        Some(ClusterType::Neuron) => {
            let Some(raw) = annotations.get(NEURON_ALLOCATED_ANNOTATION) else {
                return Ok(Vec::new());
            };
            Ok(parse_allocations(raw)?
                .into_iter()
                .map(|a| Gpu {
                    uuid: a.uuid,
                    model: a.vendor,
                    memory: a.memory,
                    core: core_share(a.core as f64),
                })
                .collect())
        }
        Some(ClusterType::Ascend) => {
            let mut gpus = Vec::new();
            for (_, raw) in annotations.iter().filter(|(k, _)| k.contains(ALLOCATED_SUFFIX)) {
                gpus.extend(parse_allocations(raw)?.into_iter().map(|a| Gpu {
                    uuid: a.uuid,
                    model: a.vendor,
                    memory: a.memory,
                    core: 0.0,
                }));
            }
            Ok(gpus)
        }
        _ => Ok(Vec::new()),
    }
}

/// `(vmemory, vcore)` limits of the pod's first container, vcore as a card share
pub fn metax_limits(pod: &Pod) -> (i64, f64) {
    let limits = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.clone())
        .unwrap_or_default();
    let read = |key: &str| {
        limits
            .get(key)
            .and_then(|q| crate::resources::quantity::parse_quantity(&q.0).ok())
            .unwrap_or(0.0)
    };
    (read(METAX_VMEMORY) as i64, core_share(read(METAX_VCORE)))
}

/// Per-device GPU memory HAMi bound to the pod; every device gets the same amount
pub fn allocated_memory(pod: &Pod) -> GatewayResult<Option<i64>> {
    match annotations(pod).get(NVIDIA_ALLOCATED_ANNOTATION) {
        None => Ok(None),
        Some(raw) => {
            let allocations = parse_allocations(raw)?;
            Ok(allocations.first().map(|a| a.memory))
        }
    }
}

/// UUIDs of the NVIDIA devices bound to the pod
pub fn bound_cards(pod: &Pod) -> GatewayResult<Vec<String>> {
    match annotations(pod).get(NVIDIA_ALLOCATED_ANNOTATION) {
        None => Ok(Vec::new()),
        Some(raw) => Ok(parse_allocations(raw)?.into_iter().map(|a| a.uuid).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(annotations: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "train-0", "namespace": "team-a", "annotations": annotations},
            "spec": {"containers": [{
                "name": "main",
                "resources": {"limits": {"metax-tech.com/vmemory": "8", "metax-tech.com/vcore": "50"}}
            }]}
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_allocations() {
        let got = parse_allocations("GPU-a,NVIDIA,4096,30:GPU-b,NVIDIA,2048,10:;").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].uuid, "GPU-a");
        assert_eq!(got[1].memory, 2048);

        let two_containers = parse_allocations("GPU-a,NVIDIA,1,1:;GPU-b,NVIDIA,2,2:;").unwrap();
        assert_eq!(two_containers.len(), 2);

        assert!(parse_allocations("").unwrap().is_empty());
        assert!(parse_allocations("GPU-a,NVIDIA,lots,1:;").is_err());
        assert!(parse_allocations("GPU-a,NVIDIA:;").is_err());
    }

    #[test]
    fn test_pod_gpus_by_family() {
        let p = pod(json!({NVIDIA_ALLOCATED_ANNOTATION: "GPU-a,NVIDIA,4096,30:;"}));
        let gpus = pod_gpus(&p, Some(ClusterType::Nvidia)).unwrap();
        assert_eq!(gpus[0].memory, 4096);
        assert!((gpus[0].core - 0.3).abs() < 1e-9);
        assert_eq!(allocated_memory(&p).unwrap(), Some(4096));
        assert_eq!(bound_cards(&p).unwrap(), vec!["GPU-a".to_string()]);

        let p = pod(json!({NEURON_ALLOCATED_ANNOTATION: "nc-0,Inferentia,16384,50:;"}));
        let gpus = pod_gpus(&p, Some(ClusterType::Neuron)).unwrap();
        assert_eq!(gpus[0].model, "Inferentia");
        assert!((gpus[0].core - 0.5).abs() < 1e-9);

        let p = pod(json!({"hami.io/Ascend910B-devices-allocated": "npu-0,Ascend910B,65536,0:;"}));
        let gpus = pod_gpus(&p, Some(ClusterType::Ascend)).unwrap();
        assert_eq!(gpus[0].model, "Ascend910B");

        assert!(pod_gpus(&p, Some(ClusterType::Cambricon)).unwrap().is_empty());
        assert_eq!(allocated_memory(&p).unwrap(), None);
    }

    #[test]
    fn test_metax_limits() {
        let p = pod(json!({}));
        assert_eq!(metax_limits(&p), (8, 0.5));
    }
}
