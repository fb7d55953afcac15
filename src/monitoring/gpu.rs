//! Per-card GPU readings
//!
//! Exporters disagree on the label that carries the device id, so a card is
//! identified by the first of `UUID`, `deviceuuid`, `uuid` or `vdie_id`
//! present on a sample. Readings from different metric families are joined
//! on that id.

use std::collections::HashMap;

use serde::Serialize;

use super::{Sample, Selector};

pub const UUID_LABELS: [&str; 4] = ["UUID", "deviceuuid", "uuid", "vdie_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpuReading {
    Temp,
    Power,
    Errors,
    CoreTotal,
    CoreAllocated,
    CoreUsed,
    MemTotal,
    MemAllocated,
    MemUsed,
}

impl GpuReading {
    pub const ALL: [GpuReading; 9] = [
        GpuReading::Temp,
        GpuReading::Power,
        GpuReading::Errors,
        GpuReading::CoreTotal,
        GpuReading::CoreAllocated,
        GpuReading::CoreUsed,
        GpuReading::MemTotal,
        GpuReading::MemAllocated,
        GpuReading::MemUsed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GpuReading::Temp => "temp",
            GpuReading::Power => "power",
            GpuReading::Errors => "errors",
            GpuReading::CoreTotal => "core_total",
            GpuReading::CoreAllocated => "core_allocated",
            GpuReading::CoreUsed => "core_used",
            GpuReading::MemTotal => "mem_total",
            GpuReading::MemAllocated => "mem_allocated",
            GpuReading::MemUsed => "mem_used",
        }
    }

    pub fn metric(self) -> String {
        format!("kantaloupe_gpu_{}", self.as_str())
    }
}

/// Restricts GPU queries; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuFilter {
    pub node: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub uuid: Option<String>,
}

impl GpuFilter {
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            ..Default::default()
        }
    }

    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Default::default()
        }
    }

    pub fn apply(&self, mut selector: Selector) -> Selector {
        let pairs = [
            ("node", &self.node),
            ("vendor", &self.vendor),
            ("modelName", &self.model),
            ("UUID", &self.uuid),
        ];
        for (label, value) in pairs {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                selector = selector.eq(label, v);
            }
        }
        selector
    }
}

pub fn card_uuid(sample: &Sample) -> Option<&str> {
    UUID_LABELS
        .iter()
        .find_map(|l| sample.label(l))
        .filter(|v| !v.is_empty())
}

/// Everything known about one card at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardReading {
    pub uuid: String,
    pub node: String,
    pub model: String,
    pub vendor: String,
    pub temperature: f64,
    pub power: f64,
    pub errors: f64,
    pub core_total: Option<f64>,
    pub core_allocated: f64,
    pub core_used: f64,
    pub mem_total: Option<f64>,
    pub mem_allocated: f64,
    pub mem_used: f64,
}

impl CardReading {
    /// Memory used as a percentage of the card's memory
    pub fn mem_usage_percent(&self) -> f64 {
        match self.mem_total {
            Some(total) if total > 0.0 => self.mem_used / total * 100.0,
            _ => 0.0,
        }
    }
}

/// Join readings into cards, one per sample of `base`
pub fn assemble(base: GpuReading, vectors: &HashMap<GpuReading, Vec<Sample>>) -> Vec<CardReading> {
    let index: HashMap<GpuReading, HashMap<&str, f64>> = vectors
        .iter()
        .map(|(reading, samples)| {
            let by_uuid = samples
                .iter()
                .filter_map(|s| card_uuid(s).map(|u| (u, s.value)))
                .collect();
            (*reading, by_uuid)
        })
        .collect();
    let lookup = |reading: GpuReading, uuid: &str| {
        index.get(&reading).and_then(|m| m.get(uuid)).copied()
    };

    let Some(base_samples) = vectors.get(&base) else {
        return Vec::new();
    };
    base_samples
        .iter()
        .filter_map(|sample| {
            let uuid = card_uuid(sample)?;
            let temperature = lookup(GpuReading::Temp, uuid).unwrap_or(0.0);
            Some(CardReading {
                uuid: uuid.to_string(),
                node: sample.label("node").unwrap_or_default().to_string(),
                model: sample.label("modelName").unwrap_or_default().to_string(),
                vendor: sample.label("vendor").unwrap_or_default().to_string(),
                // Exporters report -1 when the sensor is unavailable.
                temperature: if temperature < 0.0 { 0.0 } else { temperature },
                power: lookup(GpuReading::Power, uuid).unwrap_or(0.0),
                errors: lookup(GpuReading::Errors, uuid).unwrap_or(0.0),
                core_total: lookup(GpuReading::CoreTotal, uuid),
                core_allocated: lookup(GpuReading::CoreAllocated, uuid).unwrap_or(0.0),
                core_used: lookup(GpuReading::CoreUsed, uuid).unwrap_or(0.0),
                mem_total: lookup(GpuReading::MemTotal, uuid),
                mem_allocated: lookup(GpuReading::MemAllocated, uuid).unwrap_or(0.0),
                mem_used: lookup(GpuReading::MemUsed, uuid).unwrap_or(0.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::Labels;

    fn sample(pairs: &[(&str, &str)], value: f64) -> Sample {
        Sample {
            labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Labels>(),
            value,
        }
    }

    #[test]
    fn test_uuid_label_fallbacks() {
        assert_eq!(card_uuid(&sample(&[("UUID", "a")], 1.0)), Some("a"));
        assert_eq!(card_uuid(&sample(&[("deviceuuid", "b")], 1.0)), Some("b"));
        assert_eq!(card_uuid(&sample(&[("vdie_id", "c")], 1.0)), Some("c"));
        assert_eq!(card_uuid(&sample(&[("node", "n")], 1.0)), None);
    }

    #[test]
    fn test_assemble_joins_on_uuid() {
        let mut vectors = HashMap::new();
        vectors.insert(
            GpuReading::Temp,
            vec![
                sample(&[("UUID", "gpu-0"), ("node", "n1"), ("modelName", "A100")], -1.0),
                sample(&[("UUID", "gpu-1"), ("node", "n1"), ("modelName", "A100")], 55.0),
            ],
        );
        vectors.insert(GpuReading::MemTotal, vec![sample(&[("uuid", "gpu-1")], 80.0)]);
        vectors.insert(GpuReading::MemUsed, vec![sample(&[("UUID", "gpu-1")], 20.0)]);

        let cards = assemble(GpuReading::Temp, &vectors);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].temperature, 0.0);
        assert_eq!(cards[0].mem_total, None);
        assert_eq!(cards[1].temperature, 55.0);
        assert_eq!(cards[1].mem_usage_percent(), 25.0);
        assert_eq!(cards[1].model, "A100");
    }

    #[test]
    fn test_filter_builds_matchers() {
        let filter = GpuFilter {
            node: Some("n1".into()),
            model: Some(String::new()),
            ..Default::default()
        };
        let s = filter.apply(Selector::new(GpuReading::Temp.metric()).eq("cluster", "c"));
        assert_eq!(s.to_string(), r#"kantaloupe_gpu_temp{cluster="c",node="n1"}"#);
    }
}
