//! Cluster registry
//!
//! Member clusters are integrated from a kubeconfig, kept in a
//! copy-on-write registry, and probed on an interval. A cluster whose
//! probes keep failing turns `UNHEALTH` but stays registered; only an
//! explicit delete removes it.
//!
//! ## Core Types
//!
//! - [`types::Cluster`]: the gateway's view of one member cluster
//! - [`registry::ClusterRegistry`]: name-keyed snapshots plus kubeconfig secrets
//! - [`service::ClusterService`]: integrate, update, delete, get, list
//! - [`health`]: periodic readiness probes

pub mod health;
pub mod kubeconfig;
pub mod registry;
pub mod service;
pub mod types;

pub use health::HealthCheckerConfig;
pub use registry::{ClusterEntry, ClusterRegistry};
pub use service::{ClusterFilters, ClusterService};
pub use types::{Cluster, ClusterProvider, ClusterState, ClusterType};
