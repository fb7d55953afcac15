//! Kantaloupe resource gateway
//!
//! One HTTP API over many Kubernetes clusters: a cluster registry, uniform
//! resource listing, cross-cluster aggregation and a facade over the
//! Kantaloupeflow workload controller.

pub mod aggregate;
pub mod backend;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod resources;
pub mod server;
pub mod validation;
pub mod workload;
