//! Kantaloupeflow workloads
//!
//! A Kantaloupeflow is a custom resource the in-cluster controller turns
//! into a Deployment or Pod. The gateway validates and defaults the spec,
//! reports the accelerators HAMi bound to the flow's pod, and guards
//! in-place GPU memory resizes against card capacity and namespace quota.

pub mod gpu;
pub mod service;
pub mod types;

pub use service::FlowService;
pub use types::{FlowState, Kantaloupeflow};
