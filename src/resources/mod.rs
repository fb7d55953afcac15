//! Per-cluster resource access
//!
//! Every kind is read through the cluster registry and returned in gateway
//! form. Lists share one contract (see [`list`]): filter, sort over the full
//! filtered set, then cut the page.

pub mod accelerator;
pub mod core;
pub mod credential;
pub mod list;
pub mod meta;
pub mod node;
pub mod quantity;
pub mod quota;
pub mod selector;
pub mod service;
pub mod storage;

pub use list::{ListOptions, ListQuery, Listable, Page, Pagination, SortKey};
pub use meta::{Condition, ObjectMeta};
pub use selector::{FieldSelector, LabelSelector};
pub use service::ResourceService;
