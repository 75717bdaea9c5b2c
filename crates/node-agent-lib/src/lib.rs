//! Node agent library
//!
//! This crate provides the core functionality for:
//! - Kubelet and kube-proxy argument synthesis
//! - Flannel CNI configuration selection
//! - Host network readiness and kube-proxy source VIP discovery
//! - Health checks and observability

pub mod args;
pub mod cni;
pub mod health;
pub mod models;
pub mod network;
pub mod observability;

pub use args::{kube_proxy_args, kube_proxy_base_args, kubelet_args, ArgumentMap, KubeProxyArgs};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use network::{NetworkReadinessPoller, PollConfig, PollOutcome};
pub use observability::{AgentMetrics, StructuredLogger};
