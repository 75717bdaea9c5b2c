//! Host network readiness and kube-proxy source VIP discovery
//!
//! On Windows nodes kube-proxy runs in kernel-space mode and needs a source
//! VIP taken from the flannel host network's subnet. This module provides:
//! - Capability traits for querying the host network and resolving the VIP
//! - A cancellable poller that waits for the network to be provisioned
//! - Process-backed adapters for HNS (via PowerShell) and host-local IPAM

mod hns;
mod poller;
mod source_vip;

pub use hns::PowerShellHns;
pub use poller::{NetworkReadinessPoller, PollConfig, PollOutcome};
pub use source_vip::{parse_ipam_result, HostLocalIpamConfig, HostLocalIpamResolver};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A virtual network as reported by the host network subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNetwork {
    pub name: String,
    /// Empty until the network has been fully provisioned
    pub management_ip: String,
    /// Address prefixes in `address/prefix` form
    pub subnets: Vec<String>,
}

/// Errors from querying the host network subsystem
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("host network {0:?} not found")]
    NotFound(String),

    #[error("host network query failed: {0}")]
    Query(String),

    #[error("failed to run host network query: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed host network record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors from resolving the kube-proxy source VIP
#[derive(Debug, thiserror::Error)]
pub enum SourceVipError {
    #[error("host network {0:?} has no subnets")]
    NoSubnet(String),

    #[error("IPAM plugin exited with {status}: {stderr}")]
    PluginFailed { status: String, stderr: String },

    #[error("source VIP cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed IPAM result: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid source VIP address {0:?}")]
    InvalidAddress(String),
}

/// Looks up host networks by name
#[async_trait]
pub trait HostNetworkService: Send + Sync {
    async fn network_by_name(&self, name: &str) -> Result<HostNetwork, NetworkError>;
}

/// Allocates the source VIP for a provisioned host network
#[async_trait]
pub trait SourceVipResolver: Send + Sync {
    async fn resolve_source_vip(&self, network: &HostNetwork) -> Result<IpAddr, SourceVipError>;
}
