//! Core data models for the node agent

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Name of the flannel host network on Windows nodes
pub const DEFAULT_FLANNEL_NETWORK: &str = "flannel.4096";

/// Host operating system family the node runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Scheme prefix the kubelet expects on container runtime endpoints
    pub fn runtime_endpoint_prefix(&self) -> &'static str {
        match self {
            Platform::Linux => "unix://",
            Platform::Windows => "npipe://",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::Windows => f.write_str("windows"),
        }
    }
}

/// Error returned when a CIDR block cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR block {input:?}: {reason}")]
pub struct CidrParseError {
    input: String,
    reason: &'static str,
}

/// An IP network in `address/prefix` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpCidr {
    addr: IpAddr,
    prefix: u8,
}

impl IpCidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        (prefix <= max).then_some(Self { addr, prefix })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for IpCidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| CidrParseError {
            input: s.to_string(),
            reason,
        };

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| err("missing prefix length"))?;
        let addr: IpAddr = addr.parse().map_err(|_| err("invalid address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| err("invalid prefix length"))?;

        IpCidr::new(addr, prefix).ok_or_else(|| err("prefix length out of range"))
    }
}

impl TryFrom<String> for IpCidr {
    type Error = CidrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpCidr> for String {
    fn from(cidr: IpCidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for IpCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Node-level agent configuration consumed by the argument synthesizers
///
/// Built once when the agent starts and never mutated afterwards. Optional
/// fields that are unset simply omit the corresponding runtime argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Node name, passed as hostname override
    pub node_name: String,
    /// Primary node address
    pub node_ip: Option<IpAddr>,
    /// Node labels in `key=value` form
    pub node_labels: Vec<String>,
    /// Taints registered with the node, in order
    pub node_taints: Vec<String>,

    pub cluster_dns: Vec<IpAddr>,
    pub cluster_domain: String,
    pub cluster_cidrs: Vec<IpCidr>,

    /// Kubelet root directory; certificates live under `<root>/pki`
    pub root_dir: Option<PathBuf>,
    /// Static pod manifest directory
    pub pod_manifests: Option<PathBuf>,
    pub kubeconfig_kubelet: PathBuf,
    pub kubeconfig_kube_proxy: PathBuf,
    pub serving_kubelet_cert: Option<PathBuf>,
    pub serving_kubelet_key: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
    pub image_credential_provider_bin_dir: Option<PathBuf>,
    pub image_credential_provider_config: Option<PathBuf>,

    /// Container runtime socket, with or without its scheme prefix
    pub runtime_socket: Option<String>,

    /// Disable the external cloud-controller-manager integration
    pub disable_ccm: bool,
    pub protect_kernel_defaults: bool,

    pub listen_address: Option<String>,
    pub pause_image: Option<String>,
    pub resolv_conf: Option<PathBuf>,

    /// Feature gates already requested for the kubelet, e.g. `Foo=true`
    pub feature_gates: Vec<String>,

    /// Host network queried for the kube-proxy source VIP
    pub flannel_network_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            node_ip: None,
            node_labels: Vec::new(),
            node_taints: Vec::new(),
            cluster_dns: Vec::new(),
            cluster_domain: "cluster.local".to_string(),
            cluster_cidrs: Vec::new(),
            root_dir: None,
            pod_manifests: None,
            kubeconfig_kubelet: PathBuf::new(),
            kubeconfig_kube_proxy: PathBuf::new(),
            serving_kubelet_cert: None,
            serving_kubelet_key: None,
            client_ca: None,
            image_credential_provider_bin_dir: None,
            image_credential_provider_config: None,
            runtime_socket: None,
            disable_ccm: false,
            protect_kernel_defaults: false,
            listen_address: None,
            pause_image: None,
            resolv_conf: None,
            feature_gates: Vec::new(),
            flannel_network_name: DEFAULT_FLANNEL_NETWORK.to_string(),
        }
    }
}

impl AgentConfig {
    /// True when the configured node address is an IPv6 address
    pub fn is_ipv6_only(&self) -> bool {
        matches!(self.node_ip, Some(IpAddr::V6(_)))
    }

    /// Loopback address the runtime components bind their health endpoints to
    pub fn health_bind_address(&self) -> &'static str {
        if self.is_ipv6_only() {
            "::1"
        } else {
            "127.0.0.1"
        }
    }
}
