//! Agent settings
//!
//! Read from an optional YAML/JSON/TOML file (`NODE_AGENT_CONFIG`, default
//! `/etc/node-agent/config.yaml`) and overlaid with `NODE_AGENT__*`
//! environment variables, e.g. `NODE_AGENT__NODE__NODE_NAME=worker-1` or
//! `NODE_AGENT__NODE__CLUSTER_DNS=10.43.0.10,fd00:43::a`.

use anyhow::{ensure, Context, Result};
use node_agent_lib::cni::{CniVersion, DescriptorVariant};
use node_agent_lib::network::HostLocalIpamConfig;
use node_agent_lib::{AgentConfig, PollConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "NODE_AGENT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/node-agent/config.yaml";
const ENV_PREFIX: &str = "NODE_AGENT";

/// Keys whose environment values are comma separated lists
const LIST_KEYS: &[&str] = &[
    "node.node_labels",
    "node.node_taints",
    "node.cluster_dns",
    "node.cluster_cidrs",
    "node.feature_gates",
];

/// Agent settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// API server port for health/metrics/arguments
    pub api_port: u16,

    /// Directory the `kubelet.args` and `kube-proxy.args` files are written to
    pub args_dir: Option<PathBuf>,

    /// Where to write the selected CNI configuration
    pub cni_conf_path: Option<PathBuf>,

    /// CNI spec version negotiated with the runtime
    pub cni_version: CniVersion,

    pub cni_variant: DescriptorVariant,

    /// Wait for the flannel host network and allocate a source VIP before
    /// building the kube-proxy arguments
    pub source_vip_discovery: bool,

    /// Seconds between host network queries
    pub poll_interval_secs: u64,

    /// Give up after this many host network queries
    pub poll_max_attempts: Option<u32>,

    /// Give up after this many seconds
    pub poll_deadline_secs: Option<u64>,

    /// PowerShell executable used for HNS queries
    pub powershell: PathBuf,

    /// host-local IPAM plugin binary
    pub ipam_plugin_path: PathBuf,

    /// Directory for the source VIP request and cached result
    pub source_vip_cache_dir: PathBuf,

    /// Node configuration handed to the argument synthesizers
    pub node: AgentConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let ipam = HostLocalIpamConfig::default();
        Self {
            api_port: 8080,
            args_dir: None,
            cni_conf_path: None,
            cni_version: CniVersion::V0_3_1,
            cni_variant: DescriptorVariant::Baseline,
            source_vip_discovery: cfg!(windows),
            poll_interval_secs: 5,
            poll_max_attempts: None,
            poll_deadline_secs: None,
            powershell: PathBuf::from("powershell.exe"),
            ipam_plugin_path: ipam.plugin_path,
            source_vip_cache_dir: ipam.cache_dir,
            node: AgentConfig::default(),
        }
    }
}

impl AgentSettings {
    /// Load settings from the configured file and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(Path::new(&path))
    }

    /// Load settings from `path` (if it exists) and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_with(path, Self::environment())
    }

    /// `NODE_AGENT__` overlay with `__` nesting and comma separated lists
    fn environment() -> config::Environment {
        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        environment
    }

    fn load_with(path: &Path, environment: config::Environment) -> Result<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read settings from {}", path.display()))?
            .try_deserialize()
            .context("Invalid agent settings")?;

        settings.finish()
    }

    fn finish(mut self) -> Result<Self> {
        ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");

        if self.node.node_name.is_empty() {
            if let Ok(name) = std::env::var("NODE_NAME") {
                self.node.node_name = name;
            }
        }

        Ok(self)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
            deadline: self.poll_deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn ipam_config(&self) -> HostLocalIpamConfig {
        HostLocalIpamConfig {
            plugin_path: self.ipam_plugin_path.clone(),
            cache_dir: self.source_vip_cache_dir.clone(),
            ..HostLocalIpamConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = AgentSettings::load_from(Path::new("/nonexistent/node-agent.yaml")).unwrap();

        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.cni_version, CniVersion::V0_3_1);
        assert_eq!(settings.poll_interval_secs, 5);
        assert_eq!(settings.node.cluster_domain, "cluster.local");
        assert_eq!(settings.node.flannel_network_name, "flannel.4096");
    }

    #[test]
    fn test_file_settings() {
        let file = yaml(
            r#"
api_port: 9100
args_dir: /var/lib/node-agent/args
cni_version: "1.0.0"
cni_variant: extended
source_vip_discovery: true
poll_max_attempts: 60
node:
  node_name: win-worker-1
  node_ip: 10.0.0.7
  cluster_dns: ["10.43.0.10"]
  cluster_cidrs: ["10.42.0.0/16", "10.43.0.0/16"]
  disable_ccm: true
"#,
        );

        let settings = AgentSettings::load_from(file.path()).unwrap();

        assert_eq!(settings.api_port, 9100);
        assert_eq!(
            settings.args_dir.as_deref(),
            Some(Path::new("/var/lib/node-agent/args"))
        );
        assert_eq!(settings.cni_version, CniVersion::V1_0_0);
        assert_eq!(settings.cni_variant, DescriptorVariant::Extended);
        assert!(settings.source_vip_discovery);
        assert_eq!(settings.node.node_name, "win-worker-1");
        assert_eq!(settings.node.node_ip, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(settings.node.cluster_cidrs.len(), 2);
        assert!(settings.node.disable_ccm);

        let poll = settings.poll_config();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.max_attempts, Some(60));
        assert_eq!(poll.deadline, None);
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentSettings::environment().source(Some(vars))
    }

    #[test]
    fn test_environment_lists_overlay_file() {
        let file = yaml(
            r#"
node:
  node_name: win-worker-1
  cluster_dns: ["10.43.0.10"]
"#,
        );
        let env = environment(&[
            ("NODE_AGENT__NODE__CLUSTER_DNS", "10.43.0.10,fd00:43::a"),
            ("NODE_AGENT__NODE__NODE_LABELS", "tier=edge,zone=a"),
            ("NODE_AGENT__NODE__CLUSTER_CIDRS", "10.42.0.0/16"),
            ("NODE_AGENT__API_PORT", "9200"),
        ]);

        let settings = AgentSettings::load_with(file.path(), env).unwrap();

        assert_eq!(settings.api_port, 9200);
        assert_eq!(settings.node.node_name, "win-worker-1");
        assert_eq!(
            settings.node.cluster_dns,
            vec![
                "10.43.0.10".parse::<std::net::IpAddr>().unwrap(),
                "fd00:43::a".parse().unwrap()
            ]
        );
        assert_eq!(settings.node.node_labels, vec!["tier=edge", "zone=a"]);
        assert_eq!(settings.node.cluster_cidrs.len(), 1);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let file = yaml("poll_interval_secs: 0\n");
        assert!(AgentSettings::load_from(file.path()).is_err());
    }

    #[test]
    fn test_ipam_config_overrides_paths_only() {
        let settings = AgentSettings {
            ipam_plugin_path: PathBuf::from(r"C:\opt\cni\bin\host-local.exe"),
            source_vip_cache_dir: PathBuf::from(r"C:\var\lib\agent"),
            ..Default::default()
        };
        let ipam = settings.ipam_config();

        assert_eq!(ipam.plugin_path, PathBuf::from(r"C:\opt\cni\bin\host-local.exe"));
        assert_eq!(ipam.cache_dir, PathBuf::from(r"C:\var\lib\agent"));
        assert_eq!(ipam.ipam_network_name, "vxlan0");
    }
}
