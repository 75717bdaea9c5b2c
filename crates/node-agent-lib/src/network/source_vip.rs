//! Source VIP allocation through the host-local IPAM plugin
//!
//! Runs the plugin once with CNI ADD semantics against the first subnet of
//! the host network and caches the plugin result, so later starts reuse the
//! same address instead of allocating a new one.

use super::{HostNetwork, SourceVipError, SourceVipResolver};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::borrow::Cow;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REQUEST_FILE: &str = "sourceVipRequest.json";
const RESULT_FILE: &str = "sourceVip.json";

/// Configuration for the host-local IPAM resolver
#[derive(Debug, Clone)]
pub struct HostLocalIpamConfig {
    /// Path to the host-local plugin binary
    pub plugin_path: PathBuf,
    /// Directory holding the request and cached result
    pub cache_dir: PathBuf,
    /// host-local allocation state directory
    pub data_dir: String,
    /// CNI network name used for the allocation
    pub ipam_network_name: String,
}

impl Default for HostLocalIpamConfig {
    fn default() -> Self {
        Self {
            plugin_path: PathBuf::from("host-local.exe"),
            cache_dir: PathBuf::from(r"C:\k"),
            data_dir: "/var/lib/cni/networks".to_string(),
            ipam_network_name: "vxlan0".to_string(),
        }
    }
}

/// Resolves the source VIP by invoking the host-local IPAM plugin
pub struct HostLocalIpamResolver {
    config: HostLocalIpamConfig,
    // Serializes the cache check and allocation within this process
    lock: Mutex<()>,
}

impl HostLocalIpamResolver {
    pub fn new(config: HostLocalIpamConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config.cache_dir.join(RESULT_FILE)
    }

    fn ipam_request(&self, subnet: &str) -> serde_json::Value {
        json!({
            "cniVersion": "0.2.0",
            "name": self.config.ipam_network_name,
            "ipam": {
                "type": "host-local",
                "ranges": [[{ "subnet": subnet }]],
                "dataDir": self.config.data_dir,
            }
        })
    }

    async fn allocate(&self, network: &HostNetwork) -> Result<Vec<u8>, SourceVipError> {
        let subnet = network
            .subnets
            .first()
            .ok_or_else(|| SourceVipError::NoSubnet(network.name.clone()))?;

        let request = serde_json::to_vec(&self.ipam_request(subnet))?;
        fs::create_dir_all(&self.config.cache_dir).await?;
        fs::write(self.config.cache_dir.join(REQUEST_FILE), &request).await?;

        debug!(
            plugin = %self.config.plugin_path.display(),
            subnet = %subnet,
            "Allocating source VIP"
        );

        let mut child = Command::new(&self.config.plugin_path)
            .env("CNI_COMMAND", "ADD")
            .env("CNI_CONTAINERID", "dummy")
            .env("CNI_NETNS", "dummy")
            .env("CNI_IFNAME", "dummy")
            .env("CNI_PATH", "dummy")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SourceVipError::PluginFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn read_cached(path: &Path) -> Result<Option<Vec<u8>>, SourceVipError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SourceVipResolver for HostLocalIpamResolver {
    async fn resolve_source_vip(&self, network: &HostNetwork) -> Result<IpAddr, SourceVipError> {
        let _guard = self.lock.lock().await;
        let cache = self.cache_path();

        if let Some(cached) = Self::read_cached(&cache).await? {
            match parse_ipam_result(&cached) {
                Ok(vip) => {
                    debug!(path = %cache.display(), vip = %vip, "Using cached source VIP allocation");
                    return Ok(vip);
                }
                Err(e) => {
                    warn!(path = %cache.display(), error = %e, "Discarding unreadable source VIP cache");
                    if let Err(e) = fs::remove_file(&cache).await {
                        warn!(path = %cache.display(), error = %e, "Failed to remove source VIP cache");
                    }
                }
            }
        }

        // Only a result that parses is cached
        let allocated = self.allocate(network).await?;
        let vip = parse_ipam_result(&allocated)?;
        fs::write(&cache, &allocated).await?;
        info!(path = %cache.display(), network = %network.name, vip = %vip, "Cached source VIP allocation");

        Ok(vip)
    }
}

#[derive(Debug, Deserialize)]
struct IpamResult {
    ip4: IpamIp4,
}

#[derive(Debug, Deserialize)]
struct IpamIp4 {
    ip: String,
}

/// Extract the address from a CNI 0.2.0 IPAM result (`ip4.ip` is
/// `address/prefixlen`)
///
/// Accepts UTF-8 with or without a byte order mark, and UTF-16 with one,
/// which is what PowerShell's `Out-File` produces.
pub fn parse_ipam_result(raw: &[u8]) -> Result<IpAddr, SourceVipError> {
    let text = decode_text(raw);
    let result: IpamResult = serde_json::from_str(&text)?;
    let address = result
        .ip4
        .ip
        .split('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(['\r', '\n']);

    address
        .parse()
        .map_err(|_| SourceVipError::InvalidAddress(address.to_string()))
}

fn decode_text(raw: &[u8]) -> Cow<'_, str> {
    let utf16 = |bytes: &[u8], unit: fn([u8; 2]) -> u16| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();
        Cow::Owned(String::from_utf16_lossy(&units))
    };

    match raw {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8_lossy(raw),
    }
}
