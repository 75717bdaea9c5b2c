//! Host Network Service lookups through PowerShell

use super::{HostNetwork, HostNetworkService, NetworkError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Queries HNS with the `Get-HnsNetwork` cmdlet
#[derive(Debug, Clone)]
pub struct PowerShellHns {
    powershell: PathBuf,
}

impl Default for PowerShellHns {
    fn default() -> Self {
        Self::new("powershell.exe")
    }
}

impl PowerShellHns {
    pub fn new(powershell: impl Into<PathBuf>) -> Self {
        Self {
            powershell: powershell.into(),
        }
    }

    fn query_script(name: &str) -> String {
        // PowerShell single-quoted strings escape ' by doubling it
        let name = name.to_lowercase().replace('\'', "''");
        format!(
            "Get-HnsNetwork | Where-Object {{ $_.Name -eq '{}' }} | Select-Object -First 1 | ConvertTo-Json -Depth 4",
            name
        )
    }
}

// ConvertTo-Json writes unset properties as null, so every field is optional
#[derive(Debug, Deserialize)]
struct HnsNetworkRecord {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "ManagementIP", default)]
    management_ip: Option<String>,
    #[serde(rename = "Subnets", default)]
    subnets: Option<Vec<HnsSubnet>>,
}

#[derive(Debug, Deserialize)]
struct HnsSubnet {
    #[serde(rename = "AddressPrefix", default)]
    address_prefix: Option<String>,
}

/// Decode the JSON `Get-HnsNetwork` prints for a single network
pub(crate) fn parse_network_record(name: &str, output: &[u8]) -> Result<HostNetwork, NetworkError> {
    let text = String::from_utf8_lossy(output);
    let text = text.trim();
    if text.is_empty() {
        return Err(NetworkError::NotFound(name.to_string()));
    }

    let record: HnsNetworkRecord = serde_json::from_str(text)?;
    Ok(HostNetwork {
        name: record
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| name.to_string()),
        management_ip: record.management_ip.unwrap_or_default(),
        subnets: record
            .subnets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.address_prefix)
            .filter(|p| !p.is_empty())
            .collect(),
    })
}

#[async_trait]
impl HostNetworkService for PowerShellHns {
    async fn network_by_name(&self, name: &str) -> Result<HostNetwork, NetworkError> {
        let output = Command::new(&self.powershell)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::query_script(name))
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(NetworkError::Query(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(network = %name, bytes = output.stdout.len(), "Received HNS network record");
        parse_network_record(name, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provisioned_network() {
        let json = br#"{
            "ActivityId": "5B8E2C2E-0000-0000-0000-000000000000",
            "Name": "flannel.4096",
            "Type": "Overlay",
            "ManagementIP": "192.168.1.20",
            "Subnets": [
                {"AddressPrefix": "10.42.3.0/24", "GatewayAddress": "10.42.3.1"}
            ]
        }"#;

        let network = parse_network_record("flannel.4096", json).unwrap();
        assert_eq!(network.name, "flannel.4096");
        assert_eq!(network.management_ip, "192.168.1.20");
        assert_eq!(network.subnets, vec!["10.42.3.0/24"]);
    }

    #[test]
    fn test_parse_network_without_management_ip() {
        let json = br#"{"Name": "flannel.4096", "Subnets": []}"#;

        let network = parse_network_record("flannel.4096", json).unwrap();
        assert!(network.management_ip.is_empty());
        assert!(network.subnets.is_empty());
    }

    #[test]
    fn test_parse_network_with_null_fields() {
        let json = br#"{"Name": null, "ManagementIP": null, "Subnets": null}"#;

        let network = parse_network_record("flannel.4096", json).unwrap();
        assert_eq!(network.name, "flannel.4096");
        assert!(network.management_ip.is_empty());
        assert!(network.subnets.is_empty());

        let json = br#"{"Name": "flannel.4096", "ManagementIP": "192.168.1.20",
            "Subnets": [{"AddressPrefix": null}, {"AddressPrefix": "10.42.3.0/24"}]}"#;
        let network = parse_network_record("flannel.4096", json).unwrap();
        assert_eq!(network.subnets, vec!["10.42.3.0/24"]);
    }

    #[test]
    fn test_empty_output_is_not_found() {
        let err = parse_network_record("flannel.4096", b"\r\n").unwrap_err();
        assert!(matches!(err, NetworkError::NotFound(name) if name == "flannel.4096"));
    }

    #[test]
    fn test_query_script_escapes_name() {
        let script = PowerShellHns::query_script("Flannel'4096");
        assert!(script.contains("'flannel''4096'"));
    }
}
