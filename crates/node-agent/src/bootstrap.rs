//! Startup steps that turn synthesized state into files and health updates

use anyhow::{bail, Context, Result};
use node_agent_lib::args::HostInterface;
use node_agent_lib::cni::{self, CniVersion, DescriptorVariant, NetworkDescriptor};
use node_agent_lib::health::{Component, HealthRegistry};
use node_agent_lib::{AgentConfig, ArgumentMap, KubeProxyArgs, Platform, PollOutcome};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::info;

/// Write `<dir>/<component>.args` with one `--key=value` flag per line
pub fn write_args_file(dir: &Path, component: &str, args: &ArgumentMap) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create args directory {}", dir.display()))?;

    let path = dir.join(format!("{}.args", component));
    let mut contents = args.to_flags().join("\n");
    contents.push('\n');
    fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(component = %component, path = %path.display(), "Wrote runtime arguments");
    Ok(path)
}

/// Pick the CNI document for this node and fill in its provider address
pub fn cni_document(
    platform: Platform,
    version: CniVersion,
    variant: DescriptorVariant,
    node: &AgentConfig,
    host: &dyn HostInterface,
) -> Result<(&'static NetworkDescriptor, String)> {
    let descriptor = cni::select(platform, version, variant)?;

    if !descriptor.has_placeholder() {
        return Ok((descriptor, descriptor.text.to_string()));
    }

    let provider = provider_address(node, host)?;
    Ok((descriptor, descriptor.render(provider)))
}

fn provider_address(node: &AgentConfig, host: &dyn HostInterface) -> Result<Ipv4Addr> {
    if let Some(IpAddr::V4(addr)) = node.node_ip {
        return Ok(addr);
    }

    match host
        .default_address(false)
        .context("No IPv4 node address for the CNI provider address")?
    {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(addr) => bail!("Default interface address {} is not IPv4", addr),
    }
}

pub fn write_cni_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// The kube-proxy arguments to publish, or `None` when shutdown cancelled
/// the source VIP wait
///
/// Arguments from a cancelled wait lack `source-vip` only because the agent
/// is stopping, so they are neither written nor reported.
pub fn kube_proxy_publication(proxy: KubeProxyArgs) -> Option<ArgumentMap> {
    match proxy.source_vip {
        PollOutcome::Cancelled => None,
        _ => Some(proxy.args),
    }
}

/// Reflect how the source VIP wait ended in the network readiness health
///
/// kube-proxy starts either way, so no outcome is reported as unhealthy.
pub async fn record_source_vip(health: &HealthRegistry, outcome: &PollOutcome) {
    let component = Component::NetworkReadiness;
    match outcome {
        PollOutcome::Resolved(_) => health.set_healthy(component).await,
        PollOutcome::ResolverFailed(reason) => {
            health
                .set_degraded(component, format!("source VIP allocation failed: {}", reason))
                .await
        }
        PollOutcome::TimedOut { attempts } => {
            health
                .set_degraded(
                    component,
                    format!("host network not found after {} attempts", attempts),
                )
                .await
        }
        PollOutcome::Cancelled => health.set_degraded(component, "cancelled").await,
    }
}
