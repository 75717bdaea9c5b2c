//! kube-proxy argument rules

use super::{apply_rules, ArgumentMap, Rule, RuleOutcome};
use crate::models::AgentConfig;
use crate::network::{HostNetworkService, NetworkReadinessPoller, PollOutcome, SourceVipResolver};
use crate::observability::AgentMetrics;
use std::net::IpAddr;
use tokio::sync::broadcast;

/// kube-proxy arguments together with the source VIP discovery outcome
///
/// `args` carries `source-vip` only for [`PollOutcome::Resolved`]; whether
/// kube-proxy should be started without it is up to the caller.
#[derive(Debug, Clone)]
pub struct KubeProxyArgs {
    pub args: ArgumentMap,
    pub source_vip: PollOutcome,
}

struct KubeProxyContext<'a> {
    config: &'a AgentConfig,
    source_vip: Option<IpAddr>,
}

/// Wait for the flannel host network and build the kube-proxy arguments
pub async fn kube_proxy_args<H, R>(
    config: &AgentConfig,
    poller: &NetworkReadinessPoller<H, R>,
    shutdown: &mut broadcast::Receiver<()>,
) -> KubeProxyArgs
where
    H: HostNetworkService,
    R: SourceVipResolver,
{
    let source_vip = poller
        .wait_for_source_vip(&config.flannel_network_name, shutdown)
        .await;

    let ctx = KubeProxyContext {
        config,
        source_vip: source_vip.source_vip(),
    };

    KubeProxyArgs {
        args: build(&ctx),
        source_vip,
    }
}

/// kube-proxy arguments without source VIP discovery
pub fn kube_proxy_base_args(config: &AgentConfig) -> ArgumentMap {
    build(&KubeProxyContext {
        config,
        source_vip: None,
    })
}

fn build(ctx: &KubeProxyContext<'_>) -> ArgumentMap {
    finish(synthesize(ctx))
}

/// Count and log rule conflicts, then hand back the arguments
fn finish(outcome: RuleOutcome) -> ArgumentMap {
    AgentMetrics::new().add_rule_conflicts(outcome.conflicts.len());
    outcome.into_args("kube-proxy")
}

fn synthesize(ctx: &KubeProxyContext<'_>) -> RuleOutcome {
    let config = ctx.config;
    let defaults: ArgumentMap = [
        ("proxy-mode", "kernelspace".to_string()),
        ("healthz-bind-address", config.health_bind_address().to_string()),
        ("kubeconfig", config.kubeconfig_kube_proxy.display().to_string()),
        (
            "cluster-cidr",
            config
                .cluster_cidrs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    ]
    .into_iter()
    .collect();

    apply_rules(defaults, &rules(), ctx)
}

fn rules<'a>() -> Vec<Rule<KubeProxyContext<'a>>> {
    vec![
        Rule {
            name: "node-name",
            applies: |ctx: &KubeProxyContext<'a>| !ctx.config.node_name.is_empty(),
            emit: |ctx: &KubeProxyContext<'a>, _: &ArgumentMap| {
                vec![("hostname-override", ctx.config.node_name.clone())]
            },
        },
        Rule {
            name: "source-vip",
            applies: |ctx: &KubeProxyContext<'a>| ctx.source_vip.is_some(),
            emit: |ctx: &KubeProxyContext<'a>, _: &ArgumentMap| {
                ctx.source_vip
                    .iter()
                    .map(|vip| ("source-vip", vip.to_string()))
                    .collect()
            },
        },
    ]
}
