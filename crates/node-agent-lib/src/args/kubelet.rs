//! Kubelet argument rules

use super::{apply_rules, ArgumentMap, HostInterface, Rule, RuleOutcome};
use crate::models::{AgentConfig, Platform};
use crate::observability::AgentMetrics;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, error, info};

const CREDENTIAL_PROVIDER_GATE: &str = "KubeletCredentialProviders=true";

/// Everything the kubelet rules look at besides the configuration itself
pub struct KubeletContext<'a> {
    pub config: &'a AgentConfig,
    pub platform: Platform,
    /// Address the kubelet would auto-select, `None` if detection failed
    pub default_address: Option<IpAddr>,
    pub credential_provider_available: bool,
}

impl<'a> KubeletContext<'a> {
    /// Probe the host once for the facts the rules depend on
    pub fn new(config: &'a AgentConfig, platform: Platform, host: &dyn HostInterface) -> Self {
        let default_address = match host.default_address(config.is_ipv6_only()) {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!(error = %e, "Could not determine default host interface address");
                None
            }
        };

        Self {
            config,
            platform,
            default_address,
            credential_provider_available: credential_provider_available(config),
        }
    }
}

/// Build the kubelet argument map
///
/// Never fails: missing settings omit their argument, and a pod manifest
/// directory that cannot be created is only logged since the kubelet
/// reports the same problem itself.
pub fn kubelet_args(config: &AgentConfig, platform: Platform, host: &dyn HostInterface) -> ArgumentMap {
    let ctx = KubeletContext::new(config, platform, host);
    let outcome = synthesize(&ctx);

    AgentMetrics::new().add_rule_conflicts(outcome.conflicts.len());

    if let Some(manifests) = outcome.args.get("pod-manifest-path") {
        ensure_manifest_dir(Path::new(manifests));
    }

    outcome.into_args("kubelet")
}

pub(crate) fn synthesize(ctx: &KubeletContext<'_>) -> RuleOutcome {
    apply_rules(seed_defaults(ctx.config), &rules(), ctx)
}

/// Append `gate` to a comma separated feature gate list
pub fn add_feature_gate(current: &str, gate: &str) -> String {
    if current.is_empty() {
        gate.to_string()
    } else {
        format!("{},{}", current, gate)
    }
}

fn seed_defaults(config: &AgentConfig) -> ArgumentMap {
    let mut args: ArgumentMap = [
        ("healthz-bind-address", config.health_bind_address()),
        ("read-only-port", "0"),
        ("eviction-hard", "imagefs.available<5%,nodefs.available<5%"),
        (
            "eviction-minimum-reclaim",
            "imagefs.available=10%,nodefs.available=10%",
        ),
        ("fail-swap-on", "false"),
        ("authentication-token-webhook", "true"),
        ("anonymous-auth", "false"),
        ("authorization-mode", "Webhook"),
    ]
    .into_iter()
    .collect();

    if !config.cluster_domain.is_empty() {
        args.insert("cluster-domain", config.cluster_domain.as_str());
    }
    if !config.kubeconfig_kubelet.as_os_str().is_empty() {
        args.insert("kubeconfig", path_arg(&config.kubeconfig_kubelet));
    }
    if !config.feature_gates.is_empty() {
        args.insert("feature-gates", config.feature_gates.join(","));
    }

    args
}

fn rules<'a>() -> Vec<Rule<KubeletContext<'a>>> {
    vec![
        Rule {
            name: "pod-manifests",
            applies: |ctx: &KubeletContext<'a>| ctx.config.pod_manifests.is_some(),
            emit: |ctx: &KubeletContext<'a>, args: &ArgumentMap| {
                match &ctx.config.pod_manifests {
                    Some(path) if !args.contains_key("pod-manifest-path") => {
                        vec![("pod-manifest-path", path_arg(path))]
                    }
                    _ => Vec::new(),
                }
            },
        },
        Rule {
            name: "root-dir",
            applies: |ctx: &KubeletContext<'a>| ctx.config.root_dir.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                ctx.config
                    .root_dir
                    .iter()
                    .flat_map(|root| {
                        [
                            ("root-dir", path_arg(root)),
                            ("cert-dir", path_arg(&root.join("pki"))),
                        ]
                    })
                    .collect()
            },
        },
        Rule {
            name: "cluster-dns",
            applies: |ctx: &KubeletContext<'a>| !ctx.config.cluster_dns.is_empty(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("cluster-dns", join(&ctx.config.cluster_dns))]
            },
        },
        Rule {
            name: "resolv-conf",
            applies: |ctx: &KubeletContext<'a>| ctx.config.resolv_conf.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                ctx.config
                    .resolv_conf
                    .iter()
                    .map(|path| ("resolv-conf", path_arg(path)))
                    .collect()
            },
        },
        Rule {
            name: "runtime-endpoint",
            applies: |ctx: &KubeletContext<'a>| ctx.config.runtime_socket.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                let Some(socket) = &ctx.config.runtime_socket else {
                    return Vec::new();
                };
                vec![
                    ("serialize-image-pulls", "false".to_string()),
                    (
                        "container-runtime-endpoint",
                        runtime_endpoint(ctx.platform, socket),
                    ),
                ]
            },
        },
        Rule {
            name: "pause-image",
            applies: |ctx: &KubeletContext<'a>| ctx.config.pause_image.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                ctx.config
                    .pause_image
                    .iter()
                    .map(|image| ("pod-infra-container-image", image.clone()))
                    .collect()
            },
        },
        Rule {
            name: "listen-address",
            applies: |ctx: &KubeletContext<'a>| ctx.config.listen_address.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                ctx.config
                    .listen_address
                    .iter()
                    .map(|addr| ("address", addr.clone()))
                    .collect()
            },
        },
        Rule {
            name: "node-name",
            applies: |ctx: &KubeletContext<'a>| !ctx.config.node_name.is_empty(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("hostname-override", ctx.config.node_name.clone())]
            },
        },
        Rule {
            name: "node-labels",
            applies: |_: &KubeletContext<'a>| true,
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("node-labels", ctx.config.node_labels.join(","))]
            },
        },
        Rule {
            name: "node-taints",
            applies: |ctx: &KubeletContext<'a>| !ctx.config.node_taints.is_empty(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("register-with-taints", ctx.config.node_taints.join(","))]
            },
        },
        Rule {
            name: "client-ca",
            applies: |ctx: &KubeletContext<'a>| ctx.config.client_ca.is_some(),
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                let Some(ca) = &ctx.config.client_ca else {
                    return Vec::new();
                };
                vec![
                    ("anonymous-auth", "false".to_string()),
                    ("client-ca-file", path_arg(ca)),
                ]
            },
        },
        Rule {
            name: "serving-cert",
            applies: |ctx: &KubeletContext<'a>| {
                ctx.config.serving_kubelet_cert.is_some() && ctx.config.serving_kubelet_key.is_some()
            },
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                match (&ctx.config.serving_kubelet_cert, &ctx.config.serving_kubelet_key) {
                    (Some(cert), Some(key)) => vec![
                        ("tls-cert-file", path_arg(cert)),
                        ("tls-private-key-file", path_arg(key)),
                    ],
                    _ => Vec::new(),
                }
            },
        },
        Rule {
            name: "node-ip",
            applies: |ctx: &KubeletContext<'a>| {
                ctx.config.node_ip.is_some() && ctx.default_address != ctx.config.node_ip
            },
            emit: |ctx: &KubeletContext<'a>, _: &ArgumentMap| {
                ctx.config
                    .node_ip
                    .iter()
                    .map(|ip| ("node-ip", ip.to_string()))
                    .collect()
            },
        },
        Rule {
            name: "cloud-provider",
            applies: |ctx: &KubeletContext<'a>| !ctx.config.disable_ccm,
            emit: |_: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("cloud-provider", "external".to_string())]
            },
        },
        Rule {
            name: "credential-provider",
            applies: |ctx: &KubeletContext<'a>| ctx.credential_provider_available,
            emit: |ctx: &KubeletContext<'a>, args: &ArgumentMap| {
                let (Some(bin_dir), Some(config)) = (
                    &ctx.config.image_credential_provider_bin_dir,
                    &ctx.config.image_credential_provider_config,
                ) else {
                    return Vec::new();
                };
                let gates = add_feature_gate(
                    args.get("feature-gates").unwrap_or_default(),
                    CREDENTIAL_PROVIDER_GATE,
                );
                vec![
                    ("feature-gates", gates),
                    ("image-credential-provider-bin-dir", path_arg(bin_dir)),
                    ("image-credential-provider-config", path_arg(config)),
                ]
            },
        },
        Rule {
            name: "protect-kernel-defaults",
            applies: |ctx: &KubeletContext<'a>| ctx.config.protect_kernel_defaults,
            emit: |_: &KubeletContext<'a>, _: &ArgumentMap| {
                vec![("protect-kernel-defaults", "true".to_string())]
            },
        },
    ]
}

fn runtime_endpoint(platform: Platform, socket: &str) -> String {
    let prefix = platform.runtime_endpoint_prefix();
    if socket.starts_with(prefix) {
        socket.to_string()
    } else {
        format!("{}{}", prefix, socket)
    }
}

/// The credential provider is only wired up when both its binary directory
/// and its configuration file are present on disk
fn credential_provider_available(config: &AgentConfig) -> bool {
    let (Some(bin_dir), Some(provider_config)) = (
        &config.image_credential_provider_bin_dir,
        &config.image_credential_provider_config,
    ) else {
        return false;
    };

    if !fs::metadata(bin_dir).map(|m| m.is_dir()).unwrap_or(false) {
        debug!(path = %bin_dir.display(), "Credential provider bin dir not found, skipping");
        return false;
    }
    if !fs::metadata(provider_config).map(|m| m.is_file()).unwrap_or(false) {
        debug!(path = %provider_config.display(), "Credential provider config not found, skipping");
        return false;
    }

    info!("Kubelet image credential provider bin dir and configuration file found");
    true
}

fn ensure_manifest_dir(path: &Path) {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }

    if let Err(e) = builder.create(path) {
        error!(path = %path.display(), error = %e, "Failed to create pod manifest directory");
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_add_feature_gate() {
        assert_eq!(add_feature_gate("", "A=true"), "A=true");
        assert_eq!(add_feature_gate("B=false", "A=true"), "B=false,A=true");
    }

    #[test]
    fn test_runtime_endpoint_prefix_applied_once() {
        assert_eq!(
            runtime_endpoint(Platform::Linux, "/run/x.sock"),
            "unix:///run/x.sock"
        );
        assert_eq!(
            runtime_endpoint(Platform::Linux, "unix:///run/x.sock"),
            "unix:///run/x.sock"
        );
        assert_eq!(
            runtime_endpoint(Platform::Windows, "//./pipe/containerd-containerd"),
            "npipe:////./pipe/containerd-containerd"
        );
    }

    #[test]
    fn test_join() {
        let ips: Vec<IpAddr> = vec!["10.43.0.10".parse().unwrap(), "fd00::10".parse().unwrap()];
        assert_eq!(join(&ips), "10.43.0.10,fd00::10");
        assert_eq!(join::<IpAddr>(&[]), "");
    }
}
