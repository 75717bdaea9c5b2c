//! Tests for the kubelet rule table and the rule engine
//!
//! Host interface detection is replaced by a fixed address so the node-ip
//! rule is deterministic; filesystem-dependent rules use temp directories.

use super::kubelet::{synthesize, KubeletContext};
use super::*;
use crate::models::{AgentConfig, Platform};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use tempfile::TempDir;

/// Host interface with a fixed answer
struct FixedInterface(Option<IpAddr>);

impl HostInterface for FixedInterface {
    fn default_address(&self, _ipv6: bool) -> io::Result<IpAddr> {
        self.0
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no default route"))
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn base_config() -> AgentConfig {
    AgentConfig {
        node_name: "node-1".to_string(),
        node_ip: Some(ip("10.0.0.5")),
        kubeconfig_kubelet: PathBuf::from("/var/lib/agent/kubelet.kubeconfig"),
        ..Default::default()
    }
}

/// Host whose default interface matches the configured node IP
fn matching_host() -> FixedInterface {
    FixedInterface(Some(ip("10.0.0.5")))
}

fn linux_args(config: &AgentConfig) -> ArgumentMap {
    kubelet_args(config, Platform::Linux, &matching_host())
}

mod defaults {
    use super::*;

    #[test]
    fn test_safety_defaults() {
        let args = linux_args(&base_config());

        assert_eq!(args.get("healthz-bind-address"), Some("127.0.0.1"));
        assert_eq!(args.get("read-only-port"), Some("0"));
        assert_eq!(args.get("fail-swap-on"), Some("false"));
        assert_eq!(args.get("anonymous-auth"), Some("false"));
        assert_eq!(args.get("authentication-token-webhook"), Some("true"));
        assert_eq!(args.get("authorization-mode"), Some("Webhook"));
        assert_eq!(
            args.get("eviction-hard"),
            Some("imagefs.available<5%,nodefs.available<5%")
        );
        assert_eq!(
            args.get("eviction-minimum-reclaim"),
            Some("imagefs.available=10%,nodefs.available=10%")
        );
        assert_eq!(args.get("cluster-domain"), Some("cluster.local"));
        assert_eq!(
            args.get("kubeconfig"),
            Some("/var/lib/agent/kubelet.kubeconfig")
        );
    }

    #[test]
    fn test_ipv6_node_binds_health_to_ipv6_loopback() {
        let config = AgentConfig {
            node_ip: Some(ip("fd00::5")),
            ..base_config()
        };
        let args = kubelet_args(&config, Platform::Linux, &FixedInterface(Some(ip("fd00::5"))));

        assert_eq!(args.get("healthz-bind-address"), Some("::1"));
    }

    #[test]
    fn test_unset_optionals_are_omitted() {
        let args = linux_args(&base_config());

        for key in [
            "pod-manifest-path",
            "root-dir",
            "cert-dir",
            "cluster-dns",
            "resolv-conf",
            "container-runtime-endpoint",
            "serialize-image-pulls",
            "pod-infra-container-image",
            "address",
            "register-with-taints",
            "client-ca-file",
            "tls-cert-file",
            "tls-private-key-file",
            "feature-gates",
            "image-credential-provider-bin-dir",
            "protect-kernel-defaults",
        ] {
            assert!(!args.contains_key(key), "{} should be unset", key);
        }
    }
}

mod rules {
    use super::*;

    #[test]
    fn test_cert_dir_derived_from_root_dir() {
        let config = AgentConfig {
            root_dir: Some(PathBuf::from("/var/lib/foo")),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("root-dir"), Some("/var/lib/foo"));
        assert_eq!(args.get("cert-dir"), Some("/var/lib/foo/pki"));
    }

    #[test]
    fn test_cluster_dns_joined() {
        let config = AgentConfig {
            cluster_dns: vec![ip("10.43.0.10"), ip("fd00:43::a")],
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("cluster-dns"), Some("10.43.0.10,fd00:43::a"));
    }

    #[test]
    fn test_client_ca_disables_anonymous_auth() {
        let config = AgentConfig {
            client_ca: Some(PathBuf::from("/var/lib/agent/client-ca.crt")),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("anonymous-auth"), Some("false"));
        assert_eq!(
            args.get("client-ca-file"),
            Some("/var/lib/agent/client-ca.crt")
        );
    }

    #[test]
    fn test_serving_cert_requires_cert_and_key() {
        let only_cert = AgentConfig {
            serving_kubelet_cert: Some(PathBuf::from("/pki/serving.crt")),
            ..base_config()
        };
        assert!(!linux_args(&only_cert).contains_key("tls-cert-file"));

        let both = AgentConfig {
            serving_kubelet_key: Some(PathBuf::from("/pki/serving.key")),
            ..only_cert
        };
        let args = linux_args(&both);
        assert_eq!(args.get("tls-cert-file"), Some("/pki/serving.crt"));
        assert_eq!(args.get("tls-private-key-file"), Some("/pki/serving.key"));
    }

    #[test]
    fn test_runtime_socket_gets_platform_prefix() {
        let config = AgentConfig {
            runtime_socket: Some("/run/x.sock".to_string()),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("container-runtime-endpoint"), Some("unix:///run/x.sock"));
        assert_eq!(args.get("serialize-image-pulls"), Some("false"));
    }

    #[test]
    fn test_prefixed_runtime_socket_passes_through() {
        let config = AgentConfig {
            runtime_socket: Some("npipe:////./pipe/containerd-containerd".to_string()),
            ..base_config()
        };
        let args = kubelet_args(&config, Platform::Windows, &matching_host());

        assert_eq!(
            args.get("container-runtime-endpoint"),
            Some("npipe:////./pipe/containerd-containerd")
        );
    }

    #[test]
    fn test_node_identity_passthrough() {
        let config = AgentConfig {
            node_labels: vec!["role=edge".to_string(), "zone=a".to_string()],
            node_taints: vec!["dedicated=edge:NoSchedule".to_string()],
            pause_image: Some("rancher/mirrored-pause:3.6".to_string()),
            listen_address: Some("0.0.0.0".to_string()),
            resolv_conf: Some(PathBuf::from("/etc/rancher/resolv.conf")),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("hostname-override"), Some("node-1"));
        assert_eq!(args.get("node-labels"), Some("role=edge,zone=a"));
        assert_eq!(
            args.get("register-with-taints"),
            Some("dedicated=edge:NoSchedule")
        );
        assert_eq!(
            args.get("pod-infra-container-image"),
            Some("rancher/mirrored-pause:3.6")
        );
        assert_eq!(args.get("address"), Some("0.0.0.0"));
        assert_eq!(args.get("resolv-conf"), Some("/etc/rancher/resolv.conf"));
    }

    #[test]
    fn test_node_labels_always_present() {
        let args = linux_args(&base_config());
        assert_eq!(args.get("node-labels"), Some(""));
    }

    #[test]
    fn test_node_ip_omitted_when_default_matches() {
        let args = linux_args(&base_config());
        assert!(!args.contains_key("node-ip"));
    }

    #[test]
    fn test_node_ip_set_when_default_differs() {
        let args = kubelet_args(
            &base_config(),
            Platform::Linux,
            &FixedInterface(Some(ip("192.168.1.9"))),
        );
        assert_eq!(args.get("node-ip"), Some("10.0.0.5"));
    }

    #[test]
    fn test_node_ip_set_when_detection_fails() {
        let args = kubelet_args(&base_config(), Platform::Linux, &FixedInterface(None));
        assert_eq!(args.get("node-ip"), Some("10.0.0.5"));
    }

    #[test]
    fn test_cloud_provider() {
        assert_eq!(
            linux_args(&base_config()).get("cloud-provider"),
            Some("external")
        );

        let config = AgentConfig {
            disable_ccm: true,
            ..base_config()
        };
        assert!(!linux_args(&config).contains_key("cloud-provider"));
    }

    #[test]
    fn test_protect_kernel_defaults() {
        let config = AgentConfig {
            protect_kernel_defaults: true,
            ..base_config()
        };
        assert_eq!(
            linux_args(&config).get("protect-kernel-defaults"),
            Some("true")
        );
    }
}

mod filesystem {
    use super::*;

    fn credential_provider(dir: &TempDir) -> (PathBuf, PathBuf) {
        let bin_dir = dir.path().join("bin");
        let config = dir.path().join("credential-provider.yaml");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(&config, "apiVersion: kubelet.config.k8s.io/v1\n").unwrap();
        (bin_dir, config)
    }

    #[test]
    fn test_credential_provider_appends_feature_gate() {
        let dir = TempDir::new().unwrap();
        let (bin_dir, provider_config) = credential_provider(&dir);
        let config = AgentConfig {
            feature_gates: vec!["GracefulNodeShutdown=true".to_string()],
            image_credential_provider_bin_dir: Some(bin_dir.clone()),
            image_credential_provider_config: Some(provider_config.clone()),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(
            args.get("feature-gates"),
            Some("GracefulNodeShutdown=true,KubeletCredentialProviders=true")
        );
        assert_eq!(
            args.get("image-credential-provider-bin-dir"),
            Some(bin_dir.display().to_string().as_str())
        );
        assert_eq!(
            args.get("image-credential-provider-config"),
            Some(provider_config.display().to_string().as_str())
        );
    }

    #[test]
    fn test_credential_provider_without_existing_gates() {
        let dir = TempDir::new().unwrap();
        let (bin_dir, provider_config) = credential_provider(&dir);
        let config = AgentConfig {
            image_credential_provider_bin_dir: Some(bin_dir),
            image_credential_provider_config: Some(provider_config),
            ..base_config()
        };

        assert_eq!(
            linux_args(&config).get("feature-gates"),
            Some("KubeletCredentialProviders=true")
        );
    }

    #[test]
    fn test_credential_provider_missing_on_disk() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig {
            feature_gates: vec!["GracefulNodeShutdown=true".to_string()],
            image_credential_provider_bin_dir: Some(dir.path().join("missing")),
            image_credential_provider_config: Some(dir.path().join("missing.yaml")),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(args.get("feature-gates"), Some("GracefulNodeShutdown=true"));
        assert!(!args.contains_key("image-credential-provider-bin-dir"));
    }

    #[test]
    fn test_pod_manifest_dir_created() {
        let dir = TempDir::new().unwrap();
        let manifests = dir.path().join("agent").join("pod-manifests");
        let config = AgentConfig {
            pod_manifests: Some(manifests.clone()),
            ..base_config()
        };
        let args = linux_args(&config);

        assert_eq!(
            args.get("pod-manifest-path"),
            Some(manifests.display().to_string().as_str())
        );
        assert!(manifests.is_dir());
    }

    #[test]
    fn test_pod_manifest_dir_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let config = AgentConfig {
            pod_manifests: Some(blocker.join("pod-manifests")),
            ..base_config()
        };
        let args = linux_args(&config);

        assert!(args.contains_key("pod-manifest-path"));
        assert!(!blocker.join("pod-manifests").exists());
    }
}

mod engine {
    use super::*;

    #[test]
    fn test_fully_populated_config_has_no_conflicts() {
        let dir = TempDir::new().unwrap();
        let bin_dir = dir.path().join("bin");
        let provider_config = dir.path().join("provider.yaml");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(&provider_config, "").unwrap();

        let config = AgentConfig {
            node_labels: vec!["a=b".to_string()],
            node_taints: vec!["t=v:NoExecute".to_string()],
            cluster_dns: vec![ip("10.43.0.10")],
            root_dir: Some(dir.path().join("root")),
            pod_manifests: Some(dir.path().join("manifests")),
            serving_kubelet_cert: Some(PathBuf::from("/pki/serving.crt")),
            serving_kubelet_key: Some(PathBuf::from("/pki/serving.key")),
            client_ca: Some(PathBuf::from("/pki/client-ca.crt")),
            image_credential_provider_bin_dir: Some(bin_dir),
            image_credential_provider_config: Some(provider_config),
            runtime_socket: Some("/run/containerd/containerd.sock".to_string()),
            protect_kernel_defaults: true,
            listen_address: Some("0.0.0.0".to_string()),
            pause_image: Some("pause:3.6".to_string()),
            resolv_conf: Some(PathBuf::from("/etc/resolv.conf")),
            feature_gates: vec!["Foo=true".to_string()],
            ..base_config()
        };
        let host = FixedInterface(None);
        let ctx = KubeletContext::new(&config, Platform::Linux, &host);
        let outcome = synthesize(&ctx);

        assert!(outcome.conflicts.is_empty(), "{:?}", outcome.conflicts);
        assert_eq!(outcome.args.get("node-ip"), Some("10.0.0.5"));
        assert_eq!(outcome.args.get("protect-kernel-defaults"), Some("true"));
    }

    #[test]
    fn test_conflicting_rules_are_reported() {
        let rules: Vec<Rule<u32>> = vec![
            Rule {
                name: "first",
                applies: |_: &u32| true,
                emit: |n: &u32, _: &ArgumentMap| vec![("v", n.to_string())],
            },
            Rule {
                name: "second",
                applies: |_: &u32| true,
                emit: |n: &u32, _: &ArgumentMap| vec![("v", (n + 1).to_string())],
            },
        ];

        let outcome = apply_rules(ArgumentMap::new(), &rules, &41);

        assert_eq!(
            outcome.conflicts,
            vec![RuleConflict {
                key: "v",
                first: "first",
                second: "second",
            }]
        );
        assert_eq!(outcome.args.get("v"), Some("42"));
    }

    #[test]
    fn test_rule_may_override_default_once() {
        let rules: Vec<Rule<()>> = vec![Rule {
            name: "override",
            applies: |_: &()| true,
            emit: |_: &(), _: &ArgumentMap| vec![("mode", "strict".to_string())],
        }];
        let defaults: ArgumentMap = [("mode", "lenient")].into_iter().collect();

        let outcome = apply_rules(defaults, &rules, &());

        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.args.get("mode"), Some("strict"));
    }

    #[test]
    fn test_flags_rendering_is_sorted() {
        let args: ArgumentMap = [("b-flag", "2"), ("a-flag", "1")].into_iter().collect();

        assert_eq!(args.to_flags(), vec!["--a-flag=1", "--b-flag=2"]);
        assert_eq!(
            serde_json::to_string(&args).unwrap(),
            r#"{"a-flag":"1","b-flag":"2"}"#
        );
    }
}
