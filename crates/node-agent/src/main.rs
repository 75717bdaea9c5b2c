//! Node Agent - runtime argument and network readiness bootstrap
//!
//! Runs on each node, synthesizes the kubelet and kube-proxy arguments,
//! installs the flannel CNI configuration and, on Windows, waits for the
//! flannel host network before handing kube-proxy its source VIP.

use anyhow::Result;
use node_agent_lib::{
    args::DefaultRouteInterface,
    health::{Component, HealthRegistry},
    kube_proxy_args, kube_proxy_base_args, kubelet_args,
    network::{HostLocalIpamResolver, PowerShellHns},
    observability::{AgentMetrics, StructuredLogger},
    ArgumentMap, NetworkReadinessPoller, Platform,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod bootstrap;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting node-agent");

    let settings = Arc::new(config::AgentSettings::load()?);
    let platform = Platform::current();
    info!(
        node_name = %settings.node.node_name,
        platform = %platform,
        source_vip_discovery = settings.source_vip_discovery,
        "Agent configured"
    );

    // Every bootstrap step starts pending; ready once all have settled
    let health_registry = HealthRegistry::new();

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&settings.node.node_name);
    logger.log_startup(AGENT_VERSION, &platform.to_string());

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state.clone()));

    let host = DefaultRouteInterface::default();

    // Kubelet
    let kubelet = kubelet_args(&settings.node, platform, &host);
    app_state.set_kubelet_args(kubelet.clone()).await;
    publish_args(&settings, &app_state, &logger, Component::KubeletArgs, "kubelet", &kubelet).await;

    // CNI
    match bootstrap::cni_document(
        platform,
        settings.cni_version,
        settings.cni_variant,
        &settings.node,
        &host,
    ) {
        Ok((descriptor, text)) => {
            logger.log_cni_descriptor(descriptor);
            let written = match &settings.cni_conf_path {
                Some(path) => bootstrap::write_cni_config(path, &text),
                None => Ok(()),
            };
            match written {
                Ok(()) => health_registry.set_healthy(Component::CniConfig).await,
                Err(e) => {
                    error!(error = %e, "Failed to install CNI configuration");
                    health_registry
                        .set_unhealthy(Component::CniConfig, e.to_string())
                        .await;
                }
            }
        }
        Err(e) => {
            error!(error = %e, "No usable CNI configuration");
            health_registry
                .set_unhealthy(Component::CniConfig, e.to_string())
                .await;
        }
    }

    // kube-proxy, possibly after waiting for the host network
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let proxy_handle = tokio::spawn(run_kube_proxy(
        settings.clone(),
        app_state.clone(),
        logger.clone(),
        shutdown_rx,
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
            logger.log_shutdown("API server stopped");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = proxy_handle.await {
        error!(error = %e, "kube-proxy task panicked");
    }
    info!("Shutting down");

    Ok(())
}

async fn run_kube_proxy(
    settings: Arc<config::AgentSettings>,
    state: Arc<api::AppState>,
    logger: StructuredLogger,
    mut shutdown: broadcast::Receiver<()>,
) {
    let health = &state.health_registry;

    let args = if settings.source_vip_discovery {
        let poller = NetworkReadinessPoller::new(
            PowerShellHns::new(settings.powershell.clone()),
            HostLocalIpamResolver::new(settings.ipam_config()),
            settings.poll_config(),
        );
        let proxy = kube_proxy_args(&settings.node, &poller, &mut shutdown).await;

        logger.log_source_vip(&settings.node.flannel_network_name, &proxy.source_vip);
        bootstrap::record_source_vip(health, &proxy.source_vip).await;
        match bootstrap::kube_proxy_publication(proxy) {
            Some(args) => args,
            None => {
                info!("Source VIP wait cancelled, kube-proxy arguments not published");
                return;
            }
        }
    } else {
        health.set_healthy(Component::NetworkReadiness).await;
        kube_proxy_base_args(&settings.node)
    };

    state.set_kube_proxy_args(args.clone()).await;
    publish_args(&settings, &state, &logger, Component::KubeProxyArgs, "kube-proxy", &args).await;
}

/// Log, count and persist one synthesized argument set
async fn publish_args(
    settings: &config::AgentSettings,
    state: &api::AppState,
    logger: &StructuredLogger,
    health_component: Component,
    component: &str,
    args: &ArgumentMap,
) {
    logger.log_arguments(component, args);
    state.metrics.set_arguments_synthesized(component, args.len());

    let written = match &settings.args_dir {
        Some(dir) => bootstrap::write_args_file(dir, component, args).map(|_| ()),
        None => Ok(()),
    };

    match written {
        Ok(()) => state.health_registry.set_healthy(health_component).await,
        Err(e) => {
            error!(component = %component, error = %e, "Failed to write runtime arguments");
            state
                .health_registry
                .set_unhealthy(health_component, e.to_string())
                .await;
        }
    }
}
