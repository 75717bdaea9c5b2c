//! Observability infrastructure for the node agent
//!
//! Provides:
//! - Prometheus metrics (source VIP polling, argument synthesis)
//! - Structured JSON logging with tracing

use crate::args::ArgumentMap;
use crate::cni::NetworkDescriptor;
use crate::network::PollOutcome;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge_vec, Histogram, IntCounter,
    IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Buckets for how long the host network took to come up (in seconds)
const WAIT_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    network_poll_attempts: IntCounter,
    network_query_errors: IntCounter,
    source_vip_wait_seconds: Histogram,
    arguments_synthesized: IntGaugeVec,
    rule_conflicts: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            network_poll_attempts: register_int_counter!(
                "node_agent_network_poll_attempts_total",
                "Host network queries made while waiting for the source VIP"
            )
            .expect("Failed to register network_poll_attempts"),

            network_query_errors: register_int_counter!(
                "node_agent_network_query_errors_total",
                "Host network queries that failed"
            )
            .expect("Failed to register network_query_errors"),

            source_vip_wait_seconds: register_histogram!(
                "node_agent_source_vip_wait_seconds",
                "Time from the first host network query until the source VIP was resolved",
                WAIT_BUCKETS.to_vec()
            )
            .expect("Failed to register source_vip_wait_seconds"),

            arguments_synthesized: register_int_gauge_vec!(
                "node_agent_arguments_synthesized",
                "Number of arguments in the last synthesized set per component",
                &["component"]
            )
            .expect("Failed to register arguments_synthesized"),

            rule_conflicts: register_int_counter!(
                "node_agent_argument_rule_conflicts_total",
                "Argument keys written by more than one rule"
            )
            .expect("Failed to register rule_conflicts"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_network_poll_attempts(&self) {
        self.inner().network_poll_attempts.inc();
    }

    pub fn inc_network_query_errors(&self) {
        self.inner().network_query_errors.inc();
    }

    pub fn observe_source_vip_wait(&self, secs: f64) {
        self.inner().source_vip_wait_seconds.observe(secs);
    }

    pub fn set_arguments_synthesized(&self, component: &str, count: usize) {
        self.inner()
            .arguments_synthesized
            .with_label_values(&[component])
            .set(count as i64);
    }

    pub fn add_rule_conflicts(&self, count: usize) {
        self.inner().rule_conflicts.inc_by(count as u64);
    }
}

/// Structured logger for agent events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, platform: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            platform = %platform,
            "Node agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Node agent shutting down"
        );
    }

    /// Log a synthesized argument set
    pub fn log_arguments(&self, component: &str, args: &ArgumentMap) {
        info!(
            event = "arguments_synthesized",
            node = %self.node_name,
            component = %component,
            count = args.len(),
            flags = ?args.to_flags(),
            "Synthesized runtime arguments"
        );
    }

    pub fn log_source_vip(&self, network: &str, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Resolved(vip) => info!(
                event = "source_vip_outcome",
                node = %self.node_name,
                network = %network,
                source_vip = %vip,
                "Source VIP available for kube-proxy"
            ),
            PollOutcome::ResolverFailed(reason) => error!(
                event = "source_vip_outcome",
                node = %self.node_name,
                network = %network,
                reason = %reason,
                "Source VIP allocation failed, kube-proxy will start without it"
            ),
            PollOutcome::TimedOut { attempts } => warn!(
                event = "source_vip_outcome",
                node = %self.node_name,
                network = %network,
                attempts = attempts,
                "Timed out waiting for host network"
            ),
            PollOutcome::Cancelled => info!(
                event = "source_vip_outcome",
                node = %self.node_name,
                network = %network,
                "Source VIP discovery cancelled"
            ),
        }
    }

    pub fn log_cni_descriptor(&self, descriptor: &NetworkDescriptor) {
        info!(
            event = "cni_descriptor_selected",
            node = %self.node_name,
            platform = %descriptor.platform,
            cni_version = %descriptor.cni_version,
            variant = ?descriptor.variant,
            network = %descriptor.network_name(),
            "Selected CNI configuration"
        );
    }
}
