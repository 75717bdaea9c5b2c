//! Bootstrap health tracking
//!
//! Each bootstrap step of the agent is a [`Component`] that starts out
//! `Pending` and settles once the step has run. Liveness fails only on an
//! unhealthy step; readiness additionally waits for every step to settle,
//! so the agent turns ready when the kube-proxy arguments exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One bootstrap step reported on the health endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    KubeletArgs,
    KubeProxyArgs,
    NetworkReadiness,
    CniConfig,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::KubeletArgs,
        Component::KubeProxyArgs,
        Component::NetworkReadiness,
        Component::CniConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::KubeletArgs => "kubelet_args",
            Component::KubeProxyArgs => "kube_proxy_args",
            Component::NetworkReadiness => "network_readiness",
            Component::CniConfig => "cni_config",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a step, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// The step has not run to completion yet
    Pending,
    /// Finished with a usable but incomplete result
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ComponentStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Liveness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the steps
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared view of the bootstrap steps; clones share state
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<Component, ComponentHealth>>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Registry with every step pending
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::new(ComponentStatus::Pending, None)))
            .collect();
        Self {
            components: Arc::new(RwLock::new(components)),
        }
    }

    pub async fn update(&self, component: Component, health: ComponentHealth) {
        self.components.write().await.insert(component, health);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.update(component, ComponentHealth::new(ComponentStatus::Healthy, None))
            .await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.update(
            component,
            ComponentHealth::new(ComponentStatus::Degraded, Some(message.into())),
        )
        .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.update(
            component,
            ComponentHealth::new(ComponentStatus::Unhealthy, Some(message.into())),
        )
        .await;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    /// Ready once every step settled and none of them is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.components.read().await;
        let with_status = |wanted: fn(&ComponentStatus) -> bool| {
            components
                .iter()
                .filter(|(_, h)| wanted(&h.status))
                .map(|(c, _)| c.as_str())
                .collect::<Vec<_>>()
        };

        let unhealthy = with_status(|s| *s == ComponentStatus::Unhealthy);
        if !unhealthy.is_empty() {
            return ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            };
        }

        let pending = with_status(|s| !s.is_settled());
        if !pending.is_empty() {
            return ReadinessResponse {
                ready: false,
                reason: Some(format!("Waiting for: {}", pending.join(", "))),
            };
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
