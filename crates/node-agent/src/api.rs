//! HTTP API for health checks, Prometheus metrics and the synthesized
//! runtime arguments

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use node_agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AgentMetrics,
    ArgumentMap,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    kubelet_args: RwLock<Option<ArgumentMap>>,
    kube_proxy_args: RwLock<Option<ArgumentMap>>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: AgentMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            kubelet_args: RwLock::new(None),
            kube_proxy_args: RwLock::new(None),
        }
    }

    pub async fn set_kubelet_args(&self, args: ArgumentMap) {
        *self.kubelet_args.write().await = Some(args);
    }

    pub async fn set_kube_proxy_args(&self, args: ArgumentMap) {
        *self.kube_proxy_args.write().await = Some(args);
    }
}

/// Liveness - 200 unless a bootstrap step failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (status_code, Json(health))
}

/// Readiness - 200 once every bootstrap step settled without failing
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

fn args_response(component: &str, args: Option<ArgumentMap>) -> Response {
    match args {
        Some(args) => (StatusCode::OK, Json(args)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("{} arguments not yet synthesized", component) })),
        )
            .into_response(),
    }
}

async fn kubelet_args(State(state): State<Arc<AppState>>) -> Response {
    args_response("kubelet", state.kubelet_args.read().await.clone())
}

async fn kube_proxy_args(State(state): State<Arc<AppState>>) -> Response {
    args_response("kube-proxy", state.kube_proxy_args.read().await.clone())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/args/kubelet", get(kubelet_args))
        .route("/args/kube-proxy", get(kube_proxy_args))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
