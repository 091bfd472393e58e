//! Authenticated admin API over the orchestrator.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::AdminConfig;
use crate::health::HealthOrchestrator;
use crate::lifecycle::Shutdown;

#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<HealthOrchestrator>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(orchestrator: Arc<HealthOrchestrator>, api_key: &str) -> Self {
        Self {
            orchestrator,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/health", get(get_health))
        .route("/admin/status", get(get_status))
        .route("/admin/health-check", post(run_health_check))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/threats", post(report_threat))
        .route("/admin/threats/{ip}", get(get_threat).delete(release_threat))
        .route("/admin/faults", post(report_fault))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(config: &AdminConfig, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "Admin API listening");

    let app = setup_admin_router(state, Duration::from_secs(config.request_timeout_secs));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
