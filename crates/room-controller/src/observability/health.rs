//! Health endpoints for the Room Controller.
//!
//! - `GET /health` - Liveness probe, 200 while the process serves HTTP
//! - `GET /ready` - Readiness probe
//! - `GET /metrics` - Prometheus text format, when a recorder handle is supplied
//!
//! An instance is ready once both stores are connected and the janitor is
//! running. Shutdown clears readiness first, before any agent lease is
//! released, and it never comes back.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Startup and shutdown milestones that gate readiness.
#[derive(Debug, Default)]
pub struct HealthState {
    stores_connected: AtomicBool,
    janitor_running: AtomicBool,
    shutting_down: AtomicBool,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Redis and Postgres are reachable and migrations have run.
    pub fn mark_stores_connected(&self) {
        self.stores_connected.store(true, Ordering::SeqCst);
    }

    pub fn mark_janitor_running(&self) {
        self.janitor_running.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness. Irreversible.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stores_connected.load(Ordering::SeqCst)
            && self.janitor_running.load(Ordering::SeqCst)
            && !self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Router serving `/health` and `/ready`, plus `/metrics` when `prometheus` is set.
pub fn health_router(health_state: Arc<HealthState>, prometheus: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness_handler))
        .with_state(health_state);

    match prometheus {
        Some(handle) => router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => router,
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
