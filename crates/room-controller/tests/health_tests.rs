//! Health router tests using `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::observability::health::{health_router, HealthState};
use std::sync::Arc;
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_liveness_ok_before_ready() {
    let state = Arc::new(HealthState::new());
    let (status, _) = get(health_router(state, None), "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_follows_state() {
    let state = Arc::new(HealthState::new());
    let router = health_router(Arc::clone(&state), None);

    let (status, _) = get(router.clone(), "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state.mark_stores_connected();
    let (status, _) = get(router.clone(), "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state.mark_janitor_running();
    let (status, _) = get(router.clone(), "/ready").await;
    assert_eq!(status, StatusCode::OK);

    state.begin_shutdown();
    let (status, _) = get(router, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_route_only_with_handle() {
    let state = Arc::new(HealthState::new());
    let (status, _) = get(health_router(Arc::clone(&state), None), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let handle = PrometheusBuilder::new().build_recorder().handle();
    let (status, _) = get(health_router(state, Some(handle)), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}
