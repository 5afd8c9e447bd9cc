use super::*;
use axum::{
    body::{self, Body},
    http::Request,
    Router,
};
use tower::ServiceExt;

use crate::{build_router, config::Settings, test_support};

async fn get_json(app: Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::get(path).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json"))
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let state = test_support::state(test_support::settings());
    let _slots: Vec<_> = (0..5).map(|_| state.connections.acquire()).collect();

    let (status, body) = get_json(build_router(state), "/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn readiness_flips_only_above_the_ceiling() {
    let state = test_support::state(test_support::settings());
    let app = build_router(state.clone());

    let (status, body) = get_json(app.clone(), "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let first = state.connections.acquire();
    let _second = state.connections.acquire();
    let (status, _) = get_json(app.clone(), "/ready").await;
    assert_eq!(status, StatusCode::OK, "at the ceiling is still ready");

    let third = state.connections.acquire();
    let (status, body) = get_json(app.clone(), "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "over_capacity");
    assert_eq!(body["connections"], 3);

    drop(third);
    drop(first);
    let (status, _) = get_json(app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_counts_and_memory() {
    let state = test_support::state(test_support::settings());
    let (status, body) = get_json(build_router(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"]["max"], 2);
    assert_eq!(body["usersOnline"], 0);
    assert_eq!(body["activeRooms"], 0);
    assert!(body["memory"]["processBytes"].as_u64().expect("bytes") > 0);
    assert!(body["cpuCount"].as_u64().expect("cpus") >= 1);
}

#[tokio::test]
async fn health_degrades_above_memory_limit() {
    let state = test_support::state(Settings {
        health_memory_limit_mb: 0,
        ..test_support::settings()
    });
    let (status, body) = get_json(build_router(state), "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"], serde_json::json!(["memory"]));
}

#[tokio::test]
async fn huge_memory_limit_saturates_instead_of_overflowing() {
    let state = test_support::state(Settings {
        health_memory_limit_mb: u64::MAX,
        ..test_support::settings()
    });
    let (status, body) = get_json(build_router(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"], serde_json::json!([]));
}

#[tokio::test]
async fn metrics_render_scrape_time_gauges() {
    let state = test_support::state(test_support::settings());
    let _slot = state.connections.acquire();

    let response = build_router(state)
        .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
            .to_vec(),
    )
    .expect("utf8");

    assert!(text.contains("relay_connections_active"), "{text}");
    assert!(text.contains("relay_uptime_seconds"), "{text}");
}

#[test]
fn memory_sample_reads_this_process() {
    let sample = MemorySample::capture();
    assert!(sample.process_bytes > 0);
    assert!(sample.system_total_bytes >= sample.system_used_bytes);
}
