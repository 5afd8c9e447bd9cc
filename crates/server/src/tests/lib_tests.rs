use super::*;
use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use shared::{domain::Role, error::ApiError};
use tower::ServiceExt;

use crate::auth::Claims;

fn upgrade_request(uri: &str) -> axum::http::request::Builder {
    Request::get(uri)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
}

async fn error_body(response: axum::response::Response) -> ApiError {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("api error")
}

#[tokio::test]
async fn ws_without_token_is_unauthorized() {
    let state = test_support::state(test_support::settings());
    let response = build_router(state.clone())
        .oneshot(upgrade_request("/ws").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let err = error_body(response).await;
    assert_eq!(err.message, "missing bearer token");
    assert_eq!(state.relay.presence.online_count(), 0);
}

#[tokio::test]
async fn ws_with_expired_token_is_unauthorized() {
    let state = test_support::state(test_support::settings());
    let expired = encode(
        &Header::default(),
        &Claims {
            sub: "u1".into(),
            role: Role::User,
            name: None,
            exp: (Utc::now() - Duration::minutes(5)).timestamp(),
            iss: None,
        },
        &EncodingKey::from_secret(test_support::SECRET.as_bytes()),
    )
    .expect("encode");

    let response = build_router(state.clone())
        .oneshot(
            upgrade_request(&format!("/ws?token={expired}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_body(response).await.message, "token expired");
    assert!(state.relay.presence.snapshot().is_empty());
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let state = test_support::state(test_support::settings());
    let response = build_router(state)
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
