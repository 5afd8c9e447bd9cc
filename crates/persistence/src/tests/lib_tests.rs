use super::*;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServiceState {
    seen: Arc<Mutex<Vec<(String, Option<String>, serde_json::Value)>>>,
}

impl ServiceState {
    async fn record(&self, route: &str, headers: &HeaderMap, body: serde_json::Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().await.push((route.to_string(), auth, body));
    }
}

async fn create_message_route(
    State(state): State<ServiceState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state
        .record(&format!("create:{room_id}"), &headers, body)
        .await;
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "_id": "m100",
            "createdAt": "2026-01-02T03:04:05Z",
            "participants": ["u1", "u2"],
        })),
    )
}

async fn edit_message_route(
    State(state): State<ServiceState>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.record(&format!("edit:{message_id}"), &headers, body).await;
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "message": "only the author may edit" })),
    )
}

async fn delete_message_route(
    State(state): State<ServiceState>,
    Path(message_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> StatusCode {
    state
        .record(
            &format!("delete:{message_id}"),
            &headers,
            serde_json::json!(query),
        )
        .await;
    StatusCode::NO_CONTENT
}

async fn reaction_route(
    State(state): State<ServiceState>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state
        .record(&format!("react:{message_id}"), &headers, body)
        .await;
    StatusCode::OK
}

async fn slow_identity_route() -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(serde_json::json!({ "id": "u1", "name": "Alice" }))
}

async fn spawn_service(state: ServiceState) -> SocketAddr {
    let app = Router::new()
        .route("/api/chats/:room_id/messages", post(create_message_route))
        .route(
            "/api/messages/:message_id",
            put(edit_message_route).delete(delete_message_route),
        )
        .route("/api/messages/:message_id/reactions", post(reaction_route))
        .route("/api/users/me", get(slow_identity_route))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn client(addr: SocketAddr, timeout: Duration) -> HttpPersistence {
    let base = Url::parse(&format!("http://{addr}/api/")).expect("url");
    HttpPersistence::new(base, timeout).expect("client")
}

fn room(id: &str) -> ChatRoomId {
    ChatRoomId::parse(id).expect("room")
}

#[tokio::test]
async fn create_message_forwards_token_and_decodes_id() {
    let state = ServiceState::default();
    let addr = spawn_service(state.clone()).await;
    let persistence = client(addr, Duration::from_secs(2));

    let created = persistence
        .create_message(
            &BearerToken::new("tok-1"),
            &NewMessage {
                room_id: room("r1"),
                content: "hi".into(),
                kind: MessageKind::Text,
                attachment: None,
                reply_to: None,
            },
        )
        .await
        .expect("create");

    assert_eq!(created.id, MessageId::new("m100"));
    assert_eq!(created.participants, vec![UserId::new("u1"), UserId::new("u2")]);
    assert!(created.created_at.is_some());

    let seen = state.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let (route, auth, body) = &seen[0];
    assert_eq!(route, "create:r1");
    assert_eq!(auth.as_deref(), Some("Bearer tok-1"));
    assert_eq!(body["content"], "hi");
    assert_eq!(body["type"], "text");
    assert!(body.get("roomId").is_none());
}

#[tokio::test]
async fn non_success_status_is_rejected_with_service_message() {
    let addr = spawn_service(ServiceState::default()).await;
    let persistence = client(addr, Duration::from_secs(2));

    let err = persistence
        .edit_message(&BearerToken::new("tok"), &MessageId::new("m1"), "new")
        .await
        .expect_err("should be rejected");

    match err {
        PersistenceError::Rejected { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "only the author may edit");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn delete_and_reaction_calls_reach_their_routes() {
    let state = ServiceState::default();
    let addr = spawn_service(state.clone()).await;
    let persistence = client(addr, Duration::from_secs(2));
    let token = BearerToken::new("tok");

    persistence
        .delete_message(&token, &MessageId::new("m7"), true)
        .await
        .expect("delete");
    persistence
        .add_reaction(&token, &MessageId::new("m7"), "👍")
        .await
        .expect("react");

    let seen = state.seen.lock().await;
    assert_eq!(seen[0].0, "delete:m7");
    assert_eq!(seen[0].2["forEveryone"], "true");
    assert_eq!(seen[1].0, "react:m7");
    assert_eq!(seen[1].2["emoji"], "👍");
}

#[tokio::test]
async fn message_ids_cannot_escape_their_path_segment() {
    let state = ServiceState::default();
    let addr = spawn_service(state.clone()).await;
    let persistence = client(addr, Duration::from_secs(2));

    let url = persistence
        .endpoint(&["messages", "../users/me"])
        .expect("endpoint");
    assert!(url.path().starts_with("/api/messages/"));
    assert!(!url.path().contains("/users/me"));
}

#[tokio::test]
async fn slow_service_times_out() {
    let addr = spawn_service(ServiceState::default()).await;
    let persistence = client(addr, Duration::from_millis(100));

    let err = persistence
        .fetch_identity(&BearerToken::new("tok"))
        .await
        .expect_err("should time out");
    assert!(matches!(err, PersistenceError::Timeout), "got {err:?}");
    assert_eq!(err.kind(), "timeout");
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let persistence = client(addr, Duration::from_secs(2));

    let err = persistence
        .delete_message(&BearerToken::new("tok"), &MessageId::new("m1"), false)
        .await
        .expect_err("should fail");
    assert!(matches!(err, PersistenceError::Network(_)), "got {err:?}");
}

#[test]
fn bearer_token_debug_is_redacted() {
    let token = BearerToken::new("secret-value");
    assert!(!format!("{token:?}").contains("secret-value"));
}
