use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use persistence::BearerToken;
use relay::{Outbound, RelayContext, Session, SessionGuard};
use shared::{
    domain::Identity,
    error::{ApiError, ErrorCode},
    protocol::{AckData, AckPayload, ClientEvent, ClientFrame, ServerEvent},
};
use tokio::{
    sync::{mpsc, watch},
    time::{interval_at, timeout, Instant},
};
use tracing::{debug, info, warn};

use crate::{app_state::AppState, auth::AuthError};

const INBOUND_QUEUE_CAPACITY: usize = 64;
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = crate::auth::bearer_token(&headers, query.as_deref()) else {
        return reject_handshake(AuthError::Missing);
    };
    let identity = match state.auth.verify(&token) {
        Ok(identity) => identity,
        Err(err) => return reject_handshake(err),
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            metrics::counter!("relay_handshake_failures_total", "reason" => "upgrade")
                .increment(1);
            return rejection.into_response();
        }
    };

    upgrade.on_upgrade(move |socket| run_connection(state, socket, identity, BearerToken::new(token)))
}

fn reject_handshake(err: AuthError) -> Response {
    metrics::counter!("relay_handshake_failures_total", "reason" => err.reason()).increment(1);
    warn!(reason = err.reason(), error = %err, "rejecting websocket handshake");
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new(ErrorCode::Unauthorized, err.to_string())),
    )
        .into_response()
}

async fn run_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    identity: Identity,
    token: BearerToken,
) {
    let _slot = state.connections.acquire();
    metrics::counter!("relay_connections_total").increment(1);

    let identity = resolve_display_name(&state.relay, identity, &token).await;
    let (session, outbound) = relay::attach(&state.relay, identity, token);
    let guard = SessionGuard::new(state.relay.clone(), session.clone());

    let (sink, stream) = socket.split();
    let (close_tx, close_rx) = watch::channel(false);
    let (frames_tx, frames_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

    let ping_every = Duration::from_secs(state.settings.ping_interval_secs);
    let idle_timeout = Duration::from_secs(state.settings.idle_timeout_secs);

    let mut writer = tokio::spawn(write_loop(sink, outbound, ping_every, close_rx.clone()));
    let processor = tokio::spawn(process_loop(
        state.relay.clone(),
        session.clone(),
        frames_rx,
        close_rx.clone(),
        close_tx.clone(),
    ));

    let reason = read_loop(stream, frames_tx, idle_timeout, close_rx).await;
    let _ = close_tx.send(true);

    if let Err(err) = processor.await {
        warn!(connection_id = %session.connection_id(), error = %err, "processor task failed");
    }
    if timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        user_id = %session.user_id(),
        connection_id = %session.connection_id(),
        reason,
        "connection closed"
    );
    drop(guard);
}

async fn resolve_display_name(ctx: &RelayContext, identity: Identity, token: &BearerToken) -> Identity {
    if identity.display_name.is_some() {
        return identity;
    }
    match ctx.persistence.fetch_identity(token).await {
        Ok(remote) if remote.id == identity.user_id => identity.with_display_name(remote.name),
        Ok(remote) => {
            warn!(user_id = %identity.user_id, remote_id = %remote.id, "identity lookup returned another user");
            identity
        }
        Err(err) => {
            warn!(user_id = %identity.user_id, error = %err, "identity lookup failed");
            identity
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    frames: mpsc::Sender<String>,
    idle_timeout: Duration,
    mut closed: watch::Receiver<bool>,
) -> &'static str {
    loop {
        let next = tokio::select! {
            _ = closed.changed() => return "closed by server",
            next = timeout(idle_timeout, stream.next()) => next,
        };
        match next {
            Err(_) => return "idle timeout",
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return "closed by client",
            Ok(Some(Err(err))) => {
                debug!(error = %err, "websocket read failed");
                return "transport error";
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                if frames.send(text).await.is_err() {
                    return "processor stopped";
                }
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

async fn process_loop(
    ctx: RelayContext,
    session: Session,
    mut frames: mpsc::Receiver<String>,
    mut closed: watch::Receiver<bool>,
    close: watch::Sender<bool>,
) {
    loop {
        let text = tokio::select! {
            _ = closed.changed() => break,
            text = frames.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let frame = ClientFrame::parse(&text);
        let event = match frame.event {
            Ok(event) => event,
            Err(err) => {
                debug!(connection_id = %session.connection_id(), error = %err.message, "unparseable frame");
                reply(&session, frame.ack, Err(err), false);
                continue;
            }
        };

        let is_logout = matches!(event, ClientEvent::Logout);
        let reports_own_errors = matches!(event, ClientEvent::SendMessage(_));
        let result = tokio::select! {
            result = relay::dispatch(&ctx, &session, event) => result,
            _ = closed.changed() => break,
        };
        reply(&session, frame.ack, result, reports_own_errors);

        if is_logout {
            let _ = close.send(true);
            break;
        }
    }
}

fn reply(
    session: &Session,
    ack: Option<u64>,
    result: Result<AckData, ApiError>,
    reports_own_errors: bool,
) {
    match (ack, result) {
        (Some(ack), result) => {
            session.reply(ServerEvent::Ack(AckPayload::from_result(ack, result)));
        }
        (None, Err(err)) if !reports_own_errors => {
            session.reply(ServerEvent::Error(err));
        }
        (None, _) => {}
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: Outbound,
    ping_every: Duration,
    mut closed: watch::Receiver<bool>,
) {
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if !send_event(&mut sink, &event).await {
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
            _ = closed.changed() => break,
        }
    }

    while let Ok(event) = outbound.try_recv() {
        if !send_event(&mut sink, &event).await {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            warn!(event = event.name(), error = %err, "failed to encode event");
            return true;
        }
    };
    sink.send(Message::Text(text)).await.is_ok()
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
