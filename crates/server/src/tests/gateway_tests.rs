use super::*;
use chrono::Utc;
use relay::Peer;
use shared::domain::{ChatRoomId, ConnectionId, Role, UserId};

fn session() -> (Session, Outbound) {
    let (peer, outbound) = Peer::channel(ConnectionId(1), UserId::new("u1"), 8);
    let session = Session {
        identity: Identity::new(UserId::new("u1"), Role::User),
        token: BearerToken::new("tok"),
        peer,
        connected_at: Utc::now(),
    };
    (session, outbound)
}

#[test]
fn ack_is_sent_only_when_requested() {
    let (session, mut outbound) = session();
    let room = ChatRoomId::parse("r1").expect("room");

    reply(&session, Some(7), Ok(AckData::Room(room.clone())), false);
    reply(&session, None, Ok(AckData::Room(room.clone())), false);

    let event = outbound.try_recv().expect("ack");
    let ServerEvent::Ack(payload) = event.as_ref() else {
        panic!("expected ack, got {}", event.name());
    };
    assert_eq!(payload.ack, 7);
    assert!(payload.success);
    assert_eq!(payload.room_id, Some(room));
    assert!(outbound.try_recv().is_err());
}

#[test]
fn failures_without_ack_become_error_events() {
    let (session, mut outbound) = session();

    reply(&session, None, Err(ApiError::validation("bad frame")), false);
    let event = outbound.try_recv().expect("error event");
    assert_eq!(event.name(), "error");

    reply(&session, None, Err(ApiError::validation("empty")), true);
    assert!(outbound.try_recv().is_err());

    reply(&session, Some(3), Err(ApiError::validation("empty")), true);
    let event = outbound.try_recv().expect("failed ack");
    let ServerEvent::Ack(payload) = event.as_ref() else {
        panic!("expected ack, got {}", event.name());
    };
    assert!(!payload.success);
    assert_eq!(
        payload.error.as_ref().map(|err| err.code),
        Some(ErrorCode::Validation)
    );
}
