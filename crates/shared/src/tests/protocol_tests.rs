use super::*;
use crate::error::ErrorCode;
use serde_json::json;

#[test]
fn parses_send_message_frame_with_ack() {
    let frame = ClientFrame::parse(
        &json!({
            "event": "send_message",
            "ack": 7,
            "data": { "roomId": "r1", "content": "hi", "type": "text", "clientId": "c-1" }
        })
        .to_string(),
    );
    assert_eq!(frame.ack, Some(7));
    let ClientEvent::SendMessage(request) = frame.event.expect("event") else {
        panic!("expected send_message");
    };
    assert_eq!(request.room_id.as_str(), "r1");
    assert_eq!(request.content, "hi");
    assert_eq!(request.kind, MessageKind::Text);
    assert_eq!(request.client_id.as_deref(), Some("c-1"));
}

#[test]
fn parses_unit_events_without_data() {
    let frame = ClientFrame::parse(r#"{"event":"logout"}"#);
    assert_eq!(frame.event.expect("event"), ClientEvent::Logout);
    let frame = ClientFrame::parse(r#"{"event":"presence_ping","ack":1}"#);
    assert_eq!(frame.event.expect("event"), ClientEvent::PresencePing);
}

#[test]
fn rejoin_keeps_raw_ids_for_filtering() {
    let frame = ClientFrame::parse(
        &json!({ "event": "rejoin_rooms", "data": { "roomIds": ["r1", "user:u2"] } }).to_string(),
    );
    let ClientEvent::RejoinRooms(request) = frame.event.expect("event") else {
        panic!("expected rejoin_rooms");
    };
    assert_eq!(request.room_ids, vec!["r1".to_string(), "user:u2".to_string()]);
}

#[test]
fn join_with_personal_room_id_is_a_validation_error_that_keeps_ack() {
    let frame = ClientFrame::parse(
        &json!({ "event": "join_chat", "ack": 3, "data": { "roomId": "user:u2" } }).to_string(),
    );
    assert_eq!(frame.ack, Some(3));
    let err = frame.event.expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn malformed_and_unknown_frames_are_validation_errors() {
    let err = ClientFrame::parse("{not json").event.expect_err("malformed");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = ClientFrame::parse(r#"{"event":"fly_to_moon","data":{}}"#)
        .event
        .expect_err("unknown");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn server_events_use_snake_case_names_and_camel_case_fields() {
    let envelope = MessageEnvelope {
        id: MessageId::new("m100"),
        client_id: None,
        room_id: ChatRoomId::parse("r1").expect("room"),
        sender_id: UserId::new("u1"),
        sender_name: None,
        content: "hi".into(),
        kind: MessageKind::Text,
        attachment: None,
        reply_to: None,
        status: MessageStatus::Sent,
        created_at: Utc::now(),
    };
    let value = serde_json::to_value(ServerEvent::ReceiveMessage(envelope)).expect("json");
    assert_eq!(value["event"], "receive_message");
    assert_eq!(value["data"]["id"], "m100");
    assert_eq!(value["data"]["senderId"], "u1");
    assert_eq!(value["data"]["roomId"], "r1");
    assert_eq!(value["data"]["status"], "sent");
    assert_eq!(value["data"]["type"], "text");
    assert!(value["data"].get("clientId").is_none());
}

#[test]
fn ack_payload_shapes_results() {
    let room = ChatRoomId::parse("r1").expect("room");
    let ok = AckPayload::from_result(1, Ok(AckData::Room(room)));
    let value = serde_json::to_value(ServerEvent::Ack(ok)).expect("json");
    assert_eq!(value["data"], json!({ "ack": 1, "success": true, "roomId": "r1" }));

    let failed = AckPayload::from_result(2, Err(ApiError::validation("empty")));
    let value = serde_json::to_value(&failed).expect("json");
    assert_eq!(value["success"], false);
    assert_eq!(value["error"]["code"], "validation");
}
