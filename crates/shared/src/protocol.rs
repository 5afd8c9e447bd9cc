use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{ChatRoomId, MessageId, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
    System,
}

/// Lifecycle of a relayed message:
/// `received -> {sent | persist_failed} -> delivered -> [edited] -> [deleted]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    PersistFailed,
    Delivered,
    Edited,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub room_id: ChatRoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinRequest {
    /// Raw ids; anything outside the chat-room namespace is dropped.
    #[serde(default)]
    pub room_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: ChatRoomId,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Client-side temporary id used to reconcile optimistic UI state.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub room_id: ChatRoomId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub room_id: ChatRoomId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub message_id: MessageId,
    pub room_id: ChatRoomId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReactionRequest {
    pub message_id: MessageId,
    pub room_id: ChatRoomId,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub message_id: MessageId,
    pub room_id: ChatRoomId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub message_id: MessageId,
    pub room_id: ChatRoomId,
    #[serde(default)]
    pub delete_for_everyone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChat(RoomRequest),
    LeaveChat(RoomRequest),
    RejoinRooms(RejoinRequest),
    SendMessage(SendMessageRequest),
    Typing(TypingRequest),
    MarkRead(MarkReadRequest),
    AddReaction(ReactionRequest),
    RemoveReaction(RemoveReactionRequest),
    EditMessage(EditMessageRequest),
    DeleteMessage(DeleteMessageRequest),
    PresencePing,
    Logout,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => "join_chat",
            Self::LeaveChat(_) => "leave_chat",
            Self::RejoinRooms(_) => "rejoin_rooms",
            Self::SendMessage(_) => "send_message",
            Self::Typing(_) => "typing",
            Self::MarkRead(_) => "mark_read",
            Self::AddReaction(_) => "add_reaction",
            Self::RemoveReaction(_) => "remove_reaction",
            Self::EditMessage(_) => "edit_message",
            Self::DeleteMessage(_) => "delete_message",
            Self::PresencePing => "presence_ping",
            Self::Logout => "logout",
        }
    }
}

/// One inbound text frame: `{"event": .., "data": .., "ack": ..}`.
///
/// The ack id is kept even when the event itself fails to parse so the
/// failure can still be acknowledged.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub ack: Option<u64>,
    pub event: Result<ClientEvent, ApiError>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                return Self {
                    ack: None,
                    event: Err(ApiError::validation(format!("malformed frame: {err}"))),
                }
            }
        };
        let ack = value.get("ack").and_then(Value::as_u64);
        let event = ClientEvent::deserialize(&value)
            .map_err(|err| ApiError::validation(format!("invalid event payload: {err}")));
        Self { ack, event }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub room_id: ChatRoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub message_id: MessageId,
    pub room_id: ChatRoomId,
    pub status: MessageStatus,
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdatedPayload {
    pub room_id: ChatRoomId,
    pub last_message: MessageEnvelope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberPayload {
    pub room_id: ChatRoomId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: ChatRoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub room_id: ChatRoomId,
    pub message_id: MessageId,
    pub reader_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub room_id: ChatRoomId,
    pub message_id: MessageId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditedPayload {
    pub room_id: ChatRoomId,
    pub message_id: MessageId,
    pub content: String,
    pub edited_by: UserId,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub room_id: ChatRoomId,
    pub message_id: MessageId,
    pub deleted_by: UserId,
    pub delete_for_everyone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusPayload {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdatePayload {
    pub user_id: UserId,
    pub status: PresenceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Successful result of one inbound event, before it is shaped into an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckData {
    Empty,
    Room(ChatRoomId),
    Rooms(Vec<ChatRoomId>),
    Message(MessageEnvelope),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub ack: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<ChatRoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_ids: Option<Vec<ChatRoomId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl AckPayload {
    pub fn from_result(ack: u64, result: Result<AckData, ApiError>) -> Self {
        let mut payload = Self {
            ack,
            success: result.is_ok(),
            room_id: None,
            room_ids: None,
            data: None,
            error: None,
        };
        match result {
            Ok(AckData::Empty) => {}
            Ok(AckData::Room(room_id)) => payload.room_id = Some(room_id),
            Ok(AckData::Rooms(room_ids)) => payload.room_ids = Some(room_ids),
            Ok(AckData::Message(envelope)) => payload.data = Some(envelope),
            Err(error) => payload.error = Some(error),
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(MessageEnvelope),
    MessageSent(MessageEnvelope),
    MessageError(MessageErrorPayload),
    ChatUpdated(ChatUpdatedPayload),
    UserJoinedChat(RoomMemberPayload),
    UserLeftChat(RoomMemberPayload),
    UserTyping(TypingPayload),
    MessageRead(ReadReceiptPayload),
    ReactionAdded(ReactionPayload),
    ReactionRemoved(ReactionPayload),
    MessageEdited(MessageEditedPayload),
    MessageDeleted(MessageDeletedPayload),
    UserOnlineStatus(OnlineStatusPayload),
    UserPresenceUpdate(PresenceUpdatePayload),
    Ack(AckPayload),
    Error(ApiError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::MessageError(_) => "message_error",
            Self::ChatUpdated(_) => "chat_updated",
            Self::UserJoinedChat(_) => "user_joined_chat",
            Self::UserLeftChat(_) => "user_left_chat",
            Self::UserTyping(_) => "user_typing",
            Self::MessageRead(_) => "message_read",
            Self::ReactionAdded(_) => "reaction_added",
            Self::ReactionRemoved(_) => "reaction_removed",
            Self::MessageEdited(_) => "message_edited",
            Self::MessageDeleted(_) => "message_deleted",
            Self::UserOnlineStatus(_) => "user_online_status",
            Self::UserPresenceUpdate(_) => "user_presence_update",
            Self::Ack(_) => "ack",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
