//! Per-event handlers. Every handler runs on the sending connection's
//! processor, so one connection's events are handled strictly in order.

use chrono::Utc;
use persistence::{NewMessage, PersistenceError};
use shared::{
    domain::{ChatRoomId, MessageId, RoomId},
    error::ApiError,
    protocol::{
        AckData, ChatUpdatedPayload, ClientEvent, DeleteMessageRequest, EditMessageRequest,
        MarkReadRequest, MessageDeletedPayload, MessageEditedPayload, MessageEnvelope,
        MessageErrorPayload, MessageStatus, ReactionPayload, ReactionRequest,
        ReadReceiptPayload, RemoveReactionRequest, SendMessageRequest, ServerEvent,
        TypingPayload, TypingRequest,
    },
};
use tracing::{debug, warn};

use crate::{
    broadcaster,
    error::RelayError,
    ledger::LedgerEntry,
    session::Session,
    RelayContext,
};

pub const MAX_EMOJI_BYTES: usize = 32;

pub async fn dispatch(
    ctx: &RelayContext,
    session: &Session,
    event: ClientEvent,
) -> Result<AckData, ApiError> {
    let name = event.name();
    metrics::counter!("relay_events_total", "event" => name).increment(1);
    debug!(user_id = %session.user_id(), connection_id = %session.connection_id(), event = name, "dispatch");

    let result = match event {
        ClientEvent::JoinChat(req) => Ok(join_chat(ctx, session, req.room_id)),
        ClientEvent::LeaveChat(req) => Ok(leave_chat(ctx, session, req.room_id)),
        ClientEvent::RejoinRooms(req) => Ok(AckData::Rooms(
            ctx.rooms.rejoin(&session.peer, &req.room_ids),
        )),
        ClientEvent::SendMessage(req) => send_message(ctx, session, req).await,
        ClientEvent::Typing(req) => typing(ctx, session, req).map_err(ApiError::from),
        ClientEvent::MarkRead(req) => mark_read(ctx, session, req).map_err(ApiError::from),
        ClientEvent::AddReaction(req) => add_reaction(ctx, session, req)
            .await
            .map_err(ApiError::from),
        ClientEvent::RemoveReaction(req) => remove_reaction(ctx, session, req)
            .await
            .map_err(ApiError::from),
        ClientEvent::EditMessage(req) => edit_message(ctx, session, req)
            .await
            .map_err(ApiError::from),
        ClientEvent::DeleteMessage(req) => delete_message(ctx, session, req)
            .await
            .map_err(ApiError::from),
        ClientEvent::PresencePing => Ok(presence_ping(ctx, session)),
        ClientEvent::Logout => Ok(AckData::Empty),
    };

    if let Err(err) = &result {
        metrics::counter!("relay_event_failures_total", "code" => err.code.as_str()).increment(1);
        debug!(
            user_id = %session.user_id(),
            event = name,
            code = err.code.as_str(),
            error = %err.message,
            "event failed"
        );
    }
    result
}

fn join_chat(ctx: &RelayContext, session: &Session, room_id: ChatRoomId) -> AckData {
    if ctx.rooms.join(&session.peer, RoomId::chat(room_id.clone())) {
        broadcaster::announce_joined(ctx, session, &room_id);
    }
    AckData::Room(room_id)
}

fn leave_chat(ctx: &RelayContext, session: &Session, room_id: ChatRoomId) -> AckData {
    if ctx
        .rooms
        .leave(session.connection_id(), &RoomId::chat(room_id.clone()))
    {
        broadcaster::announce_left(ctx, session, &room_id);
    }
    AckData::Room(room_id)
}

fn validate_content(
    content: &str,
    has_attachment: bool,
    max_bytes: usize,
) -> Result<(), RelayError> {
    if content.trim().is_empty() && !has_attachment {
        return Err(RelayError::Validation("message content is empty".into()));
    }
    if content.len() > max_bytes {
        return Err(RelayError::Validation(format!(
            "message content exceeds {max_bytes} bytes"
        )));
    }
    Ok(())
}

fn validate_emoji(emoji: &str) -> Result<(), RelayError> {
    if emoji.trim().is_empty() {
        return Err(RelayError::Validation("emoji is empty".into()));
    }
    if emoji.len() > MAX_EMOJI_BYTES {
        return Err(RelayError::Validation(format!(
            "emoji exceeds {MAX_EMOJI_BYTES} bytes"
        )));
    }
    Ok(())
}

fn require_member(
    ctx: &RelayContext,
    session: &Session,
    room_id: &ChatRoomId,
) -> Result<(), RelayError> {
    if ctx
        .rooms
        .is_member(session.connection_id(), &RoomId::chat(room_id.clone()))
    {
        Ok(())
    } else {
        Err(RelayError::Authorization(format!(
            "not a member of room {room_id}"
        )))
    }
}

/// Local author check for messages this process relayed. Unknown ids are
/// left to the persistence service.
fn require_author(
    ctx: &RelayContext,
    session: &Session,
    message_id: &MessageId,
    room_id: &ChatRoomId,
) -> Result<(), RelayError> {
    let Some(entry) = ctx.ledger.get(message_id) else {
        return Ok(());
    };
    if &entry.room_id != room_id {
        return Err(RelayError::Validation(format!(
            "message {message_id} does not belong to room {room_id}"
        )));
    }
    if entry.status == MessageStatus::Deleted {
        return Err(RelayError::Validation(format!(
            "message {message_id} was deleted"
        )));
    }
    if &entry.sender_id != session.user_id() {
        return Err(RelayError::Authorization(
            "only the author may modify this message".into(),
        ));
    }
    Ok(())
}

fn persistence_failure(session: &Session, op: &'static str, err: PersistenceError) -> RelayError {
    metrics::counter!("relay_persistence_failures_total", "kind" => err.kind()).increment(1);
    warn!(
        user_id = %session.user_id(),
        connection_id = %session.connection_id(),
        op,
        error = %err,
        "persistence call failed"
    );
    RelayError::Persistence(err)
}

async fn send_message(
    ctx: &RelayContext,
    session: &Session,
    req: SendMessageRequest,
) -> Result<AckData, ApiError> {
    if let Err(err) = validate_content(
        &req.content,
        req.attachment.is_some(),
        ctx.limits.max_message_bytes,
    ) {
        return Err(reject_message(session, &req, MessageStatus::Received, err));
    }

    let new_message = NewMessage {
        room_id: req.room_id.clone(),
        content: req.content.clone(),
        kind: req.kind,
        attachment: req.attachment.clone(),
        reply_to: req.reply_to.clone(),
    };
    let created = match ctx
        .persistence
        .create_message(&session.token, &new_message)
        .await
    {
        Ok(created) => created,
        Err(err) => {
            let err = persistence_failure(session, "create_message", err);
            return Err(reject_message(session, &req, MessageStatus::PersistFailed, err));
        }
    };

    let mut envelope = MessageEnvelope {
        id: created.id.clone(),
        client_id: req.client_id,
        room_id: req.room_id.clone(),
        sender_id: session.user_id().clone(),
        sender_name: session.identity.display_name.clone(),
        content: req.content,
        kind: req.kind,
        attachment: req.attachment,
        reply_to: req.reply_to,
        status: MessageStatus::Sent,
        created_at: created.created_at.unwrap_or_else(Utc::now),
    };
    ctx.ledger.record(
        created.id.clone(),
        LedgerEntry {
            sender_id: envelope.sender_id.clone(),
            room_id: envelope.room_id.clone(),
            status: MessageStatus::Sent,
        },
    );

    let delivered = ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::ReceiveMessage(envelope.clone()),
        Some(session.connection_id()),
    );
    if delivered > 0 {
        ctx.ledger.advance(&created.id, MessageStatus::Delivered);
        envelope.status = MessageStatus::Delivered;
    }
    session.reply(ServerEvent::MessageSent(envelope.clone()));

    let mut participants = created.participants;
    participants.sort();
    participants.dedup();
    for participant in &participants {
        ctx.rooms.broadcast(
            &RoomId::personal(participant),
            ServerEvent::ChatUpdated(ChatUpdatedPayload {
                room_id: req.room_id.clone(),
                last_message: envelope.clone(),
            }),
            None,
        );
    }

    debug!(
        user_id = %session.user_id(),
        room_id = %req.room_id,
        message_id = %envelope.id,
        delivered,
        "message relayed"
    );
    Ok(AckData::Message(envelope))
}

/// Reports a send failure to the sender only, exactly once. `status` is
/// `received` when the message never reached persistence.
fn reject_message(
    session: &Session,
    req: &SendMessageRequest,
    status: MessageStatus,
    err: RelayError,
) -> ApiError {
    let error = err.to_api_error();
    session.reply(ServerEvent::MessageError(MessageErrorPayload {
        client_id: req.client_id.clone(),
        message_id: MessageId::temporary(),
        room_id: req.room_id.clone(),
        status,
        error: error.clone(),
    }));
    error
}

fn typing(ctx: &RelayContext, session: &Session, req: TypingRequest) -> Result<AckData, RelayError> {
    require_member(ctx, session, &req.room_id)?;
    ctx.presence.touch(session.user_id());
    ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::UserTyping(TypingPayload {
            room_id: req.room_id,
            user_id: session.user_id().clone(),
            is_typing: req.is_typing,
        }),
        Some(session.connection_id()),
    );
    Ok(AckData::Empty)
}

fn mark_read(
    ctx: &RelayContext,
    session: &Session,
    req: MarkReadRequest,
) -> Result<AckData, RelayError> {
    require_member(ctx, session, &req.room_id)?;
    ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::MessageRead(ReadReceiptPayload {
            room_id: req.room_id.clone(),
            message_id: req.message_id.clone(),
            reader_id: session.user_id().clone(),
            read_at: Utc::now(),
        }),
        Some(session.connection_id()),
    );

    if ctx.limits.persist_read_receipts {
        let persistence = ctx.persistence.clone();
        let token = session.token.clone();
        let user_id = session.user_id().clone();
        tokio::spawn(async move {
            if let Err(err) = persistence
                .mark_read(&token, &req.room_id, &req.message_id)
                .await
            {
                metrics::counter!("relay_persistence_failures_total", "kind" => err.kind())
                    .increment(1);
                warn!(%user_id, room_id = %req.room_id, error = %err, "read receipt not persisted");
            }
        });
    }
    Ok(AckData::Empty)
}

async fn add_reaction(
    ctx: &RelayContext,
    session: &Session,
    req: ReactionRequest,
) -> Result<AckData, RelayError> {
    validate_emoji(&req.emoji)?;
    ctx.persistence
        .add_reaction(&session.token, &req.message_id, &req.emoji)
        .await
        .map_err(|err| persistence_failure(session, "add_reaction", err))?;
    ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::ReactionAdded(ReactionPayload {
            room_id: req.room_id,
            message_id: req.message_id,
            user_id: session.user_id().clone(),
            emoji: Some(req.emoji),
        }),
        None,
    );
    Ok(AckData::Empty)
}

async fn remove_reaction(
    ctx: &RelayContext,
    session: &Session,
    req: RemoveReactionRequest,
) -> Result<AckData, RelayError> {
    if let Some(emoji) = &req.emoji {
        validate_emoji(emoji)?;
    }
    ctx.persistence
        .remove_reaction(&session.token, &req.message_id, req.emoji.as_deref())
        .await
        .map_err(|err| persistence_failure(session, "remove_reaction", err))?;
    ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::ReactionRemoved(ReactionPayload {
            room_id: req.room_id,
            message_id: req.message_id,
            user_id: session.user_id().clone(),
            emoji: req.emoji,
        }),
        None,
    );
    Ok(AckData::Empty)
}

async fn edit_message(
    ctx: &RelayContext,
    session: &Session,
    req: EditMessageRequest,
) -> Result<AckData, RelayError> {
    validate_content(&req.content, false, ctx.limits.max_message_bytes)?;
    require_author(ctx, session, &req.message_id, &req.room_id)?;

    let edited = ctx
        .persistence
        .edit_message(&session.token, &req.message_id, &req.content)
        .await
        .map_err(|err| persistence_failure(session, "edit_message", err))?;
    ctx.ledger.advance(&req.message_id, MessageStatus::Edited);

    ctx.rooms.broadcast(
        &RoomId::chat(req.room_id.clone()),
        ServerEvent::MessageEdited(MessageEditedPayload {
            room_id: req.room_id,
            message_id: req.message_id,
            content: edited.content.unwrap_or(req.content),
            edited_by: session.user_id().clone(),
            edited_at: edited.edited_at.unwrap_or_else(Utc::now),
        }),
        None,
    );
    Ok(AckData::Empty)
}

async fn delete_message(
    ctx: &RelayContext,
    session: &Session,
    req: DeleteMessageRequest,
) -> Result<AckData, RelayError> {
    if req.delete_for_everyone {
        require_author(ctx, session, &req.message_id, &req.room_id)?;
    }

    ctx.persistence
        .delete_message(&session.token, &req.message_id, req.delete_for_everyone)
        .await
        .map_err(|err| persistence_failure(session, "delete_message", err))?;

    let payload = MessageDeletedPayload {
        room_id: req.room_id.clone(),
        message_id: req.message_id.clone(),
        deleted_by: session.user_id().clone(),
        delete_for_everyone: req.delete_for_everyone,
    };
    if req.delete_for_everyone {
        ctx.ledger.advance(&req.message_id, MessageStatus::Deleted);
        ctx.rooms.broadcast(
            &RoomId::chat(req.room_id),
            ServerEvent::MessageDeleted(payload),
            None,
        );
    } else {
        // Hidden for this identity only; its other devices follow.
        ctx.rooms.broadcast(
            &RoomId::personal(session.user_id()),
            ServerEvent::MessageDeleted(payload),
            None,
        );
    }
    Ok(AckData::Empty)
}

fn presence_ping(ctx: &RelayContext, session: &Session) -> AckData {
    if let Some(last_seen) = ctx.presence.touch(session.user_id()) {
        broadcaster::announce_heartbeat(ctx, session, last_seen);
    }
    AckData::Empty
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
