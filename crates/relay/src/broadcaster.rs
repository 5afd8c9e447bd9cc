//! Presence and membership notices.

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatRoomId, ConnectionId, RoomId, UserId},
    protocol::{
        OnlineStatusPayload, PresenceState, PresenceUpdatePayload, RoomMemberPayload,
        ServerEvent,
    },
};

use crate::{session::Session, RelayContext};

fn announce_presence(
    ctx: &RelayContext,
    user_id: &UserId,
    user_name: Option<String>,
    state: PresenceState,
    last_seen: DateTime<Utc>,
    except: Option<ConnectionId>,
) -> usize {
    let is_online = state == PresenceState::Online;
    let mut delivered = ctx.rooms.broadcast(
        &RoomId::Presence,
        ServerEvent::UserOnlineStatus(OnlineStatusPayload {
            user_id: user_id.clone(),
            is_online,
            last_seen,
        }),
        except,
    );
    delivered += ctx.rooms.broadcast(
        &RoomId::Presence,
        ServerEvent::UserPresenceUpdate(PresenceUpdatePayload {
            user_id: user_id.clone(),
            status: state,
            user_name,
            last_seen,
        }),
        except,
    );
    delivered
}

/// Tells every other live connection that the session's identity is online.
pub fn announce_online(ctx: &RelayContext, session: &Session) -> usize {
    announce_presence(
        ctx,
        session.user_id(),
        session.identity.display_name.clone(),
        PresenceState::Online,
        Utc::now(),
        Some(session.connection_id()),
    )
}

/// Sent once the presence record is gone, so the departing connection is
/// already out of the presence room.
pub fn announce_offline(ctx: &RelayContext, session: &Session, last_seen: DateTime<Utc>) -> usize {
    announce_presence(
        ctx,
        session.user_id(),
        session.identity.display_name.clone(),
        PresenceState::Offline,
        last_seen,
        Some(session.connection_id()),
    )
}

/// Heartbeat refresh; only the richer presence event is repeated.
pub fn announce_heartbeat(ctx: &RelayContext, session: &Session, last_seen: DateTime<Utc>) -> usize {
    ctx.rooms.broadcast(
        &RoomId::Presence,
        ServerEvent::UserPresenceUpdate(PresenceUpdatePayload {
            user_id: session.user_id().clone(),
            status: PresenceState::Online,
            user_name: session.identity.display_name.clone(),
            last_seen,
        }),
        Some(session.connection_id()),
    )
}

fn member_payload(session: &Session, room_id: &ChatRoomId) -> RoomMemberPayload {
    RoomMemberPayload {
        room_id: room_id.clone(),
        user_id: session.user_id().clone(),
        user_name: session.identity.display_name.clone(),
    }
}

pub fn announce_joined(ctx: &RelayContext, session: &Session, room_id: &ChatRoomId) -> usize {
    ctx.rooms.broadcast(
        &RoomId::chat(room_id.clone()),
        ServerEvent::UserJoinedChat(member_payload(session, room_id)),
        Some(session.connection_id()),
    )
}

pub fn announce_left(ctx: &RelayContext, session: &Session, room_id: &ChatRoomId) -> usize {
    ctx.rooms.broadcast(
        &RoomId::chat(room_id.clone()),
        ServerEvent::UserLeftChat(member_payload(session, room_id)),
        Some(session.connection_id()),
    )
}
