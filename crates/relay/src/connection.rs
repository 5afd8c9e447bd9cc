//! Connection lifecycle: register on accept, tear down on disconnect.

use chrono::Utc;
use persistence::BearerToken;
use shared::domain::{Identity, RoomId};
use tracing::{debug, info};

use crate::{
    broadcaster,
    presence::Departure,
    session::{Outbound, Peer, Session},
    RelayContext,
};

/// Registers a freshly authenticated connection: presence record, personal
/// room, presence room and the online notice to everyone else.
pub fn attach(ctx: &RelayContext, identity: Identity, token: BearerToken) -> (Session, Outbound) {
    let connection_id = ctx.next_connection_id();
    let (peer, outbound) = Peer::channel(
        connection_id,
        identity.user_id.clone(),
        ctx.limits.outbound_queue_capacity,
    );

    if let Some(previous) = ctx.presence.upsert(&identity, peer.clone()) {
        debug!(
            user_id = %identity.user_id,
            %connection_id,
            superseded = %previous.connection_id,
            "presence record replaced by newer connection"
        );
    }
    ctx.rooms.join(&peer, RoomId::personal(&identity.user_id));
    ctx.rooms.join(&peer, RoomId::Presence);

    let session = Session {
        identity,
        token,
        peer,
        connected_at: Utc::now(),
    };
    broadcaster::announce_online(ctx, &session);
    info!(user_id = %session.user_id(), %connection_id, "connected");
    (session, outbound)
}

/// Removes every trace of the connection. Safe to call more than once; the
/// second call finds nothing left to remove.
pub fn detach(ctx: &RelayContext, session: &Session) {
    let connection_id = session.connection_id();
    let rooms = ctx.rooms.leave_all(connection_id);
    for room in &rooms {
        if let Some(room_id) = room.as_chat() {
            broadcaster::announce_left(ctx, session, room_id);
        }
    }

    let personal = RoomId::personal(session.user_id());
    let successor = || {
        ctx.rooms
            .members_of(&personal)
            .into_iter()
            .filter(|peer| peer.connection_id() != connection_id && !peer.is_closed())
            .max_by_key(Peer::connection_id)
    };
    match ctx.presence.depart(session.user_id(), connection_id, successor) {
        Departure::Offline(record) => {
            broadcaster::announce_offline(ctx, session, record.last_seen.max(Utc::now()));
        }
        Departure::HandedOver(successor) => debug!(
            user_id = %session.user_id(),
            %connection_id,
            %successor,
            "presence handed to another live connection"
        ),
        Departure::NotOwner => debug!(
            user_id = %session.user_id(),
            %connection_id,
            "presence owned by another connection; no offline notice"
        ),
    }

    if !rooms.is_empty() {
        info!(
            user_id = %session.user_id(),
            %connection_id,
            rooms = rooms.len(),
            "disconnected"
        );
    }
}

/// Runs [`detach`] when dropped, including during unwinding.
pub struct SessionGuard {
    ctx: RelayContext,
    session: Option<Session>,
}

impl SessionGuard {
    pub fn new(ctx: RelayContext, session: Session) -> Self {
        Self {
            ctx,
            session: Some(session),
        }
    }

    /// Tears down now instead of at drop.
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            detach(&self.ctx, &session);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
