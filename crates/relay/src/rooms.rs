//! Room membership and fan-out.
//!
//! A room exists only while it has members. Fan-out targets are read from
//! the membership map at send time and the lock is released before any
//! event is queued.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{ChatRoomId, ConnectionId, RoomId},
    protocol::ServerEvent,
};
use tracing::debug;

use crate::session::Peer;

#[derive(Debug, Default)]
struct RouterState {
    rooms: HashMap<RoomId, HashMap<ConnectionId, Peer>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RouterState {
    fn insert(&mut self, peer: &Peer, room: RoomId) -> bool {
        let members = self.rooms.entry(room.clone()).or_default();
        if members.contains_key(&peer.connection_id()) {
            return false;
        }
        members.insert(peer.connection_id(), peer.clone());
        self.memberships
            .entry(peer.connection_id())
            .or_default()
            .insert(room);
        true
    }

    fn remove(&mut self, connection_id: ConnectionId, room: &RoomId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room);
        }
        if let Some(joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(&connection_id);
            }
        }
        removed
    }
}

#[derive(Debug, Default)]
pub struct RoomRouter {
    state: Mutex<RouterState>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when the connection was not a member before.
    pub fn join(&self, peer: &Peer, room: RoomId) -> bool {
        self.lock().insert(peer, room)
    }

    /// Returns `true` when the connection was a member before.
    pub fn leave(&self, connection_id: ConnectionId, room: &RoomId) -> bool {
        self.lock().remove(connection_id, room)
    }

    /// Restores chat-room membership after a reconnect. Ids outside the
    /// chat-room namespace are dropped; the accepted ids are returned.
    pub fn rejoin(&self, peer: &Peer, raw_ids: &[String]) -> Vec<ChatRoomId> {
        let mut accepted: Vec<ChatRoomId> = Vec::with_capacity(raw_ids.len());
        for raw in raw_ids {
            match ChatRoomId::parse(raw) {
                Ok(id) if !accepted.contains(&id) => accepted.push(id),
                Ok(_) => {}
                Err(err) => {
                    debug!(connection_id = %peer.connection_id(), %err, "rejoin: dropping room id");
                }
            }
        }
        let mut state = self.lock();
        for id in &accepted {
            state.insert(peer, RoomId::chat(id.clone()));
        }
        accepted
    }

    pub fn members_of(&self, room: &RoomId) -> Vec<Peer> {
        self.lock()
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, room: &RoomId) -> bool {
        self.lock()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        self.lock()
            .memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes the connection from every room it joined and returns them.
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut state = self.lock();
        let Some(rooms) = state.memberships.remove(&connection_id) else {
            return Vec::new();
        };
        for room in &rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        rooms.into_iter().collect()
    }

    /// Number of chat rooms with at least one member.
    pub fn chat_room_count(&self) -> usize {
        self.lock()
            .rooms
            .keys()
            .filter(|room| matches!(room, RoomId::Chat(_)))
            .count()
    }

    /// Queues `event` for every current member except `except`; returns how
    /// many recipients accepted it.
    pub fn broadcast(
        &self,
        room: &RoomId,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let members = self.members_of(room);
        let event = Arc::new(event);
        members
            .iter()
            .filter(|peer| Some(peer.connection_id()) != except)
            .filter(|peer| peer.send(Arc::clone(&event)))
            .count()
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
