//! Process-wide registry of who is online.
//!
//! One record per identity. A newer connection for the same identity
//! replaces the record outright. When the owning connection leaves, the
//! record moves to another live connection of the same identity if there is
//! one; the identity only goes offline when none is left.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{ConnectionId, Identity, Role, UserId};

use crate::session::Peer;

#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub connection_id: ConnectionId,
    pub peer: Peer,
    pub role: Role,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of a connection leaving the registry.
#[derive(Debug)]
pub enum Departure {
    /// The record belongs to another connection; nothing changed.
    NotOwner,
    /// The record now belongs to this still-attached connection.
    HandedOver(ConnectionId),
    Offline(PresenceRecord),
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    records: Mutex<HashMap<UserId, PresenceRecord>>,
    online: AtomicUsize,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, PresenceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or overwrites the record for `identity`, returning the record
    /// it replaced.
    pub fn upsert(&self, identity: &Identity, peer: Peer) -> Option<PresenceRecord> {
        let now = Utc::now();
        let record = PresenceRecord {
            connection_id: peer.connection_id(),
            peer,
            role: identity.role,
            display_name: identity.display_name.clone(),
            connected_at: now,
            last_seen: now,
        };
        let mut records = self.lock();
        let previous = records.insert(identity.user_id.clone(), record);
        self.online.store(records.len(), Ordering::Relaxed);
        previous
    }

    /// Refreshes last-seen; returns the new timestamp if the identity is online.
    pub fn touch(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        let mut records = self.lock();
        let record = records.get_mut(user_id)?;
        record.last_seen = Utc::now();
        Some(record.last_seen)
    }

    /// Removes the record only if `connection_id` still owns it.
    pub fn remove(&self, user_id: &UserId, connection_id: ConnectionId) -> Option<PresenceRecord> {
        match self.depart(user_id, connection_id, || None) {
            Departure::Offline(record) => Some(record),
            Departure::NotOwner | Departure::HandedOver(_) => None,
        }
    }

    /// Releases the record owned by `connection_id`. `successor` is asked for
    /// another live connection of the same identity while the registry lock
    /// is held, so a successor that detaches concurrently either sees the
    /// record it was handed or finds the identity already gone.
    pub fn depart(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        successor: impl FnOnce() -> Option<Peer>,
    ) -> Departure {
        let mut records = self.lock();
        match records.get(user_id) {
            Some(record) if record.connection_id == connection_id => {}
            _ => return Departure::NotOwner,
        }

        if let Some(peer) = successor() {
            if let Some(record) = records.get_mut(user_id) {
                record.connection_id = peer.connection_id();
                record.peer = peer;
                record.last_seen = Utc::now();
                return Departure::HandedOver(record.connection_id);
            }
        }

        let removed = records.remove(user_id);
        self.online.store(records.len(), Ordering::Relaxed);
        removed.map_or(Departure::NotOwner, Departure::Offline)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.lock().contains_key(user_id)
    }

    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.lock().get(user_id).map(|record| record.last_seen)
    }

    pub fn snapshot(&self) -> Vec<PresenceSnapshot> {
        let mut snapshot: Vec<_> = self
            .lock()
            .iter()
            .map(|(user_id, record)| PresenceSnapshot {
                user_id: user_id.clone(),
                connection_id: record.connection_id,
                role: record.role,
                connected_at: record.connected_at,
                last_seen: record.last_seen,
            })
            .collect();
        snapshot.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        snapshot
    }

    /// Lock-free count for health and metrics; may lag a concurrent mutation.
    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
