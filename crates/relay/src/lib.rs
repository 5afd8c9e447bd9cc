//! Room membership, presence and message relaying for connected clients.
//!
//! The transport layer owns sockets; this crate owns everything shared
//! between connections. [`RelayContext`] is cloned into every connection
//! task.

pub mod broadcaster;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod session;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use persistence::Persistence;
use shared::domain::ConnectionId;

pub use connection::{attach, detach, SessionGuard};
pub use error::RelayError;
pub use relay::dispatch;
pub use session::{Outbound, Peer, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    pub max_message_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub ledger_capacity: usize,
    pub persist_read_receipts: bool,
}

impl RelayLimits {
    pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024;
    pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
    pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: Self::DEFAULT_MAX_MESSAGE_BYTES,
            outbound_queue_capacity: Self::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            ledger_capacity: Self::DEFAULT_LEDGER_CAPACITY,
            persist_read_receipts: false,
        }
    }
}

#[derive(Clone)]
pub struct RelayContext {
    pub persistence: Arc<dyn Persistence>,
    pub presence: Arc<presence::PresenceRegistry>,
    pub rooms: Arc<rooms::RoomRouter>,
    pub ledger: Arc<ledger::MessageLedger>,
    pub limits: RelayLimits,
    connection_ids: Arc<AtomicU64>,
}

impl RelayContext {
    pub fn new(persistence: Arc<dyn Persistence>, limits: RelayLimits) -> Self {
        Self {
            persistence,
            presence: Arc::new(presence::PresenceRegistry::new()),
            rooms: Arc::new(rooms::RoomRouter::new()),
            ledger: Arc::new(ledger::MessageLedger::new(limits.ledger_capacity)),
            limits,
            connection_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.connection_ids.fetch_add(1, Ordering::Relaxed))
    }
}
