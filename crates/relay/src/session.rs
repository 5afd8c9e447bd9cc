use std::sync::Arc;

use chrono::{DateTime, Utc};
use persistence::BearerToken;
use shared::{
    domain::{ConnectionId, Identity, UserId},
    protocol::ServerEvent,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Receiving half of a connection's outbound queue, drained by the transport writer.
pub type Outbound = mpsc::Receiver<Arc<ServerEvent>>;

/// Cloneable send handle for one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Peer {
    connection_id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Arc<ServerEvent>>,
}

impl Peer {
    pub fn channel(
        connection_id: ConnectionId,
        user_id: UserId,
        capacity: usize,
    ) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                connection_id,
                user_id,
                tx,
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Queues an event without waiting. A full queue drops the event for
    /// this recipient only; a closed queue means the connection is gone.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                metrics::counter!("relay_outbound_dropped_total").increment(1);
                warn!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    event = event.name(),
                    "outbound queue full; dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Everything the relay knows about one authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub token: BearerToken,
    pub peer: Peer,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.peer.connection_id()
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn reply(&self, event: ServerEvent) -> bool {
        self.peer.send(Arc::new(event))
    }
}
