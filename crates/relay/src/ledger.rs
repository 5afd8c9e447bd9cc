use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{ChatRoomId, MessageId, UserId},
    protocol::MessageStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub sender_id: UserId,
    pub room_id: ChatRoomId,
    pub status: MessageStatus,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<MessageId, LedgerEntry>,
    order: VecDeque<MessageId>,
}

/// Bounded record of messages relayed by this process, oldest evicted first.
/// Absence says nothing about a message; the persistence service decides.
#[derive(Debug)]
pub struct MessageLedger {
    capacity: usize,
    state: Mutex<LedgerState>,
}

impl MessageLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, message_id: MessageId, entry: LedgerEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.lock();
        if state.entries.insert(message_id.clone(), entry).is_none() {
            state.order.push_back(message_id);
        }
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
            }
        }
    }

    pub fn get(&self, message_id: &MessageId) -> Option<LedgerEntry> {
        self.lock().entries.get(message_id).cloned()
    }

    /// Moves a known message to `status`. `deleted` is terminal.
    pub fn advance(&self, message_id: &MessageId, status: MessageStatus) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(message_id) {
            Some(entry) if entry.status != MessageStatus::Deleted => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
