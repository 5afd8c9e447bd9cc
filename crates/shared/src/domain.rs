use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(UserId);
string_newtype!(MessageId);

impl MessageId {
    /// Placeholder id for an envelope the persistence service never accepted.
    pub fn temporary() -> Self {
        Self(format!("tmp-{}", uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with("tmp-")
    }
}

/// Process-local id of one accepted transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Verified identity attached to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}

pub const MAX_CHAT_ROOM_ID_LEN: usize = 128;
const CHAT_ROOM_PREFIX: &str = "chat:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,
    #[error("room id exceeds 128 bytes")]
    TooLong,
    #[error("room id is not a chat room: {0}")]
    NotChatRoom(String),
}

/// Id of a chat conversation room. Only `[A-Za-z0-9_-]` is accepted, so a
/// client can never name a personal or presence room through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChatRoomId(String);

impl ChatRoomId {
    /// Accepts a bare id or one carrying the `chat:` tag.
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let trimmed = raw.trim();
        let id = trimmed.strip_prefix(CHAT_ROOM_PREFIX).unwrap_or(trimmed);
        if id.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if id.len() > MAX_CHAT_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RoomIdError::NotChatRoom(raw.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChatRoomId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ChatRoomId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Broadcast group a connection can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    Chat(ChatRoomId),
    Personal(UserId),
    /// Global presence channel; every live connection is a member.
    Presence,
}

impl RoomId {
    pub fn chat(id: ChatRoomId) -> Self {
        Self::Chat(id)
    }

    pub fn personal(user_id: &UserId) -> Self {
        Self::Personal(user_id.clone())
    }

    pub fn as_chat(&self) -> Option<&ChatRoomId> {
        match self {
            Self::Chat(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "chat:{id}"),
            Self::Personal(user_id) => write!(f, "user:{user_id}"),
            Self::Presence => f.write_str("presence"),
        }
    }
}
