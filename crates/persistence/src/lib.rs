//! HTTP client for the external persistence service.
//!
//! The relay never stores chat data itself. Every durable mutation goes
//! through [`Persistence`], carrying the caller's own bearer token, and every
//! call is bounded by the client timeout.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{ChatRoomId, MessageId, UserId},
    protocol::{Attachment, MessageKind},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Credential presented by the client at handshake, forwarded untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence service unreachable: {0}")]
    Network(String),
    #[error("persistence call timed out")]
    Timeout,
    #[error("persistence service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected persistence response: {0}")]
    Decode(String),
}

impl PersistenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::Decode(_) => "decode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(skip)]
    pub room_id: ChatRoomId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMessage {
    #[serde(alias = "_id")]
    pub id: MessageId,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Chat participants, used to notify their personal rooms.
    #[serde(default)]
    pub participants: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteIdentity {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default, alias = "username")]
    pub name: Option<String>,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_message(
        &self,
        token: &BearerToken,
        message: &NewMessage,
    ) -> Result<CreatedMessage, PersistenceError>;

    async fn edit_message(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        content: &str,
    ) -> Result<EditedMessage, PersistenceError>;

    async fn delete_message(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Result<(), PersistenceError>;

    async fn add_reaction(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), PersistenceError>;

    async fn remove_reaction(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        emoji: Option<&str>,
    ) -> Result<(), PersistenceError>;

    async fn fetch_identity(&self, token: &BearerToken) -> Result<RemoteIdentity, PersistenceError>;

    async fn mark_read(
        &self,
        token: &BearerToken,
        room_id: &ChatRoomId,
        message_id: &MessageId,
    ) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone)]
pub struct HttpPersistence {
    http: Client,
    base_url: Url,
}

#[derive(Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct EmojiBody<'a> {
    emoji: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadBody<'a> {
    message_id: &'a MessageId,
}

impl HttpPersistence {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, PersistenceError> {
        if base_url.cannot_be_a_base() {
            return Err(PersistenceError::Decode(format!(
                "persistence base url cannot carry a path: {base_url}"
            )));
        }
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| PersistenceError::Network(err.to_string()))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PersistenceError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                PersistenceError::Decode("persistence base url cannot carry a path".into())
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PersistenceError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistenceError::Rejected {
            status: status.as_u16(),
            message: rejection_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string()),
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PersistenceError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(transport_error)
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn create_message(
        &self,
        token: &BearerToken,
        message: &NewMessage,
    ) -> Result<CreatedMessage, PersistenceError> {
        let url = self.endpoint(&["chats", message.room_id.as_str(), "messages"])?;
        debug!(room_id = %message.room_id, "persisting message");
        self.send_json(self.http.post(url).bearer_auth(token.expose()).json(message))
            .await
    }

    async fn edit_message(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        content: &str,
    ) -> Result<EditedMessage, PersistenceError> {
        let url = self.endpoint(&["messages", message_id.as_str()])?;
        let response = self
            .send(
                self.http
                    .put(url)
                    .bearer_auth(token.expose())
                    .json(&ContentBody { content }),
            )
            .await?;
        let body = response.text().await.map_err(transport_error)?;
        if body.trim().is_empty() {
            return Ok(EditedMessage::default());
        }
        serde_json::from_str(&body).map_err(|err| PersistenceError::Decode(err.to_string()))
    }

    async fn delete_message(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Result<(), PersistenceError> {
        let url = self.endpoint(&["messages", message_id.as_str()])?;
        self.send(
            self.http
                .delete(url)
                .bearer_auth(token.expose())
                .query(&[("forEveryone", for_everyone)]),
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), PersistenceError> {
        let url = self.endpoint(&["messages", message_id.as_str(), "reactions"])?;
        self.send(
            self.http
                .post(url)
                .bearer_auth(token.expose())
                .json(&EmojiBody { emoji }),
        )
        .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        token: &BearerToken,
        message_id: &MessageId,
        emoji: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let url = self.endpoint(&["messages", message_id.as_str(), "reactions"])?;
        let mut request = self.http.delete(url).bearer_auth(token.expose());
        if let Some(emoji) = emoji {
            request = request.query(&[("emoji", emoji)]);
        }
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_identity(&self, token: &BearerToken) -> Result<RemoteIdentity, PersistenceError> {
        let url = self.endpoint(&["users", "me"])?;
        self.send_json(self.http.get(url).bearer_auth(token.expose()))
            .await
    }

    async fn mark_read(
        &self,
        token: &BearerToken,
        room_id: &ChatRoomId,
        message_id: &MessageId,
    ) -> Result<(), PersistenceError> {
        let url = self.endpoint(&["chats", room_id.as_str(), "read"])?;
        self.send(
            self.http
                .post(url)
                .bearer_auth(token.expose())
                .json(&ReadBody { message_id }),
        )
        .await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> PersistenceError {
    if err.is_timeout() {
        PersistenceError::Timeout
    } else if err.is_decode() {
        PersistenceError::Decode(err.to_string())
    } else {
        PersistenceError::Network(err.to_string())
    }
}

/// Pulls a human readable reason out of an error body (`message` or `error`).
fn rejection_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
