use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{
    BearerToken, CreatedMessage, EditedMessage, NewMessage, Persistence, PersistenceError,
    RemoteIdentity,
};
use shared::domain::{ChatRoomId, MessageId};

use crate::{app_state::AppState, config::Settings, health};

pub const SECRET: &str = "test-secret";

/// Persistence stand-in for routes that never reach the service.
pub struct OfflinePersistence;

fn offline() -> PersistenceError {
    PersistenceError::Network("offline".into())
}

#[async_trait]
impl Persistence for OfflinePersistence {
    async fn create_message(
        &self,
        _token: &BearerToken,
        _message: &NewMessage,
    ) -> Result<CreatedMessage, PersistenceError> {
        Err(offline())
    }

    async fn edit_message(
        &self,
        _token: &BearerToken,
        _message_id: &MessageId,
        _content: &str,
    ) -> Result<EditedMessage, PersistenceError> {
        Err(offline())
    }

    async fn delete_message(
        &self,
        _token: &BearerToken,
        _message_id: &MessageId,
        _for_everyone: bool,
    ) -> Result<(), PersistenceError> {
        Err(offline())
    }

    async fn add_reaction(
        &self,
        _token: &BearerToken,
        _message_id: &MessageId,
        _emoji: &str,
    ) -> Result<(), PersistenceError> {
        Err(offline())
    }

    async fn remove_reaction(
        &self,
        _token: &BearerToken,
        _message_id: &MessageId,
        _emoji: Option<&str>,
    ) -> Result<(), PersistenceError> {
        Err(offline())
    }

    async fn fetch_identity(&self, _token: &BearerToken) -> Result<RemoteIdentity, PersistenceError> {
        Err(offline())
    }

    async fn mark_read(
        &self,
        _token: &BearerToken,
        _room_id: &ChatRoomId,
        _message_id: &MessageId,
    ) -> Result<(), PersistenceError> {
        Err(offline())
    }
}

pub fn settings() -> Settings {
    Settings {
        jwt_secret: SECRET.into(),
        max_connections: 2,
        ..Settings::default()
    }
}

/// The recorder is process-global, so every test shares one handle.
pub fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| health::install_recorder().expect("recorder"))
        .clone()
}

pub fn state(settings: Settings) -> Arc<AppState> {
    Arc::new(AppState::new(
        settings,
        Arc::new(OfflinePersistence),
        Some(metrics_handle()),
    ))
}
