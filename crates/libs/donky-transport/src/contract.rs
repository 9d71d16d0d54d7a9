use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Outbound half of a synchronise round-trip: the pending client
/// notifications drained from the queue store, as opaque JSON maps.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncRequest {
    pub client_notifications: Vec<JsonValue>,
}

impl SyncRequest {
    pub fn new(client_notifications: Vec<JsonValue>) -> Self {
        Self { client_notifications }
    }

    pub fn is_empty(&self) -> bool {
        self.client_notifications.is_empty()
    }
}

/// Inbound half: zero or more server notifications to dispatch.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncResponse {
    pub server_notifications: Vec<JsonValue>,
}

/// The synchronise engine's transport contract.
///
/// Implementations must be safe for concurrent submission, though the
/// engine itself serialises cycles.
#[async_trait]
pub trait SynchroniseTransport: Send + Sync {
    async fn submit(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;
}

/// Stateless request/response collaborator (REST fallback).
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn post(&self, endpoint: &str, body: JsonValue) -> Result<JsonValue, TransportError>;
}

/// Callback invoked for each server-initiated push arriving over the
/// persistent channel, outside any synchronise round-trip.
pub type PushHandler = Arc<dyn Fn(JsonValue) + Send + Sync>;

/// Persistent bidirectional channel collaborator.
///
/// `send` awaits the response correlated to the submitted payload. Channel
/// implementations may swallow their own framing/oversize failures; any
/// error returned here demotes the selector to the fallback path.
#[async_trait]
pub trait PersistentChannel: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<(), TransportError>;

    async fn send(&self, body: JsonValue) -> Result<JsonValue, TransportError>;

    /// Registers the handler for server-initiated pushes. Channels with
    /// no push capability keep the default no-op.
    fn on_push(&self, _handler: PushHandler) {}
}

/// Point-in-time authentication material for the persistent channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelAuth {
    pub token: String,
    pub channel_url: String,
}

/// Supplies the current token and channel URL at submission time.
///
/// The provider owns refresh; the selector only reads current values and
/// treats `None` as "channel not configured yet" (fallback only).
pub trait ChannelAuthProvider: Send + Sync {
    fn current(&self) -> Option<ChannelAuth>;
}
