use crate::contract::{
    ChannelAuthProvider, PersistentChannel, RestTransport, SyncRequest, SyncResponse,
    SynchroniseTransport,
};
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Connection state of the persistent channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug)]
pub struct TransportSelectorConfig {
    /// Endpoint for the stateless synchronise call.
    pub sync_endpoint: String,
    /// Deadline applied to each channel send, REST post, and connect.
    pub submission_timeout: Duration,
}

impl Default for TransportSelectorConfig {
    fn default() -> Self {
        Self {
            sync_endpoint: "notification/synchronise".to_owned(),
            submission_timeout: Duration::from_secs(30),
        }
    }
}

/// Chooses a transport for each synchronise submission.
///
/// When the persistent channel is connected the submission goes over it;
/// any channel error demotes the state to `Disconnected` and the same
/// submission is transparently retried over the stateless fallback.
/// Reconnection is attempted in the background on a later submission once
/// authentication material is available, so it never holds up the
/// fallback path.
pub struct TransportSelector {
    channel: Arc<dyn PersistentChannel>,
    rest: Arc<dyn RestTransport>,
    auth: Arc<dyn ChannelAuthProvider>,
    state: Arc<Mutex<ChannelState>>,
    config: TransportSelectorConfig,
}

impl TransportSelector {
    pub fn new(
        channel: Arc<dyn PersistentChannel>,
        rest: Arc<dyn RestTransport>,
        auth: Arc<dyn ChannelAuthProvider>,
        config: TransportSelectorConfig,
    ) -> Self {
        Self { channel, rest, auth, state: Arc::new(Mutex::new(ChannelState::Disconnected)), config }
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.state.lock().expect("channel state mutex poisoned")
    }

    /// Forwards a push handler to the persistent channel. Pushes arrive
    /// whenever the channel is connected, independent of submissions.
    pub fn attach_push_handler(&self, handler: crate::contract::PushHandler) {
        self.channel.on_push(handler);
    }

    /// Kicks off a background connect if the channel is down and auth is
    /// available. Never blocks the caller.
    fn maybe_reconnect(&self) {
        let Some(auth) = self.auth.current() else {
            return;
        };

        {
            let mut state = self.state.lock().expect("channel state mutex poisoned");
            if *state != ChannelState::Disconnected {
                return;
            }
            *state = ChannelState::Connecting;
        }

        let channel = self.channel.clone();
        let state = self.state.clone();
        let timeout = self.config.submission_timeout;
        tokio::spawn(async move {
            let attempt =
                tokio::time::timeout(timeout, channel.connect(&auth.channel_url, &auth.token))
                    .await;
            let next = match attempt {
                Ok(Ok(())) => {
                    log::debug!("tx: persistent channel connected");
                    ChannelState::Connected
                }
                Ok(Err(err)) => {
                    log::warn!("tx: channel connect failed: {err}");
                    ChannelState::Disconnected
                }
                Err(_) => {
                    log::warn!("tx: channel connect timed out");
                    ChannelState::Disconnected
                }
            };
            *state.lock().expect("channel state mutex poisoned") = next;
        });
    }

    async fn submit_over_channel(&self, body: JsonValue) -> Result<SyncResponse, TransportError> {
        let sent = tokio::time::timeout(self.config.submission_timeout, self.channel.send(body))
            .await
            .map_err(|_| TransportError::Timeout {
                elapsed_ms: self.config.submission_timeout.as_millis() as u64,
            })??;
        parse_response(sent)
    }

    async fn submit_over_rest(&self, body: JsonValue) -> Result<SyncResponse, TransportError> {
        let sent = tokio::time::timeout(
            self.config.submission_timeout,
            self.rest.post(&self.config.sync_endpoint, body),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            elapsed_ms: self.config.submission_timeout.as_millis() as u64,
        })??;
        parse_response(sent)
    }
}

fn parse_response(body: JsonValue) -> Result<SyncResponse, TransportError> {
    serde_json::from_value(body).map_err(|err| TransportError::MalformedResponse(err.to_string()))
}

#[async_trait]
impl SynchroniseTransport for TransportSelector {
    async fn submit(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        let body = serde_json::to_value(&request)
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))?;

        let channel_error = if self.channel_state() == ChannelState::Connected {
            match self.submit_over_channel(body.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    log::warn!("tx: channel submission failed, using fallback: {err}");
                    *self.state.lock().expect("channel state mutex poisoned") =
                        ChannelState::Disconnected;
                    Some(err)
                }
            }
        } else {
            self.maybe_reconnect();
            None
        };

        match self.submit_over_rest(body).await {
            Ok(response) => Ok(response),
            Err(rest_err) => match channel_error {
                Some(channel_err) => Err(TransportError::Exhausted(format!(
                    "channel: {channel_err}; fallback: {rest_err}"
                ))),
                None => Err(rest_err),
            },
        }
    }
}
