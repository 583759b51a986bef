use crate::clearnode::codec::RpcCodec;
use crate::clearnode::types::RpcRequest;
use crate::core::errors::ClearNodeError;
use crate::core::kernel::ws::{ChannelState, WsSession};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

/// Builds a fresh, unconnected channel for an endpoint
pub type ChannelFactory<S> = Box<dyn Fn(&str) -> S + Send + Sync>;

/// What a keepalive tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// Channel was open and a signed ping went out
    PingSent,
    /// Channel was found dead and dropped; nothing was sent
    ChannelCleared,
    /// No channel to check
    Idle,
}

/// Owns at most one channel to the ClearNode
pub struct ConnectionManager<S> {
    endpoint: String,
    factory: ChannelFactory<S>,
    channel: Option<S>,
}

impl<S: WsSession<RpcCodec>> ConnectionManager<S> {
    pub fn new(endpoint: impl Into<String>, factory: ChannelFactory<S>) -> Self {
        Self {
            endpoint: endpoint.into(),
            factory,
            channel: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map_or(ChannelState::Closed, |channel| channel.state())
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Open a new channel, replacing any previous one
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn connect(&mut self) -> Result<(), ClearNodeError> {
        self.teardown().await;

        let mut channel = (self.factory)(&self.endpoint);
        channel.connect().await?;
        self.channel = Some(channel);

        info!("connected");
        Ok(())
    }

    pub async fn send(&mut self, frame: &RpcRequest) -> Result<(), ClearNodeError> {
        let channel = self
            .channel
            .as_mut()
            .filter(|channel| channel.is_connected())
            .ok_or(ClearNodeError::ChannelNotReady)?;

        debug!(method = %frame.method, request_id = frame.request_id, "sending");
        channel.send_frame(frame).await
    }

    /// Ping an open channel, or drop a dead one
    ///
    /// `ping` is only called when the channel is open.
    pub async fn keepalive_tick<F>(&mut self, ping: F) -> Result<KeepaliveOutcome, ClearNodeError>
    where
        F: FnOnce() -> Result<RpcRequest, ClearNodeError>,
    {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(KeepaliveOutcome::Idle);
        };

        if channel.is_connected() {
            let frame = ping()?;
            channel.send_frame(&frame).await?;
            return Ok(KeepaliveOutcome::PingSent);
        }

        warn!(state = ?channel.state(), "channel is not open, dropping it");
        if channel.state() != ChannelState::Closed {
            if let Err(e) = channel.close().await {
                warn!("failed to close stale channel: {}", e);
            }
        }
        self.channel = None;

        Ok(KeepaliveOutcome::ChannelCleared)
    }

    /// Close and forget the current channel, if any
    pub async fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if channel.state() != ChannelState::Closed {
                if let Err(e) = channel.close().await {
                    warn!("failed to close channel: {}", e);
                }
            }
            debug!("channel released");
        }
    }

    /// Next inbound message; pending while no channel is open
    pub async fn recv(&mut self) -> Option<Result<Message, ClearNodeError>> {
        match self.channel.as_mut() {
            Some(channel) if channel.is_connected() => channel.next_raw().await,
            _ => std::future::pending().await,
        }
    }
}
