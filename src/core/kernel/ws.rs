use crate::core::errors::ClearNodeError;
use crate::core::kernel::codec::WsCodec;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, instrument, warn};

/// Channel timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Interval between liveness checks in milliseconds
    pub keepalive_interval_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,    // 10 seconds
            keepalive_interval_ms: 10_000, // 10 seconds
        }
    }
}

impl WsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }
}

/// What the event loop does after a keepalive tick found the channel dead.
///
/// The default never reconnects; reconnection stays with the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before each attempt: doubling from `initial_delay_ms`, capped at
    /// `max_delay_ms`, `max_attempts` items long.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.initial_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_attempts as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// WebSocket session trait - pure transport layer
#[async_trait]
pub trait WsSession<C: WsCodec>: Send + Sync {
    /// Connect to the WebSocket
    async fn connect(&mut self) -> Result<(), ClearNodeError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ClearNodeError>;

    /// Receive the next data message; control frames are handled here
    async fn next_raw(&mut self) -> Option<Result<Message, ClearNodeError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ClearNodeError>;

    fn state(&self) -> ChannelState;

    fn codec(&self) -> &C;

    fn is_connected(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Encode a frame with the session codec and send it
    async fn send_frame(&mut self, frame: &C::Outbound) -> Result<(), ClearNodeError> {
        let message = self.codec().encode(frame)?;
        self.send_raw(message).await
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Tungstenite-based WebSocket implementation
pub struct TungsteniteWs<C: WsCodec> {
    url: String,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    state: ChannelState,
    codec: C,
    config: WsConfig,
}

impl<C: WsCodec> TungsteniteWs<C> {
    /// Create a new, not yet connected, WebSocket session
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `codec` - The codec to handle message encoding/decoding
    pub fn new(url: String, codec: C) -> Self {
        Self {
            url,
            write: None,
            read: None,
            state: ChannelState::Closed,
            codec,
            config: WsConfig::default(),
        }
    }

    /// Set custom WebSocket configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn mark_closed(&mut self) {
        self.state = ChannelState::Closed;
        self.write = None;
        self.read = None;
    }
}

#[async_trait]
impl<C: WsCodec> WsSession<C> for TungsteniteWs<C> {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&mut self) -> Result<(), ClearNodeError> {
        self.state = ChannelState::Connecting;

        let connection_future =
            tokio::time::timeout(self.config.connect_timeout(), connect_async(&self.url));

        let (ws_stream, _) = match connection_future.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.mark_closed();
                return Err(ClearNodeError::NetworkError(format!(
                    "WebSocket connection failed: {}",
                    e
                )));
            }
            Err(_) => {
                self.mark_closed();
                return Err(ClearNodeError::ConnectionTimeout(
                    "WebSocket connection timeout".to_string(),
                ));
            }
        };

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.state = ChannelState::Open;
        debug!("channel open");

        Ok(())
    }

    #[instrument(skip(self, msg), fields(url = %self.url))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ClearNodeError> {
        if self.state != ChannelState::Open {
            return Err(ClearNodeError::ChannelNotReady);
        }

        let write = self.write.as_mut().ok_or(ClearNodeError::ChannelNotReady)?;

        if let Err(e) = write.send(msg).await {
            self.mark_closed();
            return Err(ClearNodeError::NetworkError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }

        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ClearNodeError>> {
        loop {
            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(message)) => match message {
                    Message::Close(_) => {
                        self.mark_closed();
                        return Some(Ok(message));
                    }
                    Message::Ping(data) => {
                        // Auto-respond to pings at transport level
                        if let Err(e) = self.send_raw(Message::Pong(data)).await {
                            warn!("Failed to send pong response: {}", e);
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    _ => return Some(Ok(message)),
                },
                Some(Err(e)) => {
                    self.mark_closed();
                    return Some(Err(ClearNodeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.mark_closed();
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn close(&mut self) -> Result<(), ClearNodeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.mark_closed();
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn codec(&self) -> &C {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_disabled_by_default() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_enabled());
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn reconnect_delays_double_and_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
        };
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
    }

    #[test]
    fn keepalive_interval_defaults_to_ten_seconds() {
        assert_eq!(
            WsConfig::default().keepalive_interval(),
            Duration::from_secs(10)
        );
    }
}
