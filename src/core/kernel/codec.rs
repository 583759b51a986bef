use crate::core::errors::ClearNodeError;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for converting between raw WebSocket messages and typed frames
///
/// Implementations own the wire format of one protocol. Control messages
/// (ping, pong, close) are handled at the transport level and never reach
/// the codec as data.
pub trait WsCodec: Send + Sync + 'static {
    /// Frames produced by the local side
    type Outbound: Send + Sync;

    /// Frames received from the remote side
    type Inbound: Send;

    /// Encode an outbound frame into a WebSocket message
    fn encode(&self, frame: &Self::Outbound) -> Result<Message, ClearNodeError>;

    /// Decode a raw WebSocket message into a typed frame
    ///
    /// # Returns
    /// - `Ok(Some(frame))` - Successfully decoded frame
    /// - `Ok(None)` - Message carries no data for this protocol
    /// - `Err(error)` - Message could not be decoded
    fn decode_message(&self, message: Message) -> Result<Option<Self::Inbound>, ClearNodeError>;
}
