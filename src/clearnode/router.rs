use crate::clearnode::codec::RpcCodec;
use crate::clearnode::types::{
    AppSessionClosed, AppSessionCreated, AuthChallenge, AuthVerifyResult, InboundFrame, RpcError,
};
use crate::core::errors::ClearNodeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::types::Balance;
use async_trait::async_trait;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

/// Receives decoded frames from the router
#[async_trait]
pub trait FrameHandler: Send {
    async fn on_auth_challenge(&mut self, challenge: AuthChallenge) -> Result<(), ClearNodeError>;

    async fn on_auth_verify(&mut self, result: AuthVerifyResult) -> Result<(), ClearNodeError>;

    async fn on_error(&mut self, error: RpcError) -> Result<(), ClearNodeError>;

    async fn on_balances(&mut self, balances: Vec<Balance>) -> Result<(), ClearNodeError>;

    async fn on_app_session_created(
        &mut self,
        created: AppSessionCreated,
    ) -> Result<(), ClearNodeError>;

    async fn on_app_session_closed(
        &mut self,
        closed: AppSessionClosed,
    ) -> Result<(), ClearNodeError>;
}

/// What happened to one inbound message
#[derive(Debug)]
pub enum Dispatch {
    /// Delivered to its handler
    Handled,
    /// Valid but of no interest (pong, control frames, unknown methods)
    Ignored,
    /// Could not be decoded; logged and discarded
    Dropped(ClearNodeError),
    /// Delivered, but the handler failed
    Failed(ClearNodeError),
}

impl Dispatch {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// Decodes inbound messages and hands them to a [`FrameHandler`]
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    codec: RpcCodec,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            codec: RpcCodec::new(),
        }
    }

    pub async fn route_message<H: FrameHandler>(
        &self,
        message: Message,
        handler: &mut H,
    ) -> Dispatch {
        match self.codec.decode_message(message) {
            Ok(Some(frame)) => self.dispatch(frame, handler).await,
            Ok(None) => Dispatch::Ignored,
            Err(e) => {
                warn!("dropping inbound message: {}", e);
                Dispatch::Dropped(e)
            }
        }
    }

    pub async fn route_text<H: FrameHandler>(&self, text: &str, handler: &mut H) -> Dispatch {
        match self.codec.decode_text(text) {
            Ok(frame) => self.dispatch(frame, handler).await,
            Err(e) => {
                warn!("dropping inbound message: {}", e);
                Dispatch::Dropped(e)
            }
        }
    }

    pub async fn dispatch<H: FrameHandler>(
        &self,
        frame: InboundFrame,
        handler: &mut H,
    ) -> Dispatch {
        let method = frame.method_name().to_string();
        trace!(%method, "dispatching");

        let result = match frame {
            InboundFrame::AuthChallenge(challenge) => handler.on_auth_challenge(challenge).await,
            InboundFrame::AuthVerify(result) => handler.on_auth_verify(result).await,
            InboundFrame::Error(error) => handler.on_error(error).await,
            InboundFrame::LedgerBalances(balances) => handler.on_balances(balances).await,
            InboundFrame::AppSessionCreated(created) => {
                handler.on_app_session_created(created).await
            }
            InboundFrame::AppSessionClosed(closed) => handler.on_app_session_closed(closed).await,
            InboundFrame::Pong | InboundFrame::Unknown { .. } => {
                debug!(%method, "ignoring frame");
                return Dispatch::Ignored;
            }
        };

        match result {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                if e.is_caller_facing() {
                    warn!(%method, "handler failed: {}", e);
                } else {
                    error!(%method, "handler failed: {}", e);
                }
                Dispatch::Failed(e)
            }
        }
    }
}
