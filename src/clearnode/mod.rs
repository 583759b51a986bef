pub mod app_session;
pub mod auth;
pub mod builder;
pub mod client;
pub mod codec;
pub mod connection;
pub mod gating;
pub mod router;
pub mod types;

// Re-export main types for easier importing
pub use app_session::{close_allocations, AppSessionProtocol, PendingOp};
pub use auth::{AuthProtocol, AuthState};
pub use builder::{build_client, ClientBuilder};
pub use client::{
    ClearNodeClient, ClientCommand, ClientCore, ClientEvent, ClientHandle, SessionTerms,
};
pub use codec::RpcCodec;
pub use connection::{ChannelFactory, ConnectionManager, KeepaliveOutcome};
pub use gating::GameStatus;
pub use router::{Dispatch, FrameHandler, MessageRouter};
pub use types::{
    AppSessionClosed, AppSessionCreated, AuthChallenge, AuthVerifyResult, InboundFrame,
    RequestIds, RpcEnvelope, RpcError, RpcMethod, RpcRequest,
};
