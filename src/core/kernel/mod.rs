/// Kernel - transport and signing layer of the client
///
/// The kernel holds the protocol-agnostic pieces: the WebSocket transport,
/// the codec contract that turns raw messages into typed frames, and the
/// signers. Nothing in here knows about ClearNode methods.
///
/// # Architecture
///
/// ## Transport Layer
/// - `WsSession`: WebSocket connection contract
/// - `TungsteniteWs`: tokio-tungstenite implementation
/// - `WsConfig` / `ReconnectPolicy`: timing and reconnection knobs
///
/// ## Authentication
/// - `MessageSigner`: session-key signatures over JSON payloads
/// - `WalletSigner`: EIP-712 typed-data signatures from the wallet
/// - `TypedData`: the auth `Policy` structure and its EIP-712 digest
///
/// ## Message Handling
/// - `WsCodec`: protocol-specific encoding/decoding
///
/// ## Example
/// ```rust,no_run
/// use clearnode::core::kernel::*;
/// use serde_json::json;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let signer = SessionKeySigner::generate();
/// let signature = signer.sign(&json!([1, "ping", [], 0]))?;
/// assert!(signature.starts_with("0x"));
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod eip712;
pub mod signer;
pub mod ws;

// Re-export key types for convenience
pub use codec::WsCodec;
pub use eip712::{Eip712Domain, PolicyAllowance, PolicyMessage, TypedData};
pub use signer::{
    keccak256, payload_digest, public_key_to_address, recover_address, LocalWallet,
    MessageSigner, SessionKeySigner, WalletSigner,
};
pub use ws::{ChannelState, ReconnectPolicy, TungsteniteWs, WsConfig, WsSession};
