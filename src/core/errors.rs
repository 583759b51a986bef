use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClearNodeError {
    #[error("Channel not ready: no open connection")]
    ChannelNotReady,

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    #[error("No application session is tracked")]
    MissingSession,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Client event loop has stopped")]
    ClientStopped,
}

impl ClearNodeError {
    #[cold]
    #[inline(never)]
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing(reason.into())
    }

    #[cold]
    #[inline(never)]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }

    /// Errors the caller is expected to act on; everything else is logged.
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotReady
                | Self::MissingSession
                | Self::HandshakeFailure(_)
                | Self::Signing(_)
        )
    }
}
