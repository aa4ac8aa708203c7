use std::time::Duration;

use thiserror::Error;

use murmur_shared::{ProtocolError, TempId};

/// Failure to establish a connection. Never surfaced to emit callers; the
/// session reports these through its connection state.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid credential header: {0}")]
    InvalidCredential(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection refused: {0}")]
    Refused(String),
}

/// Failure of one outbound request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmitError {
    #[error("Not connected")]
    NotConnected,

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Connection lost before the reply arrived")]
    ConnectionLost,

    #[error("Session closed")]
    SessionClosed,

    #[error("Request token {0} is already in flight")]
    DuplicateToken(TempId),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl From<ProtocolError> for EmitError {
    fn from(e: ProtocolError) -> Self {
        EmitError::Encode(e.to_string())
    }
}
