use thiserror::Error;

use murmur_net::EmitError;
use murmur_shared::TempId;

/// Errors from the REST collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Network or HTTP-level failure.
    #[error("Request failed: {0}")]
    Transport(String),

    /// The server answered `success: false`.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Response body did not match the expected envelope.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Errors surfaced by conversation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Operation needs a live session and there is none.
    #[error("Not connected")]
    NotConnected,

    /// The server did not accept the message; it is now flagged failed.
    #[error("Send of {temp_id} failed: {source}")]
    SendFailed {
        temp_id: TempId,
        #[source]
        source: EmitError,
    },

    #[error("Message {0} is not in a failed state")]
    NotRetryable(TempId),

    #[error("Message {0} is not in this conversation")]
    UnknownMessage(TempId),

    #[error("History request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Conversation is closed")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
