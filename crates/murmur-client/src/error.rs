use thiserror::Error;

use murmur_net::EmitError;
use murmur_sync::{ApiError, SyncError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown notification: {0}")]
    UnknownNotification(u64),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
