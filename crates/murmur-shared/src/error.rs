use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}
