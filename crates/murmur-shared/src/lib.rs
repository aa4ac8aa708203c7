//! Types shared by every murmur crate: identifiers, the wire protocol
//! spoken over the duplex channel, and protocol-level constants.

pub mod constants;
pub mod error;
pub mod events;
pub mod ids;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use events::{DisconnectReason, EventKind, SessionEvent};
pub use ids::MonotonicIds;
pub use protocol::{ClientEmit, ServerEvent, ServerMessage};
pub use types::*;
