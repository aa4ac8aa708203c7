// Transport session: one duplex connection, its lifecycle, and the typed
// event bus every other component subscribes to.

pub mod bus;
pub mod connector;
pub mod error;
pub mod memory;
pub mod pending;
pub mod session;
pub mod ws;

pub use bus::{EventBus, HandlerId};
pub use connector::{Connector, Link};
pub use error::{EmitError, TransportError};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use pending::Ack;
pub use session::{Session, SessionConfig};
pub use ws::WsConnector;
