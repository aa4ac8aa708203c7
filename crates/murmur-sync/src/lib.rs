//! # murmur-sync
//!
//! Client-side state kept consistent with the server over one session:
//! who is online, the message log of each open conversation, and the
//! in-app notification list.
//!
//! Every service here has a single writer path, the session's event
//! handlers, plus explicit operations for the UI. Services are owned
//! objects with an `attach`/`detach` (or `open`/`close`) lifecycle rather
//! than process globals.

pub mod api;
pub mod conversation;
pub mod message;
pub mod notifications;
pub mod presence;
pub mod synchronizer;
pub mod typing;

mod error;

pub use api::{HistoryApi, HistoryPage, NotificationApi, RemoteNotification};
pub use conversation::{Applied, BackfillOutcome, Conversation};
pub use error::{ApiError, SyncError};
pub use message::{Delivery, DeliveryState, Message, MessageRef};
pub use notifications::{NotificationDraft, NotificationRecord, NotificationService, NotificationStore};
pub use presence::{PresenceRegistry, PresenceService};
pub use synchronizer::{ConversationSync, SyncConfig, Synchronizer};
