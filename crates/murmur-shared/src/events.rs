//! The ordered event stream a session delivers to its subscribers.

use crate::protocol::ServerEvent;

/// Why the session went to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called or the credential was withdrawn.
    Teardown,
    /// The live connection dropped; the session will try to reconnect.
    LinkLost,
    /// Reconnect attempts were exhausted.
    GaveUp,
}

/// Everything a subscriber can observe, lifecycle and traffic interleaved in
/// the order the session processed them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { connection_id: String },
    Disconnected { reason: DisconnectReason },
    Server(ServerEvent),
}

/// Subscription key: one per [`SessionEvent`] shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    OnlineUsers,
    UserStatusChange,
    NewMessage,
    MessageSent,
    MessageError,
    UserTyping,
    MessagesRead,
    FriendRequestReceived,
    FriendRequestAccepted,
    NewMessageNotification,
    NotificationNew,
}

impl EventKind {
    /// Wire name of the event, as used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Disconnected => "disconnect",
            Self::OnlineUsers => "online-users",
            Self::UserStatusChange => "user-status-change",
            Self::NewMessage => "new-message",
            Self::MessageSent => "message-sent",
            Self::MessageError => "message-error",
            Self::UserTyping => "user-typing",
            Self::MessagesRead => "messages-read",
            Self::FriendRequestReceived => "friend-request-received",
            Self::FriendRequestAccepted => "friend-request-was-accepted",
            Self::NewMessageNotification => "new-message-notification",
            Self::NotificationNew => "notification:new",
        }
    }
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Server(event) => event.kind(),
        }
    }
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::OnlineUsers(_) => EventKind::OnlineUsers,
            Self::UserStatusChange(_) => EventKind::UserStatusChange,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageError(_) => EventKind::MessageError,
            Self::UserTyping(_) => EventKind::UserTyping,
            Self::MessagesRead(_) => EventKind::MessagesRead,
            Self::FriendRequestReceived(_) => EventKind::FriendRequestReceived,
            Self::FriendRequestAccepted(_) => EventKind::FriendRequestAccepted,
            Self::NewMessageNotification(_) => EventKind::NewMessageNotification,
            Self::NotificationNew(_) => EventKind::NotificationNew,
        }
    }
}
