use std::fmt;

use serde::{Deserialize, Serialize};

// User identity = backend account id (opaque string)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server-assigned message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client-assigned correlation id for a message the server has not acknowledged yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1:1 conversation is keyed by the remote peer, a group chat by the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Peer(UserId),
    Group(GroupId),
}

impl ConversationKey {
    pub fn peer(&self) -> Option<&UserId> {
        match self {
            Self::Peer(id) => Some(id),
            Self::Group(_) => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "peer:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Bearer credential attached at connection time.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Message payload kind. Unknown kinds from the backend are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    Music,
    Video,
    File,
    Other(String),
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "music" => Self::Music,
            "video" => Self::Video,
            "file" => Self::File,
            _ => Self::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => "text".into(),
            MessageKind::Image => "image".into(),
            MessageKind::Audio => "audio".into(),
            MessageKind::Music => "music".into(),
            MessageKind::Video => "video".into(),
            MessageKind::File => "file".into(),
            MessageKind::Other(s) => s,
        }
    }
}

/// Alert category. Unrecognised categories fall back to `System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum NotificationKind {
    FriendRequest,
    FriendAccepted,
    Message,
    Like,
    Comment,
    #[default]
    System,
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "friend-request" | "friend_request" => Self::FriendRequest,
            "friend-accepted" | "friend_accepted" => Self::FriendAccepted,
            "message" => Self::Message,
            "like" => Self::Like,
            "comment" => Self::Comment,
            _ => Self::System,
        }
    }
}

impl From<NotificationKind> for &'static str {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::FriendRequest => "friend-request",
            NotificationKind::FriendAccepted => "friend-accepted",
            NotificationKind::Message => "message",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_kind_is_preserved() {
        let kind: MessageKind = serde_json::from_str("\"sticker\"").unwrap();
        assert_eq!(kind, MessageKind::Other("sticker".into()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"sticker\"");
    }

    #[test]
    fn test_unknown_notification_kind_falls_back_to_system() {
        let kind: NotificationKind = serde_json::from_str("\"birthday\"").unwrap();
        assert_eq!(kind, NotificationKind::System);
        let kind: NotificationKind = serde_json::from_str("\"like\"").unwrap();
        assert_eq!(kind, NotificationKind::Like);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("secret-token");
        assert!(!format!("{cred:?}").contains("secret"));
        assert_eq!(cred.bearer(), "Bearer secret-token");
    }

    #[test]
    fn test_short_user_id() {
        assert_eq!(UserId::from("0123456789abcdef").short(), "01234567");
        assert_eq!(UserId::from("abc").short(), "abc");
    }
}
