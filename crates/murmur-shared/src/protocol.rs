//! Frames exchanged over the duplex channel.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`. Inbound frames decode into
//! [`ServerEvent`], outbound frames are built from [`ClientEmit`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    ConversationKey, GroupId, MessageId, MessageKind, NotificationKind, PresenceStatus, TempId,
    UserId,
};

/// All events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Authoritative snapshot of online peers, sent right after connect
    #[serde(rename = "online-users")]
    OnlineUsers(OnlineUsers),

    /// One peer went online or offline
    #[serde(rename = "user-status-change")]
    UserStatusChange(UserStatusChange),

    /// Chat delivery (from a peer, or the relay of one of our own messages)
    #[serde(rename = "new-message")]
    NewMessage(NewMessage),

    /// Acknowledgment of a `send-message` emit
    #[serde(rename = "message-sent")]
    MessageSent(MessageSent),

    /// Rejection of a `send-message` emit
    #[serde(rename = "message-error")]
    MessageError(MessageError),

    #[serde(rename = "user-typing")]
    UserTyping(UserTyping),

    /// A peer read our messages
    #[serde(rename = "messages-read")]
    MessagesRead(MessagesRead),

    #[serde(rename = "friend-request-received")]
    FriendRequestReceived(FriendRequest),

    #[serde(rename = "friend-request-was-accepted")]
    FriendRequestAccepted(FriendAccepted),

    #[serde(rename = "new-message-notification")]
    NewMessageNotification(MessageNotification),

    /// Generic alert push
    #[serde(rename = "notification:new")]
    NotificationNew(GenericNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUsers {
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusChange {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub message: ServerMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub temp_id: TempId,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub temp_id: TempId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: UserId,
    pub is_typing: bool,
    /// Set when the typing happens in a group conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    pub reader_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendAccepted {
    pub accepter_id: UserId,
    #[serde(default)]
    pub accepter_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNotification {
    /// Server-side notification id, used for de-duplication when present.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub related_user_id: Option<UserId>,
}

/// A user reference as the backend sends it: either a bare id or a
/// populated user document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(UserId),
    Populated {
        #[serde(rename = "_id")]
        id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl UserRef {
    pub fn id(&self) -> &UserId {
        match self {
            Self::Id(id) => id,
            Self::Populated { id, .. } => id,
        }
    }
}

impl From<UserId> for UserRef {
    fn from(id: UserId) -> Self {
        Self::Id(id)
    }
}

/// A chat message record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserRef>,
    #[serde(default, rename = "group", skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    /// Echo of the client correlation id, when the server relays our own message.
    #[serde(default, rename = "tempId", skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

impl ServerMessage {
    /// The conversation this record belongs to, seen from `me`.
    ///
    /// Returns `None` for a 1:1 record we sent that carries no receiver.
    pub fn conversation_for(&self, me: &UserId) -> Option<ConversationKey> {
        if let Some(group) = &self.group {
            return Some(ConversationKey::Group(group.clone()));
        }
        if self.sender.id() == me {
            self.receiver
                .as_ref()
                .map(|r| ConversationKey::Peer(r.id().clone()))
        } else {
            Some(ConversationKey::Peer(self.sender.id().clone()))
        }
    }
}

/// All events the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEmit {
    #[serde(rename = "send-message")]
    SendMessage(SendMessage),

    /// Ask the server to put this connection in a conversation's room
    #[serde(rename = "join-conversation")]
    JoinConversation(RoomTarget),

    #[serde(rename = "leave-conversation")]
    LeaveConversation(RoomTarget),

    #[serde(rename = "typing-start")]
    TypingStart(Recipient),

    #[serde(rename = "typing-stop")]
    TypingStop(Recipient),

    #[serde(rename = "mark-messages-read")]
    MarkMessagesRead(RoomTarget),

    #[serde(rename = "friend-request-sent")]
    FriendRequestSent(FriendRequestSent),

    #[serde(rename = "friend-request-accepted")]
    FriendRequestAccepted(FriendRequestAcceptedEmit),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(flatten)]
    pub to: Recipient,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub temp_id: TempId,
}

/// Conversation addressed as `friendId` / `groupId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl From<&ConversationKey> for RoomTarget {
    fn from(key: &ConversationKey) -> Self {
        match key {
            ConversationKey::Peer(id) => Self {
                friend_id: Some(id.clone()),
                group_id: None,
            },
            ConversationKey::Group(id) => Self {
                friend_id: None,
                group_id: Some(id.clone()),
            },
        }
    }
}

/// Conversation addressed as `receiverId` / `groupId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl From<&ConversationKey> for Recipient {
    fn from(key: &ConversationKey) -> Self {
        match key {
            ConversationKey::Peer(id) => Self {
                receiver_id: Some(id.clone()),
                group_id: None,
            },
            ConversationKey::Group(id) => Self {
                receiver_id: None,
                group_id: Some(id.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestSent {
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestAcceptedEmit {
    pub requester_id: UserId,
}

impl ServerEvent {
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// The request token of the emit this event answers, if it is a reply.
    pub fn reply_token(&self) -> Option<TempId> {
        match self {
            Self::MessageSent(ack) => Some(ack.temp_id),
            Self::MessageError(err) => Some(err.temp_id),
            _ => None,
        }
    }
}

impl ClientEmit {
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// The token a reply to this emit will carry. `None` for fire-and-forget emits.
    pub fn request_token(&self) -> Option<TempId> {
        match self {
            Self::SendMessage(msg) => Some(msg.temp_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send-message",
            Self::JoinConversation(_) => "join-conversation",
            Self::LeaveConversation(_) => "leave-conversation",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
            Self::MarkMessagesRead(_) => "mark-messages-read",
            Self::FriendRequestSent(_) => "friend-request-sent",
            Self::FriendRequestAccepted(_) => "friend-request-accepted",
        }
    }
}
