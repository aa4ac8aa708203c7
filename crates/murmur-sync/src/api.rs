//! REST collaborators the sync layer calls directly, bypassing the socket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use murmur_shared::{ConversationKey, NotificationKind, ServerMessage, UserId};

use crate::error::ApiError;

/// One page of older messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub messages: Vec<ServerMessage>,
    /// Whether the server has pages older than this one.
    pub has_more: bool,
}

#[async_trait]
pub trait HistoryApi: Send + Sync + 'static {
    /// Fetch page `page` (1-based, newest page first) of a conversation's history.
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage, ApiError>;

    /// Persist that everything in the conversation has been read.
    async fn mark_read(&self, key: &ConversationKey) -> Result<(), ApiError>;
}

/// A notification as listed by the REST API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteNotification {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, rename = "sender")]
    pub related_user_id: Option<UserId>,
}

#[async_trait]
pub trait NotificationApi: Send + Sync + 'static {
    /// Most recent notifications, newest first.
    async fn fetch_notifications(&self) -> Result<Vec<RemoteNotification>, ApiError>;

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError>;

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;
}
