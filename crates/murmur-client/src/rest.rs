//! REST collaborators over HTTP.
//!
//! Every endpoint answers with the same JSON envelope:
//! `{"success": bool, "data": ..., "pagination": {...}?, "message": "..."?}`.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use murmur_shared::{ConversationKey, Credential, ServerMessage};
use murmur_sync::{ApiError, HistoryApi, HistoryPage, NotificationApi, RemoteNotification};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: Option<u32>,
    pages: Option<u32>,
    has_more: Option<bool>,
}

/// HTTP client for the backend REST API.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, credential)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.credential.token())
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        debug!(status = status.as_u16(), len = body.len(), "REST response");
        decode(status.is_success(), status.as_u16(), &body)
    }
}

fn decode<T: DeserializeOwned>(ok: bool, status: u16, body: &str) -> Result<Envelope<T>, ApiError> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !ok => return Err(ApiError::Transport(format!("HTTP {status}"))),
        Err(e) => return Err(ApiError::Decode(e.to_string())),
    };
    if !envelope.success || !ok {
        let reason = envelope
            .message
            .clone()
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ApiError::Rejected(reason));
    }
    Ok(envelope)
}

fn history_path(key: &ConversationKey, page: u32, limit: u32) -> String {
    match key {
        ConversationKey::Peer(peer) => format!("/api/messages/{peer}?page={page}&limit={limit}"),
        ConversationKey::Group(group) => {
            format!("/api/messages/group/{group}?page={page}&limit={limit}")
        }
    }
}

/// Whether older pages exist. Falls back to "a full page came back" when
/// the server sends no pagination block.
fn has_more(pagination: Option<&Pagination>, page: u32, returned: usize, limit: u32) -> bool {
    match pagination {
        Some(Pagination {
            has_more: Some(more), ..
        }) => *more,
        Some(Pagination {
            pages: Some(pages),
            page: current,
            ..
        }) => current.unwrap_or(page) < *pages,
        _ => returned >= limit as usize,
    }
}

#[async_trait]
impl HistoryApi for RestClient {
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage, ApiError> {
        let envelope: Envelope<Vec<ServerMessage>> = self
            .call(self.request(Method::GET, &history_path(key, page, limit)))
            .await?;
        let messages = envelope.data.unwrap_or_default();
        let has_more = has_more(envelope.pagination.as_ref(), page, messages.len(), limit);
        Ok(HistoryPage { messages, has_more })
    }

    async fn mark_read(&self, key: &ConversationKey) -> Result<(), ApiError> {
        let path = match key {
            ConversationKey::Peer(peer) => format!("/api/messages/{peer}/read"),
            ConversationKey::Group(group) => format!("/api/messages/group/{group}/read"),
        };
        self.call::<serde_json::Value>(self.request(Method::PUT, &path))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl NotificationApi for RestClient {
    async fn fetch_notifications(&self) -> Result<Vec<RemoteNotification>, ApiError> {
        let envelope: Envelope<Vec<RemoteNotification>> = self
            .call(self.request(Method::GET, "/api/notifications"))
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/api/notifications/{id}/read");
        self.call::<serde_json::Value>(self.request(Method::PUT, &path))
            .await
            .map(|_| ())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.call::<serde_json::Value>(self.request(Method::PUT, "/api/notifications/read-all"))
            .await
            .map(|_| ())
    }
}
