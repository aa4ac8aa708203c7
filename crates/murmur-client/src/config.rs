//! Client configuration loaded from environment variables.
//!
//! Everything except the credential has a default that targets a backend
//! running locally.

use std::time::Duration;

use murmur_net::SessionConfig;
use murmur_shared::constants::{
    DEFAULT_API_URL, DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_SOCKET_URL, EMIT_TIMEOUT_SECS,
    MAX_RECONNECT_ATTEMPTS,
};
use murmur_shared::{Credential, UserId};
use murmur_sync::SyncConfig;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Duplex endpoint.
    /// Env: `MURMUR_SOCKET_URL`
    /// Default: `ws://127.0.0.1:5000/socket`
    pub socket_url: String,

    /// Base URL of the REST API.
    /// Env: `MURMUR_API_URL`
    /// Default: `http://127.0.0.1:5000`
    pub api_url: String,

    /// Bearer token. Without one the client cannot connect.
    /// Env: `MURMUR_TOKEN`
    pub credential: Option<Credential>,

    /// Account id of the signed-in user.
    /// Env: `MURMUR_USER_ID`
    pub user_id: Option<UserId>,

    /// Env: `MURMUR_EMIT_TIMEOUT_SECS`
    /// Default: `10`
    pub emit_timeout: Duration,

    /// Env: `MURMUR_MAX_RECONNECT_ATTEMPTS`
    /// Default: `10`
    pub max_reconnect_attempts: u32,

    /// Env: `MURMUR_HISTORY_PAGE_SIZE`
    /// Default: `30`
    pub history_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            credential: None,
            user_id: None,
            emit_timeout: Duration::from_secs(EMIT_TIMEOUT_SECS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("MURMUR_SOCKET_URL") {
            config.socket_url = url;
        }

        if let Some(url) = lookup("MURMUR_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("MURMUR_TOKEN") {
            if !token.is_empty() {
                config.credential = Some(Credential::new(token));
            }
        }

        if let Some(id) = lookup("MURMUR_USER_ID") {
            if !id.is_empty() {
                config.user_id = Some(UserId::new(id));
            }
        }

        if let Some(val) = lookup("MURMUR_EMIT_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.emit_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid MURMUR_EMIT_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("MURMUR_MAX_RECONNECT_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.max_reconnect_attempts = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid MURMUR_MAX_RECONNECT_ATTEMPTS, using default"
                ),
            }
        }

        if let Some(val) = lookup("MURMUR_HISTORY_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.history_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid MURMUR_HISTORY_PAGE_SIZE, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            emit_timeout: self.emit_timeout,
            max_reconnect_attempts: self.max_reconnect_attempts,
            ..SessionConfig::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.history_page_size,
            ..SyncConfig::default()
        }
    }
}
