//! Facade wiring one session to the services that consume it.

use std::sync::Arc;

use tracing::{info, warn};

use murmur_net::{Connector, Session, WsConnector};
use murmur_shared::protocol::{FriendRequestAcceptedEmit, FriendRequestSent};
use murmur_shared::{ClientEmit, ConnectionState, ConversationKey, Credential, GroupId, UserId};
use murmur_sync::{
    ConversationSync, HistoryApi, NotificationApi, NotificationService, PresenceService,
    Synchronizer,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rest::RestClient;

/// Everything the UI needs for one signed-in user.
pub struct RealtimeClient {
    session: Session,
    credential: Credential,
    presence: PresenceService,
    notifications: NotificationService,
    notification_api: Arc<dyn NotificationApi>,
    sync: Synchronizer,
}

impl RealtimeClient {
    /// Build against the endpoints in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let credential = config
            .credential
            .clone()
            .ok_or(ClientError::MissingConfig("MURMUR_TOKEN"))?;
        let me = config
            .user_id
            .clone()
            .ok_or(ClientError::MissingConfig("MURMUR_USER_ID"))?;
        if !config.socket_url.starts_with("ws://") && !config.socket_url.starts_with("wss://") {
            return Err(ClientError::InvalidConfig(format!(
                "socket url must be ws:// or wss://, got {}",
                config.socket_url
            )));
        }

        let rest = Arc::new(RestClient::new(config.api_url.clone(), credential.clone()));
        Ok(Self::with_parts(
            Arc::new(WsConnector::new(config.socket_url.clone())),
            rest.clone(),
            rest,
            credential,
            me,
            config,
        ))
    }

    /// Build from explicit collaborators.
    pub fn with_parts(
        connector: Arc<dyn Connector>,
        history: Arc<dyn HistoryApi>,
        notification_api: Arc<dyn NotificationApi>,
        credential: Credential,
        me: UserId,
        config: &ClientConfig,
    ) -> Self {
        let session = Session::new(connector, config.session_config());
        let sync = Synchronizer::with_config(session.clone(), history, me, config.sync_config());
        Self {
            session,
            credential,
            presence: PresenceService::new(),
            notifications: NotificationService::new(),
            notification_api,
            sync,
        }
    }

    /// Attach the services and connect. Failing to load the notification
    /// list is logged, not fatal: live alerts still arrive.
    pub async fn start(&self) {
        self.presence.attach(&self.session);
        self.notifications.attach(&self.session);
        self.session.connect(self.credential.clone()).await;

        if let Err(e) = self.refresh_notifications().await {
            warn!(error = %e, "Could not load notifications");
        }
        info!(user = %self.sync.me().short(), "Realtime client started");
    }

    /// Close every open conversation, detach the services and tear the
    /// session down.
    pub async fn shutdown(&self) {
        self.sync.close_all().await;
        self.presence.detach(&self.session);
        self.notifications.detach(&self.session);
        self.session.disconnect().await;
        info!("Realtime client stopped");
    }

    pub async fn open_chat(&self, peer: UserId) -> ConversationSync {
        self.sync.open(ConversationKey::Peer(peer)).await
    }

    pub async fn open_group(&self, group: GroupId) -> ConversationSync {
        self.sync.open(ConversationKey::Group(group)).await
    }

    /// Reload the notification list from the server.
    pub async fn refresh_notifications(&self) -> Result<usize> {
        let remote = self.notification_api.fetch_notifications().await?;
        Ok(self.notifications.hydrate(&remote))
    }

    /// Mark one notification read locally, then on the server when it has a
    /// server-side counterpart.
    pub async fn mark_notification_read(&self, id: u64) -> Result<()> {
        let record = self
            .notifications
            .get(id)
            .ok_or(ClientError::UnknownNotification(id))?;
        self.notifications.mark_read(id);
        if let Some(server_id) = &record.server_id {
            self.notification_api.mark_notification_read(server_id).await?;
        }
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> Result<usize> {
        let flipped = self.notifications.mark_all_read();
        self.notification_api.mark_all_notifications_read().await?;
        Ok(flipped)
    }

    /// Tell the recipient's connection about a friend request created via REST.
    pub async fn announce_friend_request(&self, receiver: UserId) -> Result<()> {
        self.fire(ClientEmit::FriendRequestSent(FriendRequestSent { receiver_id: receiver }))
            .await
    }

    /// Tell the requester's connection their request was accepted.
    pub async fn announce_friend_accepted(&self, requester: UserId) -> Result<()> {
        self.fire(ClientEmit::FriendRequestAccepted(FriendRequestAcceptedEmit {
            requester_id: requester,
        }))
        .await
    }

    async fn fire(&self, emit: ClientEmit) -> Result<()> {
        self.session.emit(emit).await?;
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }
}
