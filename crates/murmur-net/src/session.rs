//! Session lifecycle with the tokio command/notification pattern.
//!
//! A driver task owns the live [`Link`]. Callers talk to it through a
//! command channel; it publishes its [`ConnectionState`] on a `watch`
//! channel and dispatches every inbound event on the [`EventBus`]. Because
//! only the driver dispatches, handlers run one at a time in arrival order.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_shared::constants::{
    COMMAND_CHANNEL_CAPACITY, EMIT_TIMEOUT_SECS, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BASE_DELAY_MILLIS, RECONNECT_MAX_DELAY_MILLIS,
};
use murmur_shared::protocol::RoomTarget;
use murmur_shared::{
    ClientEmit, ConnectionState, ConversationKey, Credential, DisconnectReason, EventKind,
    ServerEvent, SessionEvent, TempId,
};

use crate::bus::{EventBus, HandlerId};
use crate::connector::{Connector, Link};
use crate::error::{EmitError, TransportError};
use crate::pending::{Ack, PendingEmits};

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an acknowledged emit waits for its reply.
    pub emit_timeout: Duration,
    /// Delay before the first reconnect attempt; doubles per failure.
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before the session gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            emit_timeout: Duration::from_secs(EMIT_TIMEOUT_SECS),
            reconnect_base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MILLIS),
            reconnect_max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MILLIS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

#[derive(Debug)]
enum DriverCommand {
    Send {
        frame: String,
        name: &'static str,
        token: Option<TempId>,
    },
    Shutdown,
}

struct Driver {
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    credential: Option<Credential>,
    driver: Option<Driver>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    bus: EventBus,
    pending: Mutex<PendingEmits>,
    rooms: Mutex<Vec<ConversationKey>>,
    state_tx: watch::Sender<ConnectionState>,
    cmd_tx: Mutex<Option<mpsc::Sender<DriverCommand>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }
}

/// Handle to the single logical connection of one authenticated user.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    control: Arc<tokio::sync::Mutex<Control>>,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                bus: EventBus::new(),
                pending: Mutex::new(PendingEmits::new()),
                rooms: Mutex::new(Vec::new()),
                state_tx,
                cmd_tx: Mutex::new(None),
            }),
            control: Arc::new(tokio::sync::Mutex::new(Control::default())),
        }
    }

    /// Open the connection for `credential`.
    ///
    /// No-op while a connection (or connection attempt) for the same
    /// credential is live. A different credential tears the old connection
    /// down first.
    pub async fn connect(&self, credential: Credential) {
        let mut control = self.control.lock().await;

        let running = control
            .driver
            .as_ref()
            .is_some_and(|driver| !driver.handle.is_finished());
        if running && control.credential.as_ref() == Some(&credential) {
            debug!(state = ?self.shared.state(), "connect() ignored, session already live");
            return;
        }

        self.teardown(&mut control).await;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *lock(&self.shared.cmd_tx) = Some(cmd_tx);
        self.shared.set_state(ConnectionState::Connecting);

        let shared = self.shared.clone();
        let driver_credential = credential.clone();
        let handle = tokio::spawn(async move {
            run_driver(shared, driver_credential, cmd_rx).await;
        });

        control.credential = Some(credential);
        control.driver = Some(Driver { handle });
        info!("Session started");
    }

    /// Tear the connection down. Safe to call in any state.
    pub async fn disconnect(&self) {
        let mut control = self.control.lock().await;
        self.teardown(&mut control).await;
    }

    /// Replace the credential. `None` tears the session down; a new value
    /// rebuilds it.
    pub async fn set_credential(&self, credential: Option<Credential>) {
        match credential {
            Some(credential) => self.connect(credential).await,
            None => self.disconnect().await,
        }
    }

    async fn teardown(&self, control: &mut Control) {
        control.credential = None;
        let cmd_tx = lock(&self.shared.cmd_tx).take();

        let Some(driver) = control.driver.take() else {
            return;
        };

        if let Some(tx) = cmd_tx {
            let _ = tx.send(DriverCommand::Shutdown).await;
        }
        if let Err(e) = driver.handle.await {
            error!(error = %e, "Session driver task failed");
        }

        // The driver settles its own state; this covers a driver that died
        // without doing so.
        lock(&self.shared.pending).reject_all(EmitError::SessionClosed);
        self.shared.set_state(ConnectionState::Disconnected);
        info!("Session torn down");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(kind, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.bus.off(id)
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Send one event to the server.
    ///
    /// Emits carrying a request token resolve when the server replies to
    /// that token, and fail on a matching error reply, on timeout, or when
    /// the connection goes away first. Other emits resolve with
    /// [`Ack::Queued`] once handed to the connection.
    ///
    /// Fails with [`EmitError::NotConnected`] without touching the network
    /// unless the session is connected.
    pub fn emit(&self, emit: ClientEmit) -> impl Future<Output = Result<Ack, EmitError>> + Send {
        let prepared = self.prepare(&emit);
        let shared = self.shared.clone();

        async move {
            let (cmd_tx, frame, token) = prepared?;
            let waiter = match token {
                Some(token) => Some(lock(&shared.pending).register(token)?),
                None => None,
            };

            let command = DriverCommand::Send {
                frame,
                name: emit.name(),
                token,
            };
            if cmd_tx.send(command).await.is_err() {
                if let Some(token) = token {
                    lock(&shared.pending).cancel(token);
                }
                return Err(EmitError::SessionClosed);
            }

            let (Some(waiter), Some(token)) = (waiter, token) else {
                return Ok(Ack::Queued);
            };

            match tokio::time::timeout(shared.config.emit_timeout, waiter).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(EmitError::SessionClosed),
                Err(_) => {
                    lock(&shared.pending).cancel(token);
                    warn!(temp_id = %token, event = emit.name(), "Emit timed out");
                    Err(EmitError::Timeout(shared.config.emit_timeout))
                }
            }
        }
    }

    fn prepare(
        &self,
        emit: &ClientEmit,
    ) -> Result<(mpsc::Sender<DriverCommand>, String, Option<TempId>), EmitError> {
        if !self.is_connected() {
            return Err(EmitError::NotConnected);
        }
        let cmd_tx = lock(&self.shared.cmd_tx)
            .clone()
            .ok_or(EmitError::NotConnected)?;
        let frame = emit.to_frame()?;
        Ok((cmd_tx, frame, emit.request_token()))
    }

    /// Declare interest in a conversation's room. Rooms are re-joined on
    /// every (re)connect since server-side membership does not survive a
    /// disconnect.
    pub async fn join_room(&self, key: ConversationKey) {
        // The driver flips to Connected under this lock, so a room added
        // here is either in its join batch or announced by us.
        let announce = {
            let mut rooms = lock(&self.shared.rooms);
            if rooms.contains(&key) {
                false
            } else {
                rooms.push(key.clone());
                self.is_connected()
            }
        };

        if announce {
            let emit = ClientEmit::JoinConversation(RoomTarget::from(&key));
            if let Err(e) = self.emit(emit).await {
                debug!(room = %key, error = %e, "Join deferred until next connect");
            }
        }
    }

    pub async fn leave_room(&self, key: &ConversationKey) {
        let announce = self.forget_room(key) && self.is_connected();

        if announce {
            let emit = ClientEmit::LeaveConversation(RoomTarget::from(key));
            if let Err(e) = self.emit(emit).await {
                debug!(room = %key, error = %e, "Leave not sent");
            }
        }
    }

    /// Drop a room from the re-join list without telling the server.
    /// Returns whether the room was listed.
    pub fn forget_room(&self, key: &ConversationKey) -> bool {
        let mut rooms = lock(&self.shared.rooms);
        let before = rooms.len();
        rooms.retain(|k| k != key);
        rooms.len() != before
    }

    pub fn rooms(&self) -> Vec<ConversationKey> {
        lock(&self.shared.rooms).clone()
    }

    pub fn pending_emits(&self) -> usize {
        lock(&self.shared.pending).len()
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

enum ConnectionEnd {
    Shutdown,
    LinkLost,
}

async fn run_driver(
    shared: Arc<Shared>,
    credential: Credential,
    mut cmd_rx: mpsc::Receiver<DriverCommand>,
) {
    let mut failures: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);

        let attempt = match connect_or_shutdown(&shared, &credential, &mut cmd_rx).await {
            Some(attempt) => attempt,
            None => return finish(&shared, DisconnectReason::Teardown),
        };

        match attempt {
            Ok(link) => {
                failures = 0;
                match run_connection(&shared, link, &mut cmd_rx).await {
                    ConnectionEnd::Shutdown => return finish(&shared, DisconnectReason::Teardown),
                    ConnectionEnd::LinkLost => {
                        let rejected =
                            lock(&shared.pending).reject_all(EmitError::ConnectionLost);
                        warn!(rejected, "Connection lost, reconnecting");
                        shared.set_state(ConnectionState::Disconnected);
                        shared.bus.dispatch(&SessionEvent::Disconnected {
                            reason: DisconnectReason::LinkLost,
                        });
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    attempt = failures,
                    max = shared.config.max_reconnect_attempts,
                    error = %e,
                    "Connection attempt failed"
                );
                if failures >= shared.config.max_reconnect_attempts {
                    error!(attempts = failures, "Giving up on reconnecting");
                    return finish(&shared, DisconnectReason::GaveUp);
                }
            }
        }

        let delay = shared.config.backoff(failures);
        debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        if !sleep_or_shutdown(delay, &shared, &mut cmd_rx).await {
            return finish(&shared, DisconnectReason::Teardown);
        }
    }
}

fn finish(shared: &Shared, reason: DisconnectReason) {
    let rejected = lock(&shared.pending).reject_all(EmitError::SessionClosed);
    lock(&shared.cmd_tx).take();
    shared.set_state(ConnectionState::Disconnected);
    shared.bus.dispatch(&SessionEvent::Disconnected { reason });
    info!(reason = ?reason, rejected, "Session driver stopped");
}

/// Run one connect attempt while still answering commands. `None` means a
/// shutdown was requested.
async fn connect_or_shutdown(
    shared: &Shared,
    credential: &Credential,
    cmd_rx: &mut mpsc::Receiver<DriverCommand>,
) -> Option<Result<Link, TransportError>> {
    let attempt = shared.connector.connect(credential);
    tokio::pin!(attempt);

    loop {
        tokio::select! {
            result = &mut attempt => return Some(result),
            cmd = cmd_rx.recv() => {
                if !handle_offline_command(shared, cmd) {
                    return None;
                }
            }
        }
    }
}

/// Returns `false` if a shutdown arrived while waiting.
async fn sleep_or_shutdown(
    delay: Duration,
    shared: &Shared,
    cmd_rx: &mut mpsc::Receiver<DriverCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => {
                if !handle_offline_command(shared, cmd) {
                    return false;
                }
            }
        }
    }
}

/// Commands arriving with no live link: sends fail, shutdown stops.
fn handle_offline_command(shared: &Shared, cmd: Option<DriverCommand>) -> bool {
    match cmd {
        Some(DriverCommand::Send { name, token, .. }) => {
            debug!(event = name, "Dropping emit, no live connection");
            if let Some(token) = token {
                lock(&shared.pending).reject(token, EmitError::ConnectionLost);
            }
            true
        }
        Some(DriverCommand::Shutdown) | None => false,
    }
}

async fn run_connection(
    shared: &Shared,
    mut link: Link,
    cmd_rx: &mut mpsc::Receiver<DriverCommand>,
) -> ConnectionEnd {
    let connection_id = uuid::Uuid::new_v4().to_string();

    // Room membership does not survive a reconnect. Rooms added while the
    // joins are being written are picked up on the next pass; the state
    // only flips once a pass finds nothing new.
    let mut joined: Vec<ConversationKey> = Vec::new();
    loop {
        let batch: Vec<ConversationKey> = {
            let rooms = lock(&shared.rooms);
            let batch: Vec<_> = rooms.iter().filter(|r| !joined.contains(r)).cloned().collect();
            if batch.is_empty() {
                shared.set_state(ConnectionState::Connected);
                break;
            }
            batch
        };

        for room in batch {
            let emit = ClientEmit::JoinConversation(RoomTarget::from(&room));
            match emit.to_frame() {
                Ok(frame) => {
                    if link.outbound.send(frame).await.is_err() {
                        return ConnectionEnd::LinkLost;
                    }
                }
                Err(e) => error!(room = %room, error = %e, "Failed to encode room join"),
            }
            joined.push(room);
        }
    }

    info!(connection = %connection_id, rooms = joined.len(), "Connected");
    shared.bus.dispatch(&SessionEvent::Connected {
        connection_id: connection_id.clone(),
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(DriverCommand::Send { frame, name, token }) => {
                    if link.outbound.send(frame).await.is_err() {
                        error!(event = name, "Write failed, link is gone");
                        if let Some(token) = token {
                            lock(&shared.pending).reject(token, EmitError::ConnectionLost);
                        }
                        return ConnectionEnd::LinkLost;
                    }
                    debug!(event = name, temp_id = ?token, "Emitted");
                }
                Some(DriverCommand::Shutdown) | None => return ConnectionEnd::Shutdown,
            },
            frame = link.inbound.recv() => match frame {
                Some(frame) => handle_frame(shared, &frame),
                None => {
                    info!(connection = %connection_id, "Link closed by remote");
                    return ConnectionEnd::LinkLost;
                }
            },
        }
    }
}

fn handle_frame(shared: &Shared, frame: &str) {
    let event = match ServerEvent::from_frame(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, len = frame.len(), "Discarding malformed frame");
            return;
        }
    };

    debug!(event = event.kind().name(), "Inbound event");

    if event.reply_token().is_some() {
        lock(&shared.pending).resolve(&event);
    }
    shared.bus.dispatch(&SessionEvent::Server(event));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_shared::protocol::{
        MessageError, MessageSent, NewMessage, Recipient, SendMessage, UserRef, UserTyping,
    };
    use murmur_shared::{MessageId, MessageKind, ServerMessage, UserId};

    use crate::memory::{MemoryConnector, MemoryServer};

    fn session() -> (Session, MemoryConnector, MemoryServer) {
        let (connector, server) = MemoryConnector::pair();
        let session = Session::new(Arc::new(connector.clone()), SessionConfig::default());
        (session, connector, server)
    }

    fn cred() -> Credential {
        Credential::new("token-a")
    }

    async fn wait_for(session: &Session, state: ConnectionState) {
        let mut rx = session.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    fn send(temp: u64) -> ClientEmit {
        ClientEmit::SendMessage(SendMessage {
            to: Recipient::from(&ConversationKey::Peer(UserId::from("bob"))),
            content: "hello".into(),
            kind: MessageKind::Text,
            temp_id: TempId(temp),
        })
    }

    fn record(id: &str, temp: Option<u64>) -> ServerMessage {
        ServerMessage {
            id: MessageId::from(id),
            sender: UserRef::Id(UserId::from("me")),
            receiver: Some(UserRef::Id(UserId::from("bob"))),
            group: None,
            content: "hello".into(),
            kind: MessageKind::Text,
            created_date: Utc::now(),
            read: false,
            temp_id: temp.map(TempId),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected_and_notifies() {
        let (session, _connector, mut server) = session();
        let connected = Arc::new(Mutex::new(0));
        let c = connected.clone();
        session.on(EventKind::Connected, move |_| *c.lock().unwrap() += 1);

        session.connect(cred()).await;
        let peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        assert_eq!(peer.credential, cred());
        assert_eq!(*connected.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_idempotent() {
        let (session, connector, mut server) = session();
        session
            .join_room(ConversationKey::Peer(UserId::from("bob")))
            .await;

        session.connect(cred()).await;
        wait_for(&session, ConnectionState::Connected).await;
        session.connect(cred()).await;

        let mut peer = server.accept().await.unwrap();
        assert!(matches!(peer.recv().await, Some(ClientEmit::JoinConversation(_))));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(server.try_accept().is_none());
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_credential_rebuilds_connection() {
        let (session, connector, mut server) = session();
        session.connect(cred()).await;
        let _first = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        session.connect(Credential::new("token-b")).await;
        let second = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        assert_eq!(second.credential, Credential::new("token-b"));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_before_connect_is_rejected_without_io() {
        let (session, connector, _server) = session();
        let result = session.emit(send(1)).await;
        assert_eq!(result, Err(EmitError::NotConnected));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_resolves_on_its_own_reply() {
        let (session, _connector, mut server) = session();
        session.connect(cred()).await;
        let mut peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let first = tokio::spawn(session.emit(send(1)));
        let second = tokio::spawn(session.emit(send(2)));
        peer.recv().await.unwrap();
        peer.recv().await.unwrap();

        // Unrelated traffic must not settle either emit.
        peer.send(&ServerEvent::NewMessage(NewMessage {
            message: record("other", None),
        }))
        .await;
        let stored = record("m2", Some(2));
        peer.send(&ServerEvent::MessageSent(MessageSent {
            temp_id: TempId(2),
            message: stored.clone(),
        }))
        .await;
        peer.send(&ServerEvent::MessageError(MessageError {
            temp_id: TempId(1),
            error: "blocked".into(),
        }))
        .await;

        assert_eq!(second.await.unwrap(), Ok(Ack::Message(stored)));
        assert_eq!(
            first.await.unwrap(),
            Err(EmitError::Rejected("blocked".into()))
        );
        assert_eq!(session.pending_emits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_times_out() {
        let (session, _connector, mut server) = session();
        session.connect(cred()).await;
        let _peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let result = session.emit(send(1)).await;
        assert_eq!(
            result,
            Err(EmitError::Timeout(Duration::from_secs(EMIT_TIMEOUT_SECS)))
        );
        assert_eq!(session.pending_emits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_emit_is_queued() {
        let (session, _connector, mut server) = session();
        session.connect(cred()).await;
        let mut peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let emit = ClientEmit::TypingStart(Recipient::from(&ConversationKey::Peer(
            UserId::from("bob"),
        )));
        assert_eq!(session.emit(emit.clone()).await, Ok(Ack::Queued));
        assert_eq!(peer.recv().await, Some(emit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_rejects_in_flight_emits() {
        let (session, _connector, mut server) = session();
        session.connect(cred()).await;
        let mut peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let pending = tokio::spawn(session.emit(send(1)));
        peer.recv().await.unwrap();
        session.disconnect().await;

        assert_eq!(pending.await.unwrap(), Err(EmitError::SessionClosed));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        // Safe to repeat.
        session.disconnect().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rejoins_rooms_and_fails_in_flight() {
        let (session, _connector, mut server) = session();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let r = reasons.clone();
        session.on(EventKind::Disconnected, move |event| {
            if let SessionEvent::Disconnected { reason } = event {
                r.lock().unwrap().push(*reason);
            }
        });

        session.connect(cred()).await;
        let mut first = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        session
            .join_room(ConversationKey::Peer(UserId::from("bob")))
            .await;
        assert!(matches!(first.recv().await, Some(ClientEmit::JoinConversation(_))));

        let pending = tokio::spawn(session.emit(send(1)));
        first.recv().await.unwrap();
        first.close();

        assert_eq!(pending.await.unwrap(), Err(EmitError::ConnectionLost));

        let mut second = server.accept().await.unwrap();
        assert_eq!(
            second.recv().await,
            Some(ClientEmit::JoinConversation(RoomTarget {
                friend_id: Some(UserId::from("bob")),
                group_id: None,
            }))
        );
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(*reasons.lock().unwrap(), vec![DisconnectReason::LinkLost]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_joined_during_rejoin_is_announced() {
        let (session, _connector, mut server) = session();
        // More rooms than the link buffers, so the driver stalls mid-rejoin.
        for n in 0..70 {
            session
                .join_room(ConversationKey::Peer(UserId::new(format!("p{n}"))))
                .await;
        }

        session.connect(cred()).await;
        let mut peer = server.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        let late = ConversationKey::Peer(UserId::from("late"));
        session.join_room(late.clone()).await;

        let mut joins = Vec::new();
        while joins.len() < 71 {
            match peer.recv().await {
                Some(ClientEmit::JoinConversation(target)) => joins.push(target),
                other => panic!("unexpected emit: {other:?}"),
            }
        }
        wait_for(&session, ConnectionState::Connected).await;

        assert!(joins.contains(&RoomTarget::from(&late)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_room_is_silent() {
        let (session, _connector, mut server) = session();
        let bob = ConversationKey::Peer(UserId::from("bob"));
        session.connect(cred()).await;
        let mut peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        session.join_room(bob.clone()).await;
        assert!(matches!(peer.recv().await, Some(ClientEmit::JoinConversation(_))));

        assert!(session.forget_room(&bob));
        assert!(!session.forget_room(&bob));
        assert!(session.rooms().is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_gives_up() {
        let (connector, server) = MemoryConnector::pair();
        let config = SessionConfig {
            max_reconnect_attempts: 3,
            ..SessionConfig::default()
        };
        let session = Session::new(Arc::new(connector.clone()), config);
        connector.refuse_next(10);

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let r = reasons.clone();
        session.on(EventKind::Disconnected, move |event| {
            if let SessionEvent::Disconnected { reason } = event {
                r.lock().unwrap().push(*reason);
            }
        });

        session.connect(cred()).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(connector.attempts(), 3);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(*reasons.lock().unwrap(), vec![DisconnectReason::GaveUp]);

        // A fresh connect starts over once the server accepts again.
        connector.refuse_next(0);
        session.connect(cred()).await;
        wait_for(&session, ConnectionState::Connected).await;
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_refused_attempts() {
        let (session, connector, mut server) = session();
        connector.refuse_next(2);

        session.connect(cred()).await;
        let _peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_discarded() {
        let (session, _connector, mut server) = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        session.on(EventKind::UserTyping, move |event| {
            s.lock().unwrap().push(event.clone());
        });

        session.connect(cred()).await;
        let peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        peer.send_raw("{not json").await;
        peer.send_raw(r#"{"event":"user-typing","data":{"isTyping":true}}"#)
            .await;
        peer.send(&ServerEvent::UserTyping(UserTyping {
            user_id: UserId::from("bob"),
            is_typing: true,
            group_id: None,
        }))
        .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_credential_none_tears_down() {
        let (session, _connector, mut server) = session();
        session.set_credential(Some(cred())).await;
        let _peer = server.accept().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        session.set_credential(None).await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.emit(send(1)).await, Err(EmitError::NotConnected));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_millis(1_000));
        assert_eq!(config.backoff(3), Duration::from_millis(4_000));
        assert_eq!(config.backoff(10), Duration::from_millis(10_000));
        assert_eq!(config.backoff(40), Duration::from_millis(10_000));
    }
}
