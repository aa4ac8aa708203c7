//! Optimistic send, reconciliation and backfill for open conversations.
//!
//! [`Synchronizer::open`] hands out a [`ConversationSync`] per conversation.
//! Each handle subscribes to the chat events of its session, joins the
//! conversation's room and owns the [`Conversation`] log. Outbound messages
//! show up in the log immediately as pending and are updated in place once
//! the server acknowledges them, or flagged failed when it does not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use murmur_net::{Ack, HandlerId, Session};
use murmur_shared::constants::{DEFAULT_HISTORY_PAGE_SIZE, TYPING_GRACE_MILLIS, TYPING_QUIET_MILLIS};
use murmur_shared::protocol::{Recipient, RoomTarget, SendMessage};
use murmur_shared::{
    ClientEmit, ConversationKey, EventKind, MessageKind, MonotonicIds, ServerEvent, SessionEvent,
    TempId, UserId,
};

use crate::api::HistoryApi;
use crate::conversation::{Applied, BackfillOutcome, Conversation};
use crate::error::{Result, SyncError};
use crate::message::{Message, MessageRef};
use crate::typing::TypingDebounce;

/// Tuning for conversation handles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages per history page.
    pub page_size: u32,
    /// Silence after which a typing burst ends with `typing-stop`.
    pub typing_quiet: Duration,
    /// How long a peer's typing flag holds without a refresh.
    pub typing_grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_HISTORY_PAGE_SIZE,
            typing_quiet: Duration::from_millis(TYPING_QUIET_MILLIS),
            typing_grace: Duration::from_millis(TYPING_GRACE_MILLIS),
        }
    }
}

type Registry = Mutex<HashMap<ConversationKey, Weak<Shared>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory and registry of open conversation handles for one user.
pub struct Synchronizer {
    session: Session,
    history: Arc<dyn HistoryApi>,
    me: UserId,
    temp_ids: Arc<MonotonicIds>,
    config: SyncConfig,
    open: Arc<Registry>,
}

impl Synchronizer {
    pub fn new(session: Session, history: Arc<dyn HistoryApi>, me: UserId) -> Self {
        Self::with_config(session, history, me, SyncConfig::default())
    }

    pub fn with_config(
        session: Session,
        history: Arc<dyn HistoryApi>,
        me: UserId,
        config: SyncConfig,
    ) -> Self {
        Self {
            session,
            history,
            me,
            temp_ids: Arc::new(MonotonicIds::new()),
            config,
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the tempId source.
    pub fn with_temp_ids(mut self, ids: MonotonicIds) -> Self {
        self.temp_ids = Arc::new(ids);
        self
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Handle on `key`, joining its room. Opening an already open
    /// conversation returns the existing handle.
    pub async fn open(&self, key: ConversationKey) -> ConversationSync {
        let shared = {
            let mut open = lock(&self.open);
            if let Some(existing) = open.get(&key).and_then(Weak::upgrade) {
                if !existing.closed.load(Ordering::Acquire) {
                    return ConversationSync { shared: existing };
                }
            }

            let (changes, _) = watch::channel(0);
            let shared = Arc::new(Shared {
                key: key.clone(),
                me: self.me.clone(),
                session: self.session.clone(),
                history: self.history.clone(),
                temp_ids: self.temp_ids.clone(),
                config: self.config.clone(),
                state: Mutex::new(Conversation::new(key.clone(), self.me.clone())),
                changes,
                typing: TypingDebounce::new(),
                handlers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                registry: Arc::downgrade(&self.open),
            });
            open.insert(key.clone(), Arc::downgrade(&shared));
            shared
        };

        shared.subscribe();
        self.session.join_room(key.clone()).await;
        info!(conversation = %key, "Conversation opened");
        ConversationSync { shared }
    }

    /// Close every open conversation.
    pub async fn close_all(&self) {
        let open: Vec<Arc<Shared>> = lock(&self.open)
            .drain()
            .filter_map(|(_, shared)| shared.upgrade())
            .collect();
        for shared in open {
            ConversationSync { shared }.close().await;
        }
    }

    /// Keys of the conversations currently open.
    pub fn open_conversations(&self) -> Vec<ConversationKey> {
        let mut open = lock(&self.open);
        open.retain(|_, shared| shared.strong_count() > 0);
        open.keys().cloned().collect()
    }
}

struct Shared {
    key: ConversationKey,
    me: UserId,
    session: Session,
    history: Arc<dyn HistoryApi>,
    temp_ids: Arc<MonotonicIds>,
    config: SyncConfig,
    state: Mutex<Conversation>,
    /// Revision counter, bumped on every visible change.
    changes: watch::Sender<u64>,
    typing: TypingDebounce,
    handlers: Mutex<Vec<HandlerId>>,
    closed: AtomicBool,
    registry: Weak<Registry>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, Conversation> {
        lock(&self.state)
    }

    fn touch(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    fn subscribe(self: &Arc<Self>) {
        let mut handlers = lock(&self.handlers);
        for kind in [
            EventKind::NewMessage,
            EventKind::MessageSent,
            EventKind::MessageError,
            EventKind::MessagesRead,
            EventKind::UserTyping,
        ] {
            let weak = Arc::downgrade(self);
            handlers.push(self.session.on(kind, move |event| {
                if let (Some(shared), SessionEvent::Server(event)) = (weak.upgrade(), event) {
                    shared.on_event(event);
                }
            }));
        }
    }

    fn on_event(&self, event: &ServerEvent) {
        let changed = {
            let mut convo = self.state();
            match event {
                ServerEvent::NewMessage(new) => {
                    if !convo.owns(&new.message) {
                        return;
                    }
                    !matches!(convo.apply_inbound(&new.message), Applied::Duplicate(_))
                }
                // Also reached after a timeout, when the emit future has
                // already given up: the late ack still heals the entry.
                ServerEvent::MessageSent(ack) => matches!(
                    convo.reconcile(ack.temp_id, &ack.message),
                    Applied::Reconciled(_)
                ),
                ServerEvent::MessageError(err) => convo.fail(err.temp_id, err.error.clone()),
                ServerEvent::MessagesRead(read) => convo.apply_read_receipt(&read.reader_id) > 0,
                ServerEvent::UserTyping(typing) => {
                    let concerns_us = match &self.key {
                        ConversationKey::Peer(peer) => {
                            typing.group_id.is_none() && &typing.user_id == peer
                        }
                        ConversationKey::Group(group) => {
                            typing.group_id.as_ref() == Some(group) && typing.user_id != self.me
                        }
                    };
                    if !concerns_us {
                        return;
                    }
                    let until = Instant::now() + self.config.typing_grace;
                    convo.set_typing(typing.user_id.clone(), typing.is_typing, until);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.touch();
        }
    }

    /// Emit a pending entry and settle it with the reply.
    async fn deliver(&self, temp_id: TempId, body: String, kind: MessageKind) -> Result<TempId> {
        let emit = ClientEmit::SendMessage(SendMessage {
            to: Recipient::from(&self.key),
            content: body,
            kind,
            temp_id,
        });

        match self.session.emit(emit).await {
            Ok(Ack::Message(record)) => {
                let applied = self.state().reconcile(temp_id, &record);
                debug!(temp_id = %temp_id, id = %record.id, ?applied, "Message acknowledged");
                self.touch();
                Ok(temp_id)
            }
            Ok(Ack::Queued) => Ok(temp_id),
            Err(source) => {
                warn!(temp_id = %temp_id, conversation = %self.key, error = %source, "Send failed");
                if self.state().fail(temp_id, source.to_string()) {
                    self.touch();
                }
                Err(SyncError::SendFailed { temp_id, source })
            }
        }
    }
}

impl Drop for Shared {
    /// Last handle gone without `close()`: release what `open` set up.
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let handlers: Vec<HandlerId> = lock(&self.handlers).drain(..).collect();
        for id in handlers {
            self.session.off(id);
        }
        let typing = self.typing.cancel();

        // A newer handle for the same key may already own the room.
        let forgotten = match self.registry.upgrade() {
            Some(registry) => {
                let mut open = lock(&registry);
                let ours = open
                    .get(&self.key)
                    .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), self as *const Shared));
                if ours {
                    open.remove(&self.key);
                    self.session.forget_room(&self.key)
                } else {
                    false
                }
            }
            None => self.session.forget_room(&self.key),
        };

        if forgotten && self.session.is_connected() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let session = self.session.clone();
                let key = self.key.clone();
                runtime.spawn(async move {
                    if typing {
                        let _ = session.emit(ClientEmit::TypingStop(Recipient::from(&key))).await;
                    }
                    if let Err(e) = session.emit(ClientEmit::LeaveConversation(RoomTarget::from(&key))).await {
                        debug!(room = %key, error = %e, "Leave not sent");
                    }
                });
            }
        }
        debug!(conversation = %self.key, "Conversation dropped without close");
    }
}

/// Disarms on success; otherwise releases the backfill slot when dropped.
struct BackfillGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for BackfillGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state().abort_backfill();
        }
    }
}

/// Handle on one open conversation. Clones share the same state.
#[derive(Clone)]
pub struct ConversationSync {
    shared: Arc<Shared>,
}

impl ConversationSync {
    pub fn key(&self) -> &ConversationKey {
        &self.shared.key
    }

    /// Send a message. It is appended as pending right away; the returned
    /// future settles once the server acknowledges or rejects it.
    ///
    /// Fails with [`SyncError::NotConnected`] before touching the log when
    /// the session is down.
    pub async fn send(&self, body: impl Into<String>, kind: MessageKind) -> Result<TempId> {
        self.shared.ensure_open()?;
        if !self.shared.session.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = body.into();
        let temp_id = TempId(self.shared.temp_ids.next());
        self.shared
            .state()
            .insert_pending(temp_id, body.clone(), kind.clone(), Utc::now());
        self.shared.touch();

        self.shared.deliver(temp_id, body, kind).await
    }

    /// Resend a failed message from the same slot under a new tempId.
    pub async fn retry(&self, temp_id: TempId) -> Result<TempId> {
        self.shared.ensure_open()?;
        if !self.shared.session.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let fresh = TempId(self.shared.temp_ids.next());
        let resend = {
            let mut convo = self.shared.state();
            match convo.retry(temp_id, fresh) {
                Some(resend) => resend,
                None if convo.get(&MessageRef::Temp(temp_id)).is_some() => {
                    return Err(SyncError::NotRetryable(temp_id));
                }
                None => return Err(SyncError::UnknownMessage(temp_id)),
            }
        };
        self.shared.touch();
        debug!(old = %temp_id, new = %fresh, "Retrying message");

        let (body, kind) = resend;
        self.shared.deliver(fresh, body, kind).await
    }

    /// Signal typing activity. The first call of a burst emits
    /// `typing-start`; `typing-stop` follows once the burst has been quiet
    /// for the configured interval.
    pub async fn notify_typing(&self) -> Result<()> {
        self.shared.ensure_open()?;
        if !self.shared.session.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let session = self.shared.session.clone();
        let stop = ClientEmit::TypingStop(Recipient::from(&self.shared.key));
        let new_burst = self.shared.typing.restart(self.shared.config.typing_quiet, async move {
            if let Err(e) = session.emit(stop).await {
                debug!(error = %e, "typing-stop not sent");
            }
        });

        if new_burst {
            let start = ClientEmit::TypingStart(Recipient::from(&self.shared.key));
            if let Err(e) = self.shared.session.emit(start).await {
                debug!(error = %e, "typing-start not sent");
            }
        }
        Ok(())
    }

    /// Fetch the next older page and prepend it.
    pub async fn load_more(&self) -> Result<BackfillOutcome> {
        self.shared.ensure_open()?;
        let page = match self.shared.state().begin_backfill() {
            Ok(page) => page,
            Err(outcome) => return Ok(outcome),
        };
        let mut guard = BackfillGuard {
            shared: &self.shared,
            armed: true,
        };

        let result = self
            .shared
            .history
            .fetch_history(&self.shared.key, page, self.shared.config.page_size)
            .await?;

        guard.armed = false;
        let outcome = self.shared.state().finish_backfill(page, result);
        debug!(conversation = %self.shared.key, page, ?outcome, "History page loaded");
        if matches!(outcome, BackfillOutcome::Loaded { added, .. } if added > 0) {
            self.shared.touch();
        }
        Ok(outcome)
    }

    /// Mark the conversation read. Local unread state is cleared before the
    /// server is told; a failed REST call is returned but not rolled back.
    pub async fn mark_read(&self) -> Result<usize> {
        self.shared.ensure_open()?;
        let cleared = self.shared.state().mark_read_local();
        if cleared > 0 {
            self.shared.touch();
        }

        if self.shared.session.is_connected() {
            let emit = ClientEmit::MarkMessagesRead(RoomTarget::from(&self.shared.key));
            if let Err(e) = self.shared.session.emit(emit).await {
                debug!(error = %e, "mark-messages-read not sent");
            }
        }

        self.shared.history.mark_read(&self.shared.key).await?;
        Ok(cleared)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.state().messages().to_vec()
    }

    pub fn message(&self, reference: &MessageRef) -> Option<Message> {
        self.shared.state().get(reference).cloned()
    }

    pub fn unread(&self) -> usize {
        self.shared.state().unread()
    }

    pub fn has_more_history(&self) -> bool {
        self.shared.state().has_more_history()
    }

    /// Who is typing in this conversation right now, if anyone.
    pub fn typing_user(&self) -> Option<UserId> {
        self.shared.state().typing_user(Instant::now()).cloned()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.typing_user().is_some()
    }

    /// Revision counter bumped on every change to the log or flags.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop following the conversation: unregister handlers, end a typing
    /// burst in progress and leave the room. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let handlers: Vec<HandlerId> = lock(&self.shared.handlers).drain(..).collect();
        for id in handlers {
            self.shared.session.off(id);
        }

        if self.shared.typing.cancel() && self.shared.session.is_connected() {
            let stop = ClientEmit::TypingStop(Recipient::from(&self.shared.key));
            if let Err(e) = self.shared.session.emit(stop).await {
                debug!(error = %e, "typing-stop not sent on close");
            }
        }

        self.shared.session.leave_room(&self.shared.key).await;

        if let Some(registry) = self.shared.registry.upgrade() {
            let mut open = lock(&registry);
            let ours = open
                .get(&self.shared.key)
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&self.shared)));
            if ours {
                open.remove(&self.shared.key);
            }
        }
        info!(conversation = %self.shared.key, "Conversation closed");
    }
}
