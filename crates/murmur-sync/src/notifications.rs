//! In-app notification list.
//!
//! A bounded, newest-first queue of alerts fed by the session's alert
//! events. Order is insertion order, never the alerts' own timestamps.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use murmur_net::{HandlerId, Session};
use murmur_shared::constants::MAX_RETAINED_NOTIFICATIONS;
use murmur_shared::{EventKind, MonotonicIds, NotificationKind, ServerEvent, SessionEvent, UserId};

use crate::api::RemoteNotification;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    /// Client-generated, strictly increasing.
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub related_peer: Option<UserId>,
    /// Id of the server-side notification, when there is one.
    pub server_id: Option<String>,
    #[serde(skip)]
    dedup_key: Option<String>,
}

impl NotificationRecord {
    pub fn dedup_key(&self) -> Option<&str> {
        self.dedup_key.as_deref()
    }
}

/// A classified alert not yet in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub related_peer: Option<UserId>,
    pub server_id: Option<String>,
    pub dedup_key: Option<String>,
}

impl NotificationDraft {
    /// Map an alert event to a draft. Non-alert events yield `None`.
    pub fn classify(event: &ServerEvent) -> Option<Self> {
        let draft = match event {
            ServerEvent::FriendRequestReceived(req) => {
                let who = req.sender_name.as_deref().unwrap_or("Someone");
                Self {
                    kind: NotificationKind::FriendRequest,
                    title: "New friend request".into(),
                    body: format!("{who} sent you a friend request"),
                    related_peer: Some(req.sender_id.clone()),
                    server_id: req.request_id.clone(),
                    dedup_key: Some(format!("friend-request:{}", req.sender_id)),
                }
            }
            ServerEvent::FriendRequestAccepted(acc) => {
                let who = acc.accepter_name.as_deref().unwrap_or("Someone");
                Self {
                    kind: NotificationKind::FriendAccepted,
                    title: "Friend request accepted".into(),
                    body: format!("{who} accepted your friend request"),
                    related_peer: Some(acc.accepter_id.clone()),
                    server_id: None,
                    dedup_key: Some(format!("friend-accepted:{}", acc.accepter_id)),
                }
            }
            ServerEvent::NewMessageNotification(msg) => {
                let who = msg.sender_name.as_deref().unwrap_or("Someone");
                Self {
                    kind: NotificationKind::Message,
                    title: format!("New message from {who}"),
                    body: msg.preview.clone().unwrap_or_default(),
                    related_peer: Some(msg.sender_id.clone()),
                    server_id: None,
                    dedup_key: msg.message_id.as_ref().map(|id| format!("message:{id}")),
                }
            }
            ServerEvent::NotificationNew(n) => Self {
                kind: n.kind,
                title: n.title.clone(),
                body: n.body.clone(),
                related_peer: n.related_user_id.clone(),
                server_id: n.id.clone(),
                dedup_key: n.id.as_ref().map(|id| format!("notification:{id}")),
            },
            _ => return None,
        };
        Some(draft)
    }

    fn from_remote(remote: &RemoteNotification) -> Self {
        Self {
            kind: remote.kind,
            title: remote.title.clone(),
            body: remote.body.clone(),
            related_peer: remote.related_user_id.clone(),
            server_id: Some(remote.id.clone()),
            dedup_key: Some(format!("notification:{}", remote.id)),
        }
    }
}

/// Capped, de-duplicated, newest-first notification list.
pub struct NotificationStore {
    records: VecDeque<NotificationRecord>,
    keys: HashSet<String>,
    capacity: usize,
    ids: MonotonicIds,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RETAINED_NOTIFICATIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_ids(capacity, MonotonicIds::new())
    }

    /// Store drawing record ids from `ids`.
    pub fn with_ids(capacity: usize, ids: MonotonicIds) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            keys: HashSet::new(),
            capacity,
            ids,
        }
    }

    /// Insert at the head, evicting from the tail past capacity. Returns
    /// the new record's id, or `None` when the alert is already retained.
    pub fn push(&mut self, draft: NotificationDraft) -> Option<u64> {
        if let Some(key) = &draft.dedup_key {
            if self.keys.contains(key) {
                debug!(key = %key, "Dropping duplicate notification");
                return None;
            }
        }

        let record = self.record(draft, Utc::now(), false);
        let id = record.id;
        if let Some(key) = &record.dedup_key {
            self.keys.insert(key.clone());
        }
        self.records.push_front(record);

        while self.records.len() > self.capacity {
            if let Some(evicted) = self.records.pop_back() {
                self.forget_key(&evicted);
            }
        }
        Some(id)
    }

    /// Seed from the REST list (newest first). Entries rank below anything
    /// already retained, so they only fill remaining capacity.
    pub fn hydrate(&mut self, remote: &[RemoteNotification]) -> usize {
        let mut added = 0;
        for item in remote {
            if self.records.len() >= self.capacity {
                break;
            }
            let draft = NotificationDraft::from_remote(item);
            if draft.dedup_key.as_ref().is_some_and(|k| self.keys.contains(k)) {
                continue;
            }
            let record = self.record(draft, item.created_at, item.read);
            if let Some(key) = &record.dedup_key {
                self.keys.insert(key.clone());
            }
            self.records.push_back(record);
            added += 1;
        }
        added
    }

    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) if !record.read => {
                record.read = true;
                true
            }
            _ => false,
        }
    }

    /// Returns how many records flipped.
    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for record in self.records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn remove(&mut self, id: u64) -> Option<NotificationRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        let record = self.records.remove(pos)?;
        self.forget_key(&record);
        Some(record)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.keys.clear();
    }

    /// Always recounted from the records.
    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    pub fn records(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.iter()
    }

    pub fn head(&self) -> Option<&NotificationRecord> {
        self.records.front()
    }

    pub fn get(&self, id: u64) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, draft: NotificationDraft, created_at: DateTime<Utc>, read: bool) -> NotificationRecord {
        NotificationRecord {
            id: self.ids.next(),
            kind: draft.kind,
            title: draft.title,
            body: draft.body,
            created_at,
            read,
            related_peer: draft.related_peer,
            server_id: draft.server_id,
            dedup_key: draft.dedup_key,
        }
    }

    fn forget_key(&mut self, record: &NotificationRecord) {
        if let Some(key) = &record.dedup_key {
            self.keys.remove(key);
        }
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    store: Mutex<NotificationStore>,
    unread: watch::Sender<usize>,
    handlers: Mutex<Vec<HandlerId>>,
}

impl Inner {
    fn store(&self) -> MutexGuard<'_, NotificationStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the store and republish the unread count.
    fn mutate<R>(&self, f: impl FnOnce(&mut NotificationStore) -> R) -> R {
        let (result, unread) = {
            let mut store = self.store();
            let result = f(&mut store);
            (result, store.unread_count())
        };
        self.unread.send_if_modified(|current| {
            let changed = *current != unread;
            *current = unread;
            changed
        });
        result
    }
}

/// Owned notification service fed by a session's alert events.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<Inner>,
}

const ALERT_KINDS: [EventKind; 4] = [
    EventKind::FriendRequestReceived,
    EventKind::FriendRequestAccepted,
    EventKind::NewMessageNotification,
    EventKind::NotificationNew,
];

impl NotificationService {
    pub fn new() -> Self {
        Self::with_store(NotificationStore::new())
    }

    pub fn with_store(store: NotificationStore) -> Self {
        let (unread, _) = watch::channel(store.unread_count());
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                unread,
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn attach(&self, session: &Session) {
        let mut handlers = self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if !handlers.is_empty() {
            return;
        }
        for kind in ALERT_KINDS {
            let inner = Arc::downgrade(&self.inner);
            handlers.push(session.on(kind, move |event| {
                let SessionEvent::Server(event) = event else {
                    return;
                };
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if let Some(draft) = NotificationDraft::classify(event) {
                    inner.mutate(|store| store.push(draft));
                }
            }));
        }
    }

    pub fn detach(&self, session: &Session) {
        let ids: Vec<HandlerId> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in ids {
            session.off(id);
        }
    }

    pub fn push(&self, draft: NotificationDraft) -> Option<u64> {
        self.inner.mutate(|store| store.push(draft))
    }

    pub fn hydrate(&self, remote: &[RemoteNotification]) -> usize {
        self.inner.mutate(|store| store.hydrate(remote))
    }

    pub fn mark_read(&self, id: u64) -> bool {
        self.inner.mutate(|store| store.mark_read(id))
    }

    pub fn mark_all_read(&self) -> usize {
        self.inner.mutate(NotificationStore::mark_all_read)
    }

    pub fn remove(&self, id: u64) -> Option<NotificationRecord> {
        self.inner.mutate(|store| store.remove(id))
    }

    pub fn clear(&self) {
        self.inner.mutate(NotificationStore::clear)
    }

    pub fn get(&self, id: u64) -> Option<NotificationRecord> {
        self.inner.store().get(id).cloned()
    }

    /// Newest first.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.inner.store().records().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.store().unread_count()
    }

    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.inner.unread.subscribe()
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}
