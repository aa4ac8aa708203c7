//! Presence tracking.
//!
//! Maintains the set of peers the server reports as online. The set is
//! rebuilt from the bulk snapshot the server sends right after every
//! connect and then mutated one peer at a time by status deltas.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use murmur_net::{HandlerId, Session};
use murmur_shared::{EventKind, PresenceStatus, ServerEvent, SessionEvent, UserId};

/// The set of online peers.
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    online: HashSet<UserId>,
    /// No snapshot received since the last (re)connect.
    awaiting_snapshot: bool,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            online: HashSet::new(),
            awaiting_snapshot: true,
        }
    }

    /// Replace the whole set. Always authoritative, whatever deltas came
    /// before it.
    pub fn apply_snapshot(&mut self, users: impl IntoIterator<Item = UserId>) -> bool {
        let next: HashSet<UserId> = users.into_iter().collect();
        let changed = next != self.online || self.awaiting_snapshot;
        debug!(online = next.len(), "Applying presence snapshot");
        self.online = next;
        self.awaiting_snapshot = false;
        changed
    }

    /// Mutate one membership. Ignored until the first snapshot arrives,
    /// since that snapshot supersedes it anyway.
    ///
    /// Returns whether the set changed.
    pub fn apply_delta(&mut self, user: UserId, status: PresenceStatus) -> bool {
        if self.awaiting_snapshot {
            debug!(user = %user.short(), ?status, "Ignoring presence delta before snapshot");
            return false;
        }
        match status {
            PresenceStatus::Online => self.online.insert(user),
            PresenceStatus::Offline => self.online.remove(&user),
        }
    }

    /// Forget everyone and wait for the next snapshot.
    pub fn reset(&mut self) -> bool {
        let changed = !self.online.is_empty();
        self.online.clear();
        self.awaiting_snapshot = true;
        changed
    }

    /// Unknown peers are offline.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub fn online_peers(&self) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self.online.iter().cloned().collect();
        peers.sort();
        peers
    }

    /// Split `ids` into `(online, offline)`, preserving input order.
    pub fn partition<'a>(&self, ids: impl IntoIterator<Item = &'a UserId>) -> (Vec<UserId>, Vec<UserId>) {
        ids.into_iter()
            .cloned()
            .partition(|id| self.online.contains(id))
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    registry: Mutex<PresenceRegistry>,
    revision: watch::Sender<u64>,
    handlers: Mutex<Vec<HandlerId>>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, PresenceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &SessionEvent) {
        let changed = {
            let mut registry = self.registry();
            match event {
                SessionEvent::Server(ServerEvent::OnlineUsers(snapshot)) => {
                    registry.apply_snapshot(snapshot.users.iter().cloned())
                }
                SessionEvent::Server(ServerEvent::UserStatusChange(change)) => {
                    registry.apply_delta(change.user_id.clone(), change.status)
                }
                SessionEvent::Disconnected { .. } => registry.reset(),
                _ => false,
            }
        };
        if changed {
            self.revision.send_modify(|rev| *rev += 1);
        }
    }
}

/// Owned presence service fed by a session's event handlers.
///
/// Cloning yields another handle on the same registry.
#[derive(Clone)]
pub struct PresenceService {
    inner: Arc<Inner>,
}

impl PresenceService {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(PresenceRegistry::new()),
                revision,
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to the session's presence events. A second attach without
    /// a detach in between is a no-op.
    pub fn attach(&self, session: &Session) {
        let mut handlers = self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if !handlers.is_empty() {
            return;
        }
        for kind in [
            EventKind::OnlineUsers,
            EventKind::UserStatusChange,
            EventKind::Disconnected,
        ] {
            let inner = Arc::downgrade(&self.inner);
            handlers.push(session.on(kind, move |event| {
                if let Some(inner) = inner.upgrade() {
                    inner.apply(event);
                }
            }));
        }
    }

    /// Unsubscribe and clear the registry.
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
        if self.inner.registry().reset() {
            self.inner.revision.send_modify(|rev| *rev += 1);
        }
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.inner.registry().is_online(user)
    }

    pub fn online_count(&self) -> usize {
        self.inner.registry().online_count()
    }

    pub fn online_peers(&self) -> Vec<UserId> {
        self.inner.registry().online_peers()
    }

    pub fn partition(&self, ids: &[UserId]) -> (Vec<UserId>, Vec<UserId>) {
        self.inner.registry().partition(ids)
    }

    /// Bumped on every membership change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl Default for PresenceService {
    fn default() -> Self {
        Self::new()
    }
}
