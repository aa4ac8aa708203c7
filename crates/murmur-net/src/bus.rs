//! Typed event bus.
//!
//! Handlers are keyed by [`EventKind`] and invoked synchronously, in
//! registration order, by whoever calls [`EventBus::dispatch`] (the session
//! driver). The handler list is snapshotted before invocation so a handler
//! may register or unregister handlers without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use murmur_shared::{EventKind, SessionEvent};

pub type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event = kind.name(), handler = id.0, "Handler registered");
        id
    }

    /// Unregister a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for list in inner.handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(hid, _)| *hid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler registered for the event's kind. A panicking handler
    /// is logged and skipped; the remaining handlers still run.
    pub fn dispatch(&self, event: &SessionEvent) {
        let kind = event.kind();
        let handlers: Vec<(HandlerId, Handler)> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            match inner.handlers.get(&kind) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = kind.name(), handler = id.0, "Event handler panicked");
            }
        }
    }
}
