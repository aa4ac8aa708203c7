//! Correlation of outbound requests with their replies.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use murmur_shared::{ServerEvent, ServerMessage, TempId};

use crate::error::EmitError;

/// Successful outcome of an emit.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// Fire-and-forget emit handed to the connection.
    Queued,
    /// The server stored the message and returned its authoritative record.
    Message(ServerMessage),
}

type Waiter = oneshot::Sender<Result<Ack, EmitError>>;

/// Emits waiting for a reply, keyed by request token.
#[derive(Default)]
pub struct PendingEmits {
    waiters: HashMap<TempId, Waiter>,
}

impl PendingEmits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        token: TempId,
    ) -> Result<oneshot::Receiver<Result<Ack, EmitError>>, EmitError> {
        if self.waiters.contains_key(&token) {
            return Err(EmitError::DuplicateToken(token));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(token, tx);
        Ok(rx)
    }

    /// Complete the waiter a reply event answers. Returns `false` when the
    /// event is not a reply or nobody is waiting for its token (late reply
    /// after a timeout, or a reply meant for another client).
    pub fn resolve(&mut self, event: &ServerEvent) -> bool {
        let (token, outcome) = match event {
            ServerEvent::MessageSent(ack) => (ack.temp_id, Ok(Ack::Message(ack.message.clone()))),
            ServerEvent::MessageError(err) => (err.temp_id, Err(EmitError::Rejected(err.error.clone()))),
            _ => return false,
        };

        match self.waiters.remove(&token) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
                true
            }
            None => {
                debug!(temp_id = %token, "Reply for an emit nobody is waiting on");
                false
            }
        }
    }

    pub fn reject(&mut self, token: TempId, error: EmitError) {
        if let Some(waiter) = self.waiters.remove(&token) {
            let _ = waiter.send(Err(error));
        }
    }

    pub fn cancel(&mut self, token: TempId) {
        self.waiters.remove(&token);
    }

    /// Fail every in-flight emit with `error`.
    pub fn reject_all(&mut self, error: EmitError) -> usize {
        let count = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
