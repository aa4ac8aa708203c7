//! In-process loopback connector.
//!
//! [`MemoryConnector::pair`] returns a connector and the [`MemoryServer`]
//! that accepts its links. Each accepted [`MemoryPeer`] is the far end of
//! one connection and speaks the same frames a real backend would.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use murmur_shared::{ClientEmit, Credential, ServerEvent};

use crate::connector::{Connector, Link};
use crate::error::TransportError;

const LINK_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse_next: Arc<AtomicU32>,
    attempts: Arc<AtomicUsize>,
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one loopback connection.
pub struct MemoryPeer {
    pub credential: Credential,
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                accept_tx,
                refuse_next: Arc::new(AtomicU32::new(0)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Number of `connect` calls made so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, credential: &Credential) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Refused("refused by test server".into()));
        }

        let (to_client, inbound) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (outbound, from_client) = mpsc::channel(LINK_CHANNEL_CAPACITY);

        let peer = MemoryPeer {
            credential: credential.clone(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Refused("memory server is gone".into()))?;

        Ok(Link { outbound, inbound })
    }
}

impl MemoryServer {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take a connection that has already been made, without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl MemoryPeer {
    /// Push an event to the client. Returns `false` once the client is gone.
    pub async fn send(&self, event: &ServerEvent) -> bool {
        match event.to_frame() {
            Ok(frame) => self.send_raw(frame).await,
            Err(_) => false,
        }
    }

    pub async fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).await.is_ok()
    }

    /// Next emit from the client; `None` once the client dropped the link.
    /// Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<ClientEmit> {
        while let Some(frame) = self.from_client.recv().await {
            if let Ok(emit) = ClientEmit::from_frame(&frame) {
                return Some(emit);
            }
        }
        None
    }

    /// Next emit if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientEmit> {
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(emit) = ClientEmit::from_frame(&frame) {
                return Some(emit);
            }
        }
        None
    }

    /// Drop the connection from the server side.
    pub fn close(self) {}
}
