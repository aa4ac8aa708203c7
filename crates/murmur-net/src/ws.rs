//! WebSocket connector.
//!
//! Each link gets two pump tasks: a writer draining the outbound channel
//! into the socket, and a reader forwarding text frames into the inbound
//! channel. Either side ending tears the other down.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use murmur_shared::Credential;

use crate::connector::{Connector, Link};
use crate::error::TransportError;

const LINK_CHANNEL_CAPACITY: usize = 256;

pub struct WsConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, credential: &Credential) -> Result<Link, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        let header = HeaderValue::from_str(&credential.bearer())
            .map_err(|e| TransportError::InvalidCredential(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout(self.handshake_timeout))??;

        info!(url = %self.url, "WebSocket connected");

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(close)) => {
                        debug!(close = ?close, "Server closed WebSocket");
                        break;
                    }
                    Ok(WsMessage::Binary(data)) => {
                        debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
            reader.abort();
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
