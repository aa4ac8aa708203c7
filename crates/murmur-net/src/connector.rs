use async_trait::async_trait;
use tokio::sync::mpsc;

use murmur_shared::Credential;

use crate::error::TransportError;

/// One established duplex connection, as a pair of text-frame channels.
///
/// The link is considered lost when `inbound` yields `None` or a send on
/// `outbound` fails. Dropping the link closes the connection.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens links to the server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, credential: &Credential) -> Result<Link, TransportError>;
}
