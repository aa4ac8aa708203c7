//! `murmur`: headless real-time client.
//!
//! Connects with the credential from the environment and logs presence,
//! connection and notification changes until interrupted.

use tracing::info;

use murmur_client::{init_tracing, ClientConfig, RealtimeClient};
use murmur_shared::constants::APP_NAME;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        socket = %config.socket_url,
        api = %config.api_url,
        user = ?config.user_id,
        "Loaded configuration"
    );

    let client = RealtimeClient::from_config(&config)?;
    client.start().await;

    let mut state = client.session().watch_state();
    let mut presence = client.presence().changes();
    let mut unread = client.notifications().watch_unread();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = ?current, "Connection state");
            }
            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = presence.borrow_and_update();
                info!(
                    online = client.presence().online_count(),
                    peers = ?client.presence().online_peers(),
                    "Presence updated"
                );
            }
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                if let Some(latest) = client.notifications().records().first() {
                    info!(unread = count, latest = %latest.title, "Notifications updated");
                } else {
                    info!(unread = count, "Notifications updated");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
