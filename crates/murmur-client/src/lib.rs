//! # murmur-client
//!
//! Consumer bindings for the real-time layer: environment configuration,
//! the HTTP implementation of the REST collaborators and the
//! [`RealtimeClient`] facade the UI talks to.

pub mod client;
pub mod config;
pub mod error;
pub mod rest;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::RealtimeClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use rest::RestClient;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,murmur_net=debug,murmur_sync=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
