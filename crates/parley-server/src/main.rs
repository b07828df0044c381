//! # parley-server
//!
//! Chat backend for Parley.
//!
//! This binary provides:
//! - **REST API** (axum) for conversation lists, history, sending messages
//!   and marking them seen
//! - **WebSocket endpoint** that pushes `newMessage` to online recipients
//!   and `getOnlineUsers` snapshots to everyone
//! - **Presence registry** tracking which user owns which live socket
//! - **SQLite persistence** through `parley-store`

mod api;
mod auth;
mod config;
mod controller;
mod error;
mod presence;
mod realtime;
mod repository;
mod socket;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::config::{DatabaseLocation, ServerConfig};
use crate::controller::ConversationController;
use crate::presence::PresenceRegistry;
use crate::realtime::RealtimeChannel;
use crate::repository::MessageRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        database = ?config.database,
        store_timeout_ms = config.store_timeout.as_millis() as u64,
        legacy_user_id_handshake = config.legacy_user_id_handshake,
        auth_configured = config.auth_pubkey != [0u8; 32],
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database {
        DatabaseLocation::Default => Database::open_default()?,
        DatabaseLocation::Path(path) => Database::open_at(path)?,
        DatabaseLocation::InMemory => Database::open_in_memory()?,
    };
    let repo = MessageRepository::new(db, config.store_timeout);

    let channel = RealtimeChannel::new();
    let presence = PresenceRegistry::new(channel.clone());
    let controller = ConversationController::new(repo, presence.clone(), channel.clone());
    let verifier = TokenVerifier::new(config.auth_pubkey);

    let http_addr = config.http_addr;
    let app_state = AppState {
        controller,
        presence,
        channel,
        verifier: verifier.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic session cache cleanup (every 10 minutes)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            verifier.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
