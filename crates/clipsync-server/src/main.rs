//! # clipsync-server
//!
//! Real-time clipboard relay between one user's own devices.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws`): each device says hello, joins its
//!   user's room, and every clip it sends is fanned out to the user's other
//!   connected devices
//! - **Room hub** with bounded per-device mailboxes; slow devices lose
//!   clips instead of stalling anyone else
//! - **REST API** (axum) for health checks, instance info and admin status

mod api;
mod auth;
mod config;
mod error;
mod hub;
mod rate_limit;
mod session;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::{Authenticator, StaticTokens, TokenIsUser};
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clipsync_server=debug")),
        )
        .init();

    info!("Starting clipsync relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Authentication
    // -----------------------------------------------------------------------
    let authenticator: Arc<dyn Authenticator> = match &config.auth_tokens {
        Some(tokens) => {
            info!(tokens = tokens.len(), "Using static token table");
            Arc::new(StaticTokens::new(tokens.clone()))
        }
        None => {
            warn!("AUTH_TOKENS not set: every non-empty token is accepted as its own user (dev only)");
            Arc::new(TokenIsUser)
        }
    };

    let http_addr = config.http_addr;
    let state = AppState::new(config, authenticator);

    // -----------------------------------------------------------------------
    // 4. Shutdown on Ctrl+C
    // -----------------------------------------------------------------------
    // Cancelling the token stops the listener and ends every open session
    // with a normal close.
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, shutting down");
        shutdown.cancel();
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    if let Err(e) = api::serve(state, http_addr).await {
        tracing::error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    Ok(())
}
