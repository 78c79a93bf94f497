//! Huddle server library
//!
//! Conversation store, broadcast hub, socket sessions and the HTTP write
//! surface. Exposed as a library so integration tests can boot real listeners.

pub mod api;
pub mod config;
mod connection;
pub mod error;
pub mod hub;
pub mod service;
mod state;
pub mod store;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};

pub use api::router as http_router;
pub use connection::{handle_command, handle_connection, SessionLifecycle, SessionState};
pub use error::{ChatError, ChatResult};
pub use hub::{Hub, MembershipCheck};
pub use service::ChatService;
pub use state::ServerState;
pub use store::Store;

/// Accept socket connections until the listener fails for good.
pub async fn run_ws_listener(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, state).await;
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
