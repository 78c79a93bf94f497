use std::sync::Arc;

use anyhow::Context;
use huddle_server::config::Config;
use huddle_server::{http_router, run_ws_listener, ChatService, Hub, ServerState, Store};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let store = Store::open(&config.database_path, config.db_pool_size)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    let hub = Arc::new(Hub::new(
        Arc::new(store.clone()),
        config.session.outbound_queue,
    ));
    let state = Arc::new(ServerState::new(
        ChatService::new(store, hub),
        config.session.clone(),
        config.access_token.clone(),
    ));

    let ws_listener = TcpListener::bind(&config.ws_addr)
        .await
        .with_context(|| format!("binding socket listener to {}", config.ws_addr))?;
    let http_listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding HTTP listener to {}", config.http_addr))?;

    info!("Huddle socket server listening on {}", config.ws_addr);
    info!("Huddle HTTP API listening on {}", config.http_addr);

    tokio::spawn(run_ws_listener(ws_listener, state.clone()));

    axum::serve(http_listener, http_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
