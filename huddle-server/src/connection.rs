use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use huddle_proto::input::{SendMessageInput, MAX_USER_ID_LENGTH};
use huddle_proto::{ClientCommand, ErrorCode, ServerEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_tungstenite::{tungstenite::Message as WsMessage, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::hub::ConnectionHandle;
use crate::state::ServerState;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of one socket connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Atomic state cell; every transition is a compare-and-swap so only one
/// caller can win it.
#[derive(Debug)]
pub struct SessionLifecycle(AtomicU8);

impl SessionLifecycle {
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Connecting as u8))
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Connecting -> Open
    pub fn open(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// Connecting | Open -> Closing. True only for the caller that gets to
    /// run cleanup.
    pub fn begin_close(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match SessionState::from_u8(current) {
                    SessionState::Connecting | SessionState::Open => {
                        Some(SessionState::Closing as u8)
                    }
                    SessionState::Closing | SessionState::Closed => None,
                }
            })
            .is_ok()
    }

    /// Closing -> Closed
    pub fn finish_close(&self) -> bool {
        self.transition(SessionState::Closing, SessionState::Closed)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle a single WebSocket connection
pub async fn handle_connection<S>(ws_stream: WebSocketStream<S>, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let lifecycle = SessionLifecycle::new();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Wait for Connect message to authenticate
    let user_id = match wait_for_connect(&mut ws_receiver, &state).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            warn!("Connection rejected: {}", reason);
            let rejection = ServerEvent::AuthResponse {
                success: false,
                message: reason,
            };
            if let Ok(json) = serde_json::to_string(&rejection) {
                let _ = ws_sender.send(WsMessage::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            lifecycle.begin_close();
            lifecycle.finish_close();
            return;
        }
    };

    let hub = state.hub().clone();
    let (handle, mut rx) = hub.register(&user_id);
    lifecycle.open();
    info!(connection_id = handle.id(), %user_id, "User connected");

    let auth_response = ServerEvent::AuthResponse {
        success: true,
        message: "Connected to server".to_string(),
    };
    match serde_json::to_string(&auth_response) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(WsMessage::Text(json.into())).await {
                error!("Failed to send auth response to {}: {}", user_id, e);
            }
        }
        Err(e) => error!("Failed to serialize auth response for {}: {}", user_id, e),
    }

    // Delivery task: drains the hub queue and keeps the peer alive with pings
    // `interval` panics on zero
    let heartbeat_interval = state.session.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_sender.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if ws_sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let heartbeat_timeout = state.session.heartbeat_timeout;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_seen = Instant::now();
                        if let Some(reply) = handle_command(&text, &handle, &state).await {
                            hub.send_direct(&handle, &reply);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("User {} sent close frame", user_id);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pong, ping or binary: still proof of life
                        last_seen = Instant::now();
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for user {}: {}", user_id, e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended for user {}", user_id);
                        break;
                    }
                }
            }
            _ = &mut send_task => {
                info!("Send task finished for user {} (likely connection lost)", user_id);
                break;
            }
            _ = handle.kicked() => {
                warn!(connection_id = handle.id(), "Closing lagging connection for {}", user_id);
                break;
            }
            _ = tokio::time::sleep_until(last_seen + heartbeat_timeout) => {
                warn!("Heartbeat timeout for user {}", user_id);
                break;
            }
        }
    }

    if lifecycle.begin_close() {
        send_task.abort();
        hub.deregister(handle.id());
        lifecycle.finish_close();
    }
    info!(connection_id = handle.id(), "User disconnected: {}", user_id);
}

/// Wait for the Connect message from a new connection
async fn wait_for_connect<S>(
    receiver: &mut SplitStream<WebSocketStream<S>>,
    state: &ServerState,
) -> Result<String, String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = async {
        while let Some(result) = receiver.next().await {
            let text = match result {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match serde_json::from_str::<ClientCommand>(&text) {
                Ok(ClientCommand::Connect { user_id, token }) => {
                    return authenticate(&user_id, token.as_deref(), state.access_token.as_deref());
                }
                Ok(_) => debug!("Ignoring frame before connect"),
                Err(e) => warn!("Failed to parse Connect message: {}", e),
            }
        }
        Err("connection closed before authentication".to_string())
    };

    match tokio::time::timeout(state.session.auth_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err("authentication timeout".to_string()),
    }
}

/// Checks the claimed identity and, when configured, the shared token.
fn authenticate(user_id: &str, token: Option<&str>, expected: Option<&str>) -> Result<String, String> {
    let user_id = user_id.trim();
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LENGTH {
        return Err("invalid user id".to_string());
    }
    if let Some(expected) = expected {
        match token {
            Some(token) if token == expected => {}
            Some(_) => return Err(format!("invalid token for {}", user_id)),
            None => return Err(format!("no token provided for {}", user_id)),
        }
    }
    Ok(user_id.to_string())
}

/// Handle one control frame from an open connection. Returns the direct reply,
/// if any.
pub async fn handle_command(
    text: &str,
    handle: &Arc<ConnectionHandle>,
    state: &ServerState,
) -> Option<ServerEvent> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Failed to parse message from {}: {}", handle.user_id(), e);
            return Some(ServerEvent::error(
                ErrorCode::BadRequest,
                format!("unreadable frame: {}", e),
            ));
        }
    };

    match command {
        ClientCommand::Connect { .. } => Some(ServerEvent::error(
            ErrorCode::BadRequest,
            "already authenticated",
        )),
        ClientCommand::Subscribe { conversation_id } => {
            match state.hub().subscribe(handle.id(), &conversation_id).await {
                Ok(()) => Some(ServerEvent::Subscribed { conversation_id }),
                Err(e) => {
                    debug!(connection_id = handle.id(), %conversation_id, "Subscribe refused: {}", e);
                    Some(error_event(&e, Some(conversation_id), None))
                }
            }
        }
        ClientCommand::Unsubscribe { conversation_id } => {
            state.hub().unsubscribe(handle.id(), &conversation_id);
            Some(ServerEvent::Unsubscribed { conversation_id })
        }
        ClientCommand::Ping => Some(ServerEvent::Pong),
        ClientCommand::SendMessage {
            conversation_id,
            content,
            media_url,
            media_type,
            replied_to_id,
            client_ref,
        } => {
            let input = SendMessageInput {
                conversation_id: conversation_id.clone(),
                content,
                media_url,
                media_type,
                replied_to_id,
            };
            let service = state.service.clone();
            let handle = handle.clone();
            // Detached: the write completes even if this socket goes away
            tokio::spawn(async move {
                if let Err(e) = service.post_message(handle.user_id(), input).await {
                    debug!(connection_id = handle.id(), "Socket write rejected: {}", e);
                    service
                        .hub()
                        .send_direct(&handle, &error_event(&e, Some(conversation_id), client_ref));
                }
            });
            None
        }
    }
}

fn error_event(err: &ChatError, conversation_id: Option<String>, client_ref: Option<String>) -> ServerEvent {
    ServerEvent::Error {
        code: err.code(),
        message: err.public_message(),
        conversation_id,
        client_ref,
    }
}
