use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_proto::{ClientCommand, ServerEvent};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::view::ViewEvent;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Internal message type for the write channel
enum WriteMessage {
    Data(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    pub user_id: String,
    pub token: Option<String>,
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            token: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Reconnecting WebSocket client.
///
/// Remembers which conversations it is subscribed to and subscribes again
/// after every reconnect. Inbound frames and connection changes come out as
/// [`ViewEvent`]s; after a reconnect the application should reload history,
/// since nothing published while it was away is replayed.
pub struct SocketClient {
    write_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>>,
    subscriptions: Arc<StdMutex<BTreeSet<String>>>,
    connected: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SocketClient {
    /// Start the connection loop in the background.
    pub fn connect(config: SocketConfig) -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let client = Self {
            write_tx: Arc::new(StdMutex::new(None)),
            subscriptions: Arc::new(StdMutex::new(BTreeSet::new())),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        };

        let connection = Connection {
            config,
            write_tx: client.write_tx.clone(),
            subscriptions: client.subscriptions.clone(),
            connected: client.connected.clone(),
            events_tx,
            shutdown_rx: client.shutdown_tx.subscribe(),
        };
        tokio::spawn(connection.run());

        (client, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Subscribe now if connected, and again after every reconnect.
    pub fn subscribe(&self, conversation_id: &str) -> Result<(), ClientError> {
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.insert(conversation_id.to_string());
        self.send_if_connected(&ClientCommand::Subscribe {
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn unsubscribe(&self, conversation_id: &str) -> Result<(), ClientError> {
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.remove(conversation_id);
        self.send_if_connected(&ClientCommand::Unsubscribe {
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Send a frame to the server; fails when not connected.
    pub fn send(&self, command: &ClientCommand) -> Result<(), ClientError> {
        let json = serde_json::to_string(command)?;
        let guard = lock(&self.write_tx);
        match guard.as_ref() {
            Some(tx) => tx
                .send(WriteMessage::Data(json))
                .map_err(|_| ClientError::Transport("connection closed".to_string())),
            None => Err(ClientError::Transport("not connected to server".to_string())),
        }
    }

    /// Gracefully disconnect and stop reconnecting
    pub fn disconnect(&self) {
        info!("Initiating graceful disconnect");
        let _ = self.shutdown_tx.send(());
        if let Some(tx) = lock(&self.write_tx).as_ref() {
            let _ = tx.send(WriteMessage::Close);
        }
    }

    /// Callers hold the `subscriptions` lock, which the connection loop also
    /// takes before publishing a new writer.
    fn send_if_connected(&self, command: &ClientCommand) -> Result<(), ClientError> {
        if lock(&self.write_tx).is_none() {
            // Replayed from `subscriptions` once connected
            return Ok(());
        }
        self.send(command)
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State owned by the background connection loop
struct Connection {
    config: SocketConfig,
    write_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>>,
    subscriptions: Arc<StdMutex<BTreeSet<String>>>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// Why a single connection attempt ended
enum Outcome {
    Reconnect,
    Stop,
}

impl Connection {
    async fn run(mut self) {
        let mut has_connected = false;
        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shutdown signal received, stopping reconnection");
                break;
            }

            info!(url = %self.config.url, "Connecting to Huddle server");
            match self.session(has_connected).await {
                Ok(Outcome::Stop) => break,
                Ok(Outcome::Reconnect) => has_connected = true,
                Err(e) => warn!(error = %e, url = %self.config.url, "Connection attempt failed"),
            }

            if self.events_tx.is_closed() {
                break;
            }
            debug!(delay = ?self.config.reconnect_delay, "Reconnecting");
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
        *lock(&self.write_tx) = None;
        self.connected.store(false, Ordering::Release);
    }

    /// One connection from handshake to close. `Ok` means the session was
    /// established at least once.
    async fn session(&mut self, reconnecting: bool) -> Result<Outcome, ClientError> {
        let (ws_stream, _) = connect_async(self.config.url.as_str()).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let connect = ClientCommand::Connect {
            user_id: self.config.user_id.clone(),
            token: self.config.token.clone(),
        };
        ws_write
            .send(Message::Text(serde_json::to_string(&connect)?.into()))
            .await?;

        // Wait for auth response
        loop {
            match ws_read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text)? {
                    ServerEvent::AuthResponse { success: true, message } => {
                        info!("Authenticated with server: {}", message);
                        break;
                    }
                    ServerEvent::AuthResponse { success: false, message } => {
                        error!("Authentication failed: {}", message);
                        return Err(ClientError::Unauthorized(message));
                    }
                    _ => warn!("Unexpected response during auth"),
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ClientError::Transport(
                        "connection closed during handshake".to_string(),
                    ))
                }
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<WriteMessage>();
        let remembered: Vec<String> = {
            // Hold both locks so a concurrent subscribe lands exactly once
            let subscriptions = lock(&self.subscriptions);
            *lock(&self.write_tx) = Some(tx.clone());
            subscriptions.iter().cloned().collect()
        };
        for conversation_id in remembered {
            let frame = serde_json::to_string(&ClientCommand::Subscribe { conversation_id })?;
            let _ = tx.send(WriteMessage::Data(frame));
        }
        self.connected.store(true, Ordering::Release);
        if reconnecting {
            let _ = self.events_tx.send(ViewEvent::Reconnected);
        }

        let mut outcome = Outcome::Reconnect;
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection gracefully");
                    if let Err(e) = ws_write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send close frame");
                    }
                    outcome = Outcome::Stop;
                    break;
                }
                Some(msg) = rx.recv() => {
                    match msg {
                        WriteMessage::Data(data) => {
                            if ws_write.send(Message::Text(data.into())).await.is_err() {
                                error!("Failed to send message to server");
                                break;
                            }
                        }
                        WriteMessage::Close => {
                            info!("Close requested, sending close frame");
                            if let Err(e) = ws_write.send(Message::Close(None)).await {
                                warn!(error = %e, "Failed to send close frame");
                            }
                            outcome = Outcome::Stop;
                            break;
                        }
                    }
                }
                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if self.events_tx.send(ViewEvent::Socket(event)).is_err() {
                                    outcome = Outcome::Stop;
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Unreadable frame from server"),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Server closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        // Cleanup
        *lock(&self.write_tx) = None;
        self.connected.store(false, Ordering::Release);
        let _ = self.events_tx.send(ViewEvent::Disconnected);
        info!("Disconnected from Huddle server");
        Ok(outcome)
    }
}
