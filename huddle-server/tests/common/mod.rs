//! Shared harness: boots the socket and HTTP listeners on random ports
//! against a throwaway database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_server::config::SessionConfig;
use huddle_server::{http_router, run_ws_listener, ChatService, Hub, ServerState, Store};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub ws_url: String,
    pub http_url: String,
    pub state: Arc<ServerState>,
    pub http: reqwest::Client,
    tasks: Vec<JoinHandle<()>>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub async fn start_test_server() -> TestServer {
    start_test_server_with(SessionConfig::default(), None).await
}

pub async fn start_test_server_with(session: SessionConfig, token: Option<&str>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huddle.db");
    let store = Store::open(path.to_str().unwrap(), 4).unwrap();
    let hub = Arc::new(Hub::new(Arc::new(store.clone()), session.outbound_queue));
    let state = Arc::new(ServerState::new(
        ChatService::new(store, hub),
        session,
        token.map(String::from),
    ));

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_port = ws_listener.local_addr().unwrap().port();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_port = http_listener.local_addr().unwrap().port();

    let ws_task = tokio::spawn(run_ws_listener(ws_listener, state.clone()));
    let router = http_router(state.clone());
    let http_task = tokio::spawn(async move {
        let _ = axum::serve(http_listener, router).await;
    });

    TestServer {
        ws_url: format!("ws://127.0.0.1:{}", ws_port),
        http_url: format!("http://127.0.0.1:{}", http_port),
        state,
        http: reqwest::Client::new(),
        tasks: vec![ws_task, http_task],
        _dir: dir,
    }
}

impl TestServer {
    pub async fn post(&self, user_id: &str, path: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.http_url, path))
            .header("x-user-id", user_id)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{}", self.http_url, path))
            .header("x-user-id", user_id)
            .send()
            .await
            .unwrap()
    }

    pub async fn delete(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.http
            .delete(format!("{}{}", self.http_url, path))
            .header("x-user-id", user_id)
            .send()
            .await
            .unwrap()
    }

    /// Create a conversation and return its id
    pub async fn conversation(&self, creator: &str, others: &[&str]) -> String {
        let response = self
            .post(creator, "/conversations", json!({ "participantIds": others }))
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// Post a text message and return the stored message
    pub async fn send_text(&self, sender: &str, conversation_id: &str, content: &str) -> Value {
        let response = self
            .post(
                sender,
                "/messages",
                json!({ "conversationId": conversation_id, "content": content }),
            )
            .await;
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }
}

/// Open a socket and complete the connect handshake, returning the response
pub async fn connect_raw(url: &str, user_id: &str, token: Option<&str>) -> (Socket, Value) {
    let (mut socket, _) = connect_async(url).await.expect("Failed to connect");
    let mut connect = json!({ "type": "connect", "userId": user_id });
    if let Some(token) = token {
        connect["token"] = json!(token);
    }
    socket
        .send(Message::Text(connect.to_string().into()))
        .await
        .unwrap();
    let response = next_frame(&mut socket).await.expect("no auth response");
    (socket, response)
}

pub async fn connect_client(server: &TestServer, user_id: &str) -> Socket {
    let (socket, response) = connect_raw(&server.ws_url, user_id, None).await;
    assert_eq!(response["type"], "auth_response");
    assert_eq!(response["success"], true);
    socket
}

pub async fn send_frame(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

pub async fn subscribe(socket: &mut Socket, conversation_id: &str) -> Value {
    send_frame(
        socket,
        json!({ "type": "subscribe", "conversationId": conversation_id }),
    )
    .await;
    next_frame(socket).await.expect("no subscribe reply")
}

/// Next JSON frame, skipping control frames. `None` once the stream ends or
/// nothing arrives within five seconds.
pub async fn next_frame(socket: &mut Socket) -> Option<Value> {
    next_frame_within(socket, Duration::from_secs(5)).await
}

pub async fn next_frame_within(socket: &mut Socket, wait: Duration) -> Option<Value> {
    let read = async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    };
    timeout(wait, read).await.ok().flatten()
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
