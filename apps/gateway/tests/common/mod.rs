#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_gateway::backend::{BackendError, ChatBackend};
use chat_gateway::config::Config;
use chat_gateway::gateway::events::SendMessagePayload;
use chat_gateway::models::{ChatMember, User};
use chat_gateway::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a test waits for any single frame or state change.
pub const WAIT: Duration = Duration::from_secs(5);

/// In-memory backend. Tokens: `ann-token` (5), `bob-token` (6),
/// `sev-token` (7). Chat 1 holds Ann and Bob.
pub struct FakeBackend {
    users: HashMap<String, User>,
    chats: HashMap<i64, Vec<ChatMember>>,
    next_message_id: Mutex<i64>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let users = [("ann-token", 5, "Ann"), ("bob-token", 6, "Bob"), ("sev-token", 7, "Sev")]
            .into_iter()
            .map(|(token, id, name)| {
                let user = User {
                    id,
                    name: name.to_string(),
                    phone: "+1".to_string(),
                    active: true,
                };
                (token.to_string(), user)
            })
            .collect();
        let chats = HashMap::from([(
            1,
            vec![
                ChatMember { user_id: 5, name: "Ann".to_string() },
                ChatMember { user_id: 6, name: "Bob".to_string() },
            ],
        )]);

        Self {
            users,
            chats,
            next_message_id: Mutex::new(100),
        }
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn validate_credential(&self, token: &str) -> Result<User, BackendError> {
        self.users.get(token).cloned().ok_or(BackendError::InvalidToken)
    }

    async fn list_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, BackendError> {
        self.chats.get(&chat_id).cloned().ok_or(BackendError::Status(404))
    }

    async fn forward_message(
        &self,
        _token: &str,
        message: &SendMessagePayload,
    ) -> Result<Value, BackendError> {
        let mut next = self.next_message_id.lock();
        *next += 1;
        Ok(json!({ "id": *next, "chat_id": message.chat_id, "text": message.text }))
    }

    async fn forward_reaction(&self, _: &str, _: i64, _: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn forward_read_receipt(&self, _: &str, _: &[i64]) -> Result<(), BackendError> {
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        backend_url: "http://127.0.0.1:9".to_string(),
        internal_api_key: "test-key".to_string(),
        max_message_size: 64 * 1024,
        read_buffer_size: 1024,
        write_buffer_size: 1024,
        ping_period: Duration::from_secs(54),
        pong_wait: Duration::from_secs(60),
        write_wait: Duration::from_secs(10),
        backend_timeout: Duration::from_secs(10),
        outbound_capacity: 256,
    }
}

pub fn test_state(config: Config) -> AppState {
    AppState::new(config, Arc::new(FakeBackend::new()))
}

/// Start an actual TCP server in the background.
pub async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let state = test_state(config);
    let app = chat_gateway::app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// WebSocket client that splits coalesced text messages back into envelopes.
pub struct TestClient {
    pub ws: Ws,
    pending: VecDeque<Value>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{addr}/ws");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data });
        self.send_raw(&frame.to_string()).await;
    }

    /// Authenticate and return the reply envelope.
    pub async fn auth(&mut self, token: &str) -> Value {
        self.send("auth", json!({ "token": token })).await;
        self.next_event().await
    }

    pub async fn next_event(&mut self) -> Value {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let msg = time::timeout(WAIT, self.ws.next())
                .await
                .expect("timeout waiting for event")
                .expect("stream ended")
                .expect("ws error");
            match msg {
                Message::Text(text) => {
                    for line in text.as_str().split('\n') {
                        self.pending
                            .push_back(serde_json::from_str(line).expect("frame is json"));
                    }
                }
                Message::Close(frame) => panic!("connection closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Assert nothing but control frames arrives during `window`.
    pub async fn assert_silent(&mut self, window: Duration) {
        assert!(self.pending.is_empty(), "unexpected frames: {:?}", self.pending);
        let deadline = Instant::now() + window;
        loop {
            match time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
                Ok(Some(Ok(_))) => continue,
                Ok(other) => panic!("connection ended: {other:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
