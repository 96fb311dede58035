//! WebSocket upgrade handler and the two flows that drive each connection.
//!
//! The inbound flow reads frames and hands them to the [`EventRouter`]; the
//! outbound flow drains the session queue and owns every socket write,
//! including keepalive pings. Whichever flow ends first takes the other down
//! with it, and the session is unregistered exactly once afterwards.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::error::{EventError, TransportFault};
use crate::AppState;

use super::handler::EventRouter;
use super::session::Session;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Liveness and write timing for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    /// Most queued frames joined into a single text message.
    pub max_batch: usize,
}

impl From<&Config> for Keepalive {
    fn from(config: &Config) -> Self {
        Self {
            ping_period: config.ping_period,
            pong_wait: config.pong_wait,
            write_wait: config.write_wait,
            max_batch: config.outbound_capacity,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .read_buffer_size(state.config.read_buffer_size)
        .write_buffer_size(state.config.write_buffer_size)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (session, outbound) = Session::new(state.config.outbound_capacity);
    let keepalive = Keepalive::from(state.config.as_ref());
    let (ws_tx, ws_rx) = socket.split();

    tracing::info!(session_id = %session.id(), "connection opened");

    let mut write_task = tokio::spawn(write_pump(session.clone(), ws_tx, outbound, keepalive));
    let mut read_task = tokio::spawn(read_pump(
        session.clone(),
        ws_rx,
        state.router.clone(),
        keepalive,
    ));

    let fault = tokio::select! {
        result = &mut read_task => {
            // Closing the queue lets the writer flush and send a close frame.
            state.registry.unregister(&session).await;
            if time::timeout(keepalive.write_wait, &mut write_task).await.is_err() {
                write_task.abort();
            }
            result.ok()
        }
        result = &mut write_task => {
            read_task.abort();
            state.registry.unregister(&session).await;
            result.ok().and_then(Result::err)
        }
    };

    tracing::info!(
        session_id = %session.id(),
        user_id = ?session.user_id(),
        connected_ms = session.connected_for().as_millis() as u64,
        reason = %fault.map_or_else(|| "session closed".to_string(), |f| f.to_string()),
        "connection ended"
    );
}

/// Inbound flow. Returns why the connection stopped being readable.
async fn read_pump(
    session: Arc<Session>,
    mut ws_rx: WsStream,
    router: EventRouter,
    keepalive: Keepalive,
) -> TransportFault {
    let deadline = time::sleep(keepalive.pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            // A frame that is already waiting wins over an expired deadline.
            biased;

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => router.handle_frame(&session, text.as_str()).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => router.handle_frame(&session, text).await,
                    Err(_) => session.reply_error(&EventError::InvalidEnvelope),
                },
                Some(Ok(Message::Pong(_))) => {
                    deadline.as_mut().reset(Instant::now() + keepalive.pong_wait);
                }
                // Pings are answered by the socket itself.
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => return TransportFault::PeerClosed,
                Some(Err(e)) => {
                    tracing::debug!(?e, session_id = %session.id(), "ws read error");
                    return TransportFault::Read(e);
                }
            },

            _ = &mut deadline => {}
        }

        // Only a pong moves the deadline, so a peer streaming frames without
        // answering pings still times out.
        if deadline.is_elapsed() {
            tracing::debug!(session_id = %session.id(), "liveness timeout");
            return TransportFault::LivenessTimeout(keepalive.pong_wait);
        }
    }
}

/// Outbound flow. Ends cleanly once the session queue is closed.
async fn write_pump(
    session: Arc<Session>,
    mut ws_tx: WsSink,
    mut outbound: mpsc::Receiver<String>,
    keepalive: Keepalive,
) -> Result<(), TransportFault> {
    let mut ping = time::interval_at(Instant::now() + keepalive.ping_period, keepalive.ping_period);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = send_close(&mut ws_tx, keepalive.write_wait).await;
                    return Ok(());
                };
                let batch = coalesce(frame, &mut outbound, keepalive.max_batch);
                send(&mut ws_tx, Message::Text(batch.into()), keepalive.write_wait).await?;
            }

            _ = ping.tick() => {
                tracing::trace!(session_id = %session.id(), "ping");
                send(&mut ws_tx, Message::Ping(Bytes::new()), keepalive.write_wait).await?;
            }
        }
    }
}

/// Join `first` with whatever else is already queued, one frame per line.
fn coalesce(first: String, outbound: &mut mpsc::Receiver<String>, max_batch: usize) -> String {
    let mut batch = first;
    for _ in 1..max_batch {
        match outbound.try_recv() {
            Ok(next) => {
                batch.push('\n');
                batch.push_str(&next);
            }
            Err(_) => break,
        }
    }
    batch
}

async fn send(ws_tx: &mut WsSink, msg: Message, wait: Duration) -> Result<(), TransportFault> {
    match time::timeout(wait, ws_tx.send(msg)).await {
        Ok(result) => result.map_err(TransportFault::Write),
        Err(_) => Err(TransportFault::WriteTimeout(wait)),
    }
}

async fn send_close(ws_tx: &mut WsSink, wait: Duration) -> Result<(), TransportFault> {
    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }));
    send(ws_tx, close, wait).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesce_joins_queued_frames_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        for frame in ["b", "c", "d"] {
            tx.send(frame.to_string()).await.unwrap();
        }

        assert_eq!(coalesce("a".to_string(), &mut rx, 8), "a\nb\nc\nd");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn coalesce_stops_at_batch_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        for frame in ["b", "c", "d"] {
            tx.send(frame.to_string()).await.unwrap();
        }

        assert_eq!(coalesce("a".to_string(), &mut rx, 2), "a\nb");
        assert_eq!(rx.try_recv().unwrap(), "c");
    }

    #[test]
    fn keepalive_follows_config() {
        let config = Config::from_vars(|name| match name {
            "INTERNAL_API_KEY" => Some("k".to_string()),
            "PING_PERIOD" => Some("5".to_string()),
            "PONG_WAIT" => Some("7".to_string()),
            _ => None,
        })
        .unwrap();

        let keepalive = Keepalive::from(&config);
        assert_eq!(keepalive.ping_period, Duration::from_secs(5));
        assert_eq!(keepalive.pong_wait, Duration::from_secs(7));
        assert_eq!(keepalive.write_wait, Duration::from_secs(10));
        assert_eq!(keepalive.max_batch, 256);
    }
}
