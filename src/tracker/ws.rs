use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::AppState;
use super::models::{Event, Issue};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// No pong for this long after a ping means the peer is gone.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Live feed messages, serialized as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    IssueCreated { issue: Issue },
    IssueUpdated { issue: Issue },
    IssueDeleted { issue_id: i64 },
    EventAppended { event: Event },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx).await;
}

/// Ping bookkeeping for one connection.
#[derive(Debug)]
struct Keepalive {
    last_pong: Instant,
    awaiting_pong: bool,
}

impl Keepalive {
    fn new(now: Instant) -> Self {
        Self {
            last_pong: now,
            awaiting_pong: false,
        }
    }

    fn peer_gone(&self, now: Instant) -> bool {
        self.awaiting_pong && now.duration_since(self.last_pong) > PONG_TIMEOUT
    }

    fn ping_sent(&mut self) {
        self.awaiting_pong = true;
    }

    fn pong_received(&mut self, now: Instant) {
        self.last_pong = now;
        self.awaiting_pong = false;
    }
}

/// Forward issue and event broadcasts to one client until either side
/// goes away. Client frames other than pong and close are ignored; the
/// feed is read-only.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut feed: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;
    let mut keepalive = Keepalive::new(Instant::now());

    loop {
        let keep_going = tokio::select! {
            _ = ping_interval.tick() => {
                if keepalive.peer_gone(Instant::now()) {
                    tracing::debug!("WebSocket peer stopped answering pings");
                    false
                } else {
                    keepalive.ping_sent();
                    sender.send(Message::Ping(Default::default())).await.is_ok()
                }
            }

            update = feed.recv() => match update {
                Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
                // A slow client misses updates; it can refetch the trail.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagged behind the feed");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => false,
            },

            frame = receiver.next() => match frame {
                Some(Ok(Message::Pong(_))) => {
                    keepalive.pong_received(Instant::now());
                    true
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
        };
        if !keep_going {
            break;
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Serialize and publish to every connected client. Having no clients is
/// not an error.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WsMessage");
        }
    }
}
