// Websocket subscribers
//
// Each connection registers a subscriber with the dispatcher and runs two
// tasks: a writer that drains the bounded queue into text frames under a
// per-write deadline, and a reader that enforces an idle deadline and
// discards any inbound payloads. Either task failing closes the connection
// and unregisters the subscriber.

use crate::broadcast::{Subscriber, SubscriptionType};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use super::server::AppState;

/// Per-frame write deadline
const WRITE_WAIT: Duration = Duration::from_secs(60);

/// A connection with no inbound traffic for this long is closed; pings
/// reset the deadline.
const IDLE_READ_WAIT: Duration = Duration::from_secs(65);

/// Largest inbound frame accepted from clients
const MAX_MESSAGE_SIZE: usize = 512;

pub async fn full_stream(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, addr, state, SubscriptionType::Full)
}

pub async fn lite_stream(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, addr, state, SubscriptionType::Lite)
}

pub async fn domains_stream(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade(ws, addr, state, SubscriptionType::Domain)
}

fn upgrade(
    ws: WebSocketUpgrade,
    addr: SocketAddr,
    state: Arc<AppState>,
    sub_type: SubscriptionType,
) -> Response {
    info!("Starting new websocket for '{}'", addr);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| client_session(socket, addr.to_string(), state, sub_type))
}

async fn client_session(
    socket: WebSocket,
    name: String,
    state: Arc<AppState>,
    sub_type: SubscriptionType,
) {
    let (subscriber, rx) = Subscriber::new(name.clone(), sub_type, state.ws_queue_capacity);
    state.dispatcher.register(subscriber);

    let (sender, receiver) = socket.split();
    let mut send_task = tokio::spawn(write_loop(sender, rx));
    let mut recv_task = tokio::spawn(read_loop(receiver));

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.dispatcher.unregister(&name);
    info!("Stopping websocket for '{}'", name);
}

/// Drain the subscriber queue into text frames. Any write error or missed
/// deadline ends the session.
async fn write_loop(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    while let Some(payload) = rx.recv().await {
        let Ok(text) = String::from_utf8(payload.to_vec()) else {
            continue;
        };

        match timeout(WRITE_WAIT, sender.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!("Client disconnected during write");
                return;
            }
            Err(_) => {
                debug!("Write deadline exceeded, disconnecting client");
                return;
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Enforce the idle read deadline, reset on every ping. Inbound payloads
/// are discarded; pongs are answered by the protocol layer.
async fn read_loop(mut receiver: futures::stream::SplitStream<WebSocket>) {
    let mut deadline = tokio::time::Instant::now() + IDLE_READ_WAIT;

    loop {
        match tokio::time::timeout_at(deadline, receiver.next()).await {
            Err(_) => {
                debug!("Idle read deadline exceeded, disconnecting client");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(_))) => {
                debug!("Websocket read error, disconnecting client");
                return;
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                debug!("Client sent close message");
                return;
            }
            Ok(Some(Ok(Message::Ping(_)))) => {
                deadline = tokio::time::Instant::now() + IDLE_READ_WAIT;
            }
            Ok(Some(Ok(_))) => {
                // Ignore any other message sent by clients.
            }
        }
    }
}
