use super::AppState;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::session::StateChange;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use metrics::counter;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state for a single client
pub struct Connection {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub connected_at: u64,
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Configuration for WebSocket connections
pub struct WsConfig {
    /// Close the connection after this long without client traffic.
    /// Pong replies to our pings count as traffic.
    pub idle_timeout: Duration,
    /// Interval between server pings
    pub ping_interval: Duration,
    /// Outgoing message buffer
    pub channel_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            ping_interval: Duration::from_secs(30),
            channel_capacity: 32,
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection attachment to one session
struct Attachment {
    session_id: String,
    forward_task: JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.forward_task.abort();
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let config = WsConfig::default();
    let connection_id = Uuid::new_v4();
    info!("New WebSocket connection: {}", connection_id);

    // Create channel for outgoing messages
    let (tx, rx) = mpsc::channel::<ServerMessage>(config.channel_capacity);

    // Register connection
    {
        let mut connections = state.connections.write().await;
        connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                session_id: None,
                connected_at: crate::session::state::now_millis(),
            },
        );
    }

    // Split socket into sender and receiver
    let (ws_sender, mut ws_receiver) = socket.split();

    // Spawn task to forward outgoing messages to WebSocket
    let send_task = tokio::spawn(pump_outgoing(ws_sender, rx, config.ping_interval));

    let mut attachment: Option<Attachment> = None;

    // Handle incoming messages
    loop {
        let result = match tokio::time::timeout(config.idle_timeout, ws_receiver.next()).await {
            Ok(Some(result)) => result,
            Ok(None) => break,
            Err(_) => {
                debug!("Connection {} timed out", connection_id);
                break;
            }
        };

        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    counter!(
                        "chatsession_ws_messages_total",
                        "type" => client_msg.message_type()
                    )
                    .increment(1);
                    handle_client_message(client_msg, connection_id, &state, &tx, &mut attachment)
                        .await;
                }
                Err(e) => {
                    warn!("Failed to parse client message: {}", e);
                    let _ = tx
                        .send(ServerMessage::SessionError {
                            code: ErrorCode::InvalidMessage,
                            message: format!("Invalid message format: {}", e),
                        })
                        .await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary message from {}", connection_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pings are answered by axum; pongs only reset the idle timer
            }
            Ok(Message::Close(_)) => {
                info!("Client {} requested close", connection_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Cleanup
    drop(attachment);
    send_task.abort();

    {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
    }

    info!("WebSocket connection closed: {}", connection_id);
}

/// Write outgoing messages to the socket, pinging the client every
/// `ping_interval` so passive subscribers are not closed as idle.
/// Returns the sink once the channel or the socket closes.
async fn pump_outgoing<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<ServerMessage>,
    ping_interval: Duration,
) -> S
where
    S: Sink<Message> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outgoing = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
                None => break,
            },
            _ = keepalive.tick() => Message::Ping(Vec::new()),
        };

        if sink.send(outgoing).await.is_err() {
            break;
        }
    }

    sink
}

/// Handle a parsed client message
async fn handle_client_message(
    msg: ClientMessage,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    attachment: &mut Option<Attachment>,
) {
    match msg {
        ClientMessage::Ping { seq } => {
            let _ = tx.send(ServerMessage::Pong).await;
            let _ = tx.send(ServerMessage::ack(seq)).await;
        }
        ClientMessage::CreateSession { seq } => {
            let session_id = match state.session_manager.create_session().await {
                Ok((session_id, _)) => session_id,
                Err(e) => {
                    send_session_error(tx, seq, &e).await;
                    return;
                }
            };

            match state.session_manager.subscribe(&session_id).await {
                Ok((snapshot, receiver)) => {
                    info!(
                        "Connection {} created session {}",
                        connection_id, session_id
                    );
                    attach(
                        state,
                        connection_id,
                        tx,
                        attachment,
                        &session_id,
                        snapshot.rev,
                        receiver,
                    )
                    .await;
                    let _ = tx
                        .send(ServerMessage::SessionCreated {
                            session_id,
                            snapshot,
                        })
                        .await;
                    let _ = tx.send(ServerMessage::ack(seq)).await;
                }
                Err(e) => send_session_error(tx, seq, &e).await,
            }
        }
        ClientMessage::AttachSession { session_id, seq } => {
            match state.session_manager.subscribe(&session_id).await {
                Ok((snapshot, receiver)) => {
                    info!(
                        "Connection {} attached to session {}",
                        connection_id, session_id
                    );
                    attach(
                        state,
                        connection_id,
                        tx,
                        attachment,
                        &session_id,
                        snapshot.rev,
                        receiver,
                    )
                    .await;
                    let _ = tx
                        .send(ServerMessage::SessionAttached {
                            session_id,
                            snapshot,
                        })
                        .await;
                    let _ = tx.send(ServerMessage::ack(seq)).await;
                }
                Err(e) => send_session_error(tx, seq, &e).await,
            }
        }
        ClientMessage::Dispatch { transition, seq } => {
            let Some(session_id) = attachment.as_ref().map(|a| a.session_id.clone()) else {
                send_not_attached(tx, seq).await;
                return;
            };

            // The resulting state_changed arrives through the subscription
            match state.session_manager.dispatch(&session_id, transition).await {
                Ok(change) => {
                    debug!(
                        "Connection {} dispatched to session {} (rev {})",
                        connection_id, session_id, change.rev
                    );
                    let _ = tx.send(ServerMessage::ack(seq)).await;
                }
                Err(e) => send_session_error(tx, seq, &e).await,
            }
        }
        ClientMessage::GetState { seq } => {
            let Some(session_id) = attachment.as_ref().map(|a| a.session_id.clone()) else {
                send_not_attached(tx, seq).await;
                return;
            };

            match state.session_manager.get_session(&session_id).await {
                Ok(snapshot) => {
                    let _ = tx.send(ServerMessage::State { snapshot }).await;
                    let _ = tx.send(ServerMessage::ack(seq)).await;
                }
                Err(e) => send_session_error(tx, seq, &e).await,
            }
        }
    }
}

/// Replace the connection's attachment and start forwarding changes
async fn attach(
    state: &AppState,
    connection_id: Uuid,
    tx: &mpsc::Sender<ServerMessage>,
    attachment: &mut Option<Attachment>,
    session_id: &str,
    start_rev: u64,
    receiver: broadcast::Receiver<StateChange>,
) {
    let forward_task = tokio::spawn(forward_changes(
        state.clone(),
        session_id.to_string(),
        start_rev,
        receiver,
        tx.clone(),
    ));
    // Dropping the previous attachment stops its forwarder
    *attachment = Some(Attachment {
        session_id: session_id.to_string(),
        forward_task,
    });

    let mut connections = state.connections.write().await;
    if let Some(conn) = connections.get_mut(&connection_id) {
        conn.session_id = Some(session_id.to_string());
    }
}

/// Relay a session's changes to one client until either side goes away.
///
/// Revisions sent to the client never go backwards: after a lag snapshot,
/// buffered changes at or below the snapshot's revision are dropped.
async fn forward_changes(
    state: AppState,
    session_id: String,
    start_rev: u64,
    mut receiver: broadcast::Receiver<StateChange>,
    tx: mpsc::Sender<ServerMessage>,
) {
    let mut last_rev = start_rev;

    loop {
        let msg = match receiver.recv().await {
            Ok(change) if change.rev <= last_rev => continue,
            Ok(change) => {
                last_rev = change.rev;
                ServerMessage::StateChanged { change }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Subscriber of session {} lagged by {} changes, resending state",
                    session_id, skipped
                );
                match state.session_manager.get_session(&session_id).await {
                    Ok(snapshot) => {
                        last_rev = last_rev.max(snapshot.rev);
                        ServerMessage::State { snapshot }
                    }
                    Err(_) => break,
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = tx
                    .send(ServerMessage::SessionError {
                        code: ErrorCode::SessionNotFound,
                        message: format!("Session {} ended", session_id),
                    })
                    .await;
                break;
            }
        };

        if tx.send(msg).await.is_err() {
            break;
        }
    }
}

async fn send_session_error(
    tx: &mpsc::Sender<ServerMessage>,
    seq: u64,
    error: &crate::session::SessionError,
) {
    let _ = tx
        .send(ServerMessage::SessionError {
            code: ErrorCode::from(error),
            message: error.to_string(),
        })
        .await;
    let _ = tx.send(ServerMessage::reject(seq, error.to_string())).await;
}

async fn send_not_attached(tx: &mpsc::Sender<ServerMessage>, seq: u64) {
    let _ = tx
        .send(ServerMessage::SessionError {
            code: ErrorCode::NotAttached,
            message: "Not attached to a session".to_string(),
        })
        .await;
    let _ = tx
        .send(ServerMessage::reject(seq, "Not attached to a session"))
        .await;
}
