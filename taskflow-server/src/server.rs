//! Sync server core: shared state, WebSocket handler, and request
//! dispatch.
//!
//! Each client holds one WebSocket connection that carries both the
//! mutation surface (request/reply frames) and the realtime channel
//! (pushed events). The connection lifecycle:
//!
//! 1. Wait for a `Hello` carrying the bearer credential.
//! 2. Verify it through the [`AuthGate`]; send `Denied` and close on
//!    failure.
//! 3. Subscribe the connection to the hub and snapshot the board in one
//!    step, send `Welcome`, then enter the request loop.
//! 4. On disconnect, unsubscribe. A mutation already dispatched keeps
//!    running to completion; the client re-syncs from the snapshot on
//!    reconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskflow_proto::task::OwnerId;
use taskflow_proto::wire::{self, ClientMessage, OpResult, ServerMessage, TaskOp};
use tokio::sync::mpsc;

use crate::auth::AuthGate;
use crate::hub::SyncHub;
use crate::store::{TaskStore, UpdateOutcome};

/// Default maximum allowed frame size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Shared server state: the hub, the store publishing into it, and the
/// credential gate every connection must pass.
pub struct ServerState {
    /// Realtime fan-out registry.
    pub hub: Arc<SyncHub>,
    /// Authoritative task state.
    pub store: Arc<TaskStore>,
    /// Credential verifier (external collaborator).
    pub auth: Arc<dyn AuthGate>,
    /// Maximum allowed frame size in bytes.
    max_payload_size: usize,
}

impl ServerState {
    /// Creates server state with the default payload limit.
    #[must_use]
    pub fn new(auth: Arc<dyn AuthGate>) -> Self {
        Self::with_config(auth, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates server state with a custom payload limit.
    #[must_use]
    pub fn with_config(auth: Arc<dyn AuthGate>, max_payload_size: usize) -> Self {
        let hub = Arc::new(SyncHub::new());
        let store = Arc::new(TaskStore::new(Arc::clone(&hub)));
        Self {
            hub,
            store,
            auth,
            max_payload_size,
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Wait for the Hello frame carrying the credential.
    let Some(token) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        return;
    };

    // Verify before touching any state. Auth failures are terminal for
    // the connection and never retried server-side.
    let owner = match state.auth.verify(&token) {
        Ok(owner) => owner,
        Err(err) => {
            tracing::info!(error = %err, "credential rejected");
            let denied = ServerMessage::Denied {
                reason: err.to_string(),
            };
            if let Ok(bytes) = wire::encode_server(&denied) {
                let _ = ws_sender.send(Message::Binary(bytes.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::info!(owner = %owner, "client authenticated");

    // All outbound traffic (welcome, snapshot, replies, events) goes
    // through one channel so it reaches the socket in a single order.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let _ = tx.send(ServerMessage::Welcome {
        owner: owner.clone(),
    });

    // Subscribe + snapshot atomically: no event can slip between the
    // subscription and the snapshot push.
    let subscriber_id = state.store.attach(&owner, tx.clone()).await;

    // Writer task: drain the channel into the socket.
    let writer_owner = owner.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = match wire::encode_server(&msg) {
                Ok(b) => b,
                Err(err) => {
                    tracing::error!(owner = %writer_owner, error = %err, "failed to encode frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Binary(bytes.into())).await.is_err() {
                tracing::debug!(owner = %writer_owner, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: decode and dispatch requests.
    let reader_owner = owner.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(&reader_owner, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::debug!(owner = %reader_owner, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            // The socket is gone, but a mutation already dispatched must
            // still commit: let the reader wind down on its own before
            // tearing it down.
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), &mut read_task).await;
            read_task.abort();
        }
    }

    state.hub.unsubscribe(subscriber_id).await;
    tracing::info!(owner = %owner, "client disconnected");
}

/// Waits for the first frame, expecting a `Hello`.
///
/// Returns the presented token, or `None` if the connection closes or
/// sends something other than a `Hello` first.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match wire::decode_client(&data) {
                Ok(ClientMessage::Hello { token }) => return Some(token),
                Ok(other) => {
                    tracing::warn!(msg = ?other, "expected Hello, got different message");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to decode hello frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip ping/pong frames during the handshake.
            }
        }
    }
    None
}

/// Handles one binary frame from an authenticated client.
async fn handle_frame(
    owner: &OwnerId,
    data: &[u8],
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let oversized = data.len() > state.max_payload_size;
    let msg = match wire::decode_client(data) {
        Ok(m) => m,
        Err(err) => {
            tracing::warn!(owner = %owner, error = %err, "failed to decode frame, skipping");
            return;
        }
    };

    match msg {
        ClientMessage::Request { request_id, op } => {
            let result = if oversized {
                tracing::warn!(
                    owner = %owner,
                    size = data.len(),
                    max = state.max_payload_size,
                    "frame exceeds size limit"
                );
                OpResult::Err(wire::OpError::Validation(format!(
                    "payload too large: {} bytes (max {})",
                    data.len(),
                    state.max_payload_size
                )))
            } else {
                dispatch(owner, op, &state.store).await
            };
            let _ = tx.send(ServerMessage::Reply { request_id, result });
        }
        ClientMessage::Hello { .. } => {
            tracing::warn!(owner = %owner, "duplicate Hello from authenticated client");
        }
    }
}

/// Runs one board operation against the store.
async fn dispatch(owner: &OwnerId, op: TaskOp, store: &TaskStore) -> OpResult {
    match op {
        TaskOp::List => OpResult::Tasks(store.list(owner).await),
        TaskOp::Create {
            title,
            description,
            status,
            priority,
        } => match store.create(owner, &title, description, status, priority).await {
            Ok(task) => OpResult::Task(task),
            Err(err) => OpResult::Err(err.into()),
        },
        TaskOp::Update { id, patch } => match store.update(owner, id, &patch).await {
            Ok(UpdateOutcome::Edited(task)) => OpResult::Task(task),
            Ok(UpdateOutcome::Moved(tasks)) => OpResult::Moved(tasks),
            Err(err) => OpResult::Err(err.into()),
        },
        TaskOp::Move { id, status, index } => {
            match store.move_task(owner, id, status, index).await {
                Ok(tasks) => OpResult::Moved(tasks),
                Err(err) => OpResult::Err(err.into()),
            }
        }
        TaskOp::Delete { id } => match store.delete(owner, id).await {
            Ok(()) => OpResult::Deleted(id),
            Err(err) => OpResult::Err(err.into()),
        },
    }
}

/// Starts the sync server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    auth: Arc<dyn AuthGate>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new(auth))).await
}

/// Starts the sync server with pre-configured [`ServerState`].
///
/// This is the primary entry point used by both `main.rs` and test
/// code; binding to port 0 yields an OS-assigned port in the returned
/// address.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "sync server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
