//! WebSocket connection to the sync server.
//!
//! One connection carries both directions of the protocol: requests go
//! out with a correlation id and are answered by `Reply` frames; the
//! server pushes `Event` frames at any time. A background reader task
//! routes replies to their waiting callers and queues events for the
//! owner of the connection to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskflow_proto::task::OwnerId;
use taskflow_proto::wire::{
    self, ClientMessage, OpResult, RequestId, ServerMessage, TaskEvent, TaskOp,
};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Replies waiting to be routed back to their callers.
type PendingReplies = Arc<parking_lot::Mutex<HashMap<RequestId, oneshot::Sender<OpResult>>>>;

/// Default timeout for connecting to the sync server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the `Hello` / `Welcome` handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for an individual request/reply round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the client connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server rejected the credential. Re-authenticate; never retry
    /// the same token.
    #[error("not authorized: {0}")]
    Auth(String),
    /// The connection could not be established or broke mid-flight.
    #[error("transport error: {0}")]
    Transport(String),
    /// The connection to the server is closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// A request did not receive its reply in time.
    #[error("request timed out")]
    Timeout,
    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<wire::WireError> for ClientError {
    fn from(err: wire::WireError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// An authenticated connection to the sync server.
///
/// Created via [`Connection::connect`], which performs the credential
/// handshake and spawns a background reader. The first event delivered
/// by [`Connection::next_event`] is always the server's snapshot of the
/// owner's board.
#[derive(Debug)]
pub struct Connection {
    /// The identity the server verified this connection as.
    owner: OwnerId,
    /// Write half of the WebSocket (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Requests awaiting their reply.
    pending: PendingReplies,
    /// Events pushed by the server, in delivery order.
    events: Mutex<mpsc::Receiver<TaskEvent>>,
    /// Whether the socket is still up.
    connected: Arc<AtomicBool>,
    /// Background reader (kept alive for the connection's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Connects to the sync server and authenticates.
    ///
    /// Steps:
    /// 1. Open the WebSocket to `url` (10s timeout).
    /// 2. Send `Hello` with the bearer token.
    /// 3. Await `Welcome` (5s timeout); `Denied` becomes
    ///    [`ClientError::Auth`].
    /// 4. Spawn the background reader.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if connecting or the handshake times out.
    /// - [`ClientError::Auth`] if the credential is rejected.
    /// - [`ClientError::Transport`] for connect or socket failures.
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "sync server connect timed out");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "sync server connect failed");
                ClientError::Transport(e.to_string())
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = ClientMessage::Hello {
            token: token.to_string(),
        };
        let bytes = wire::encode_client(&hello)?;
        ws_sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| ClientError::Transport(format!("failed to send hello: {e}")))?;

        let owner = await_welcome(&mut ws_reader).await?;
        tracing::info!(owner = %owner, url, "connected to sync server");

        let pending: PendingReplies = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(256);
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            event_tx,
            Arc::clone(&connected),
        ));

        Ok(Self {
            owner,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            pending,
            events: Mutex::new(event_rx),
            connected,
            _reader_handle: reader_handle,
        })
    }

    /// The identity the server verified this connection as.
    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Whether the socket is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends a request under a caller-chosen id and awaits its reply.
    ///
    /// The id comes from the reconciler so the reply can be reconciled
    /// against the matching optimistic change.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionClosed`] if the socket is down.
    /// - [`ClientError::Timeout`] if no reply arrives in time.
    pub async fn send_request(
        &self,
        request_id: RequestId,
        op: TaskOp,
    ) -> Result<OpResult, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, reply_tx);

        let msg = ClientMessage::Request { request_id, op };
        let bytes = match wire::encode_client(&msg) {
            Ok(b) => b,
            Err(e) => {
                self.pending.lock().remove(&request_id);
                return Err(e.into());
            }
        };

        {
            let mut sender = self.ws_sender.lock().await;
            if sender.send(Message::Binary(bytes.into())).await.is_err() {
                self.pending.lock().remove(&request_id);
                self.connected.store(false, Ordering::Relaxed);
                return Err(ClientError::ConnectionClosed);
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Sends a request under a fresh id and awaits its reply.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send_request`].
    pub async fn request(&self, op: TaskOp) -> Result<OpResult, ClientError> {
        self.send_request(RequestId::new(), op).await
    }

    /// Receives the next pushed event.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] once the connection is
    /// down and all buffered events have been drained.
    pub async fn next_event(&self) -> Result<TaskEvent, ClientError> {
        let mut rx = self.events.lock().await;
        rx.recv().await.ok_or(ClientError::ConnectionClosed)
    }
}

/// Waits for the server's answer to `Hello`.
async fn await_welcome(ws_reader: &mut WsReader) -> Result<OwnerId, ClientError> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_reader.next())
        .await
        .map_err(|_| {
            tracing::warn!("handshake timed out");
            ClientError::Timeout
        })?;

    match frame {
        Some(Ok(Message::Binary(data))) => match wire::decode_server(&data) {
            Ok(ServerMessage::Welcome { owner }) => Ok(owner),
            Ok(ServerMessage::Denied { reason }) => {
                tracing::warn!(reason = %reason, "credential rejected");
                Err(ClientError::Auth(reason))
            }
            Ok(other) => Err(ClientError::Transport(format!(
                "unexpected handshake response: {other:?}"
            ))),
            Err(e) => Err(ClientError::Codec(e.to_string())),
        },
        Some(Ok(Message::Close(_))) | None => Err(ClientError::ConnectionClosed),
        Some(Ok(_)) => Err(ClientError::Transport(
            "unexpected non-binary frame during handshake".to_string(),
        )),
        Some(Err(e)) => Err(ClientError::Transport(format!(
            "WebSocket error during handshake: {e}"
        ))),
    }
}

/// Background task that reads server frames and dispatches them.
///
/// Replies are routed to their waiting request; events are queued in
/// delivery order. Malformed frames are logged and skipped; the task
/// does not disconnect on bad data. On exit, pending requests are
/// dropped so their callers observe `ConnectionClosed`.
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: PendingReplies,
    event_tx: mpsc::Sender<TaskEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode_server(&data) {
                Ok(ServerMessage::Reply { request_id, result }) => {
                    let reply_tx = pending.lock().remove(&request_id);
                    if let Some(tx) = reply_tx {
                        let _ = tx.send(result);
                    } else {
                        tracing::debug!(request_id = %request_id, "reply with no waiting request");
                    }
                }
                Ok(ServerMessage::Event(event)) => {
                    if event_tx.send(event).await.is_err() {
                        // Receiver dropped — connection was dropped, exit.
                        break;
                    }
                }
                Ok(other) => {
                    tracing::debug!(msg = ?other, "unexpected post-handshake message");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("sync server closed the connection");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    // Wake up any caller still waiting on a reply.
    pending.lock().clear();
    tracing::debug!("reader task exiting");
}
