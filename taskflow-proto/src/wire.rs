//! Wire messages exchanged between `TaskFlow` clients and the sync server.
//!
//! One persistent WebSocket connection per client carries both the
//! mutation surface (request/reply frames correlated by [`RequestId`])
//! and the realtime channel (pushed [`TaskEvent`] frames). All frames
//! are postcard-encoded binary.
//!
//! The first frame on a connection must be [`ClientMessage::Hello`]; the
//! server answers [`ServerMessage::Welcome`] followed by a single
//! [`TaskEvent::Snapshot`], or [`ServerMessage::Denied`] and a close.
//! After the handshake, every mutation fans out to the owner's other
//! connections as a single-entity event; the snapshot shape is never
//! used for mutation fan-out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{OwnerId, Priority, Task, TaskId, TaskStatus};

/// Correlates a request frame with its reply, based on UUID v7 for
/// time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A partial update to a task's fields.
///
/// `status` and `position` are placement fields: when either is set the
/// server re-derives the final positions through its ordering policy
/// (`position` is a target index within the destination column, not a
/// raw rank, since the client's view may be stale).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title, if changing.
    pub title: Option<String>,
    /// New description, if changing.
    pub description: Option<String>,
    /// New priority, if changing.
    pub priority: Option<Priority>,
    /// Destination column, if moving.
    pub status: Option<TaskStatus>,
    /// Target index within the destination column, if reordering.
    pub position: Option<u32>,
}

impl TaskPatch {
    /// Returns `true` if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.position.is_none()
    }

    /// Returns `true` if the patch changes where the task sits
    /// (column or rank) rather than only what it says.
    #[must_use]
    pub const fn touches_placement(&self) -> bool {
        self.status.is_some() || self.position.is_some()
    }
}

/// A mutation or query against the caller's board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOp {
    /// Fetch the caller's full ordered task list.
    List,
    /// Create a new task at the tail of the given column.
    Create {
        /// Non-empty display title.
        title: String,
        /// Optional free-text description.
        description: Option<String>,
        /// Column the task starts in.
        status: TaskStatus,
        /// Display priority.
        priority: Priority,
    },
    /// Apply a partial update to one task.
    Update {
        /// Task to update.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Move one task to a column at a visual index.
    Move {
        /// Task to move.
        id: TaskId,
        /// Destination column.
        status: TaskStatus,
        /// 0-based index within the destination column (clamped).
        index: u32,
    },
    /// Delete one task.
    Delete {
        /// Task to delete.
        id: TaskId,
    },
}

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Presents the bearer credential. Must be the first frame.
    Hello {
        /// Opaque bearer token; verified by the credential gate.
        token: String,
    },
    /// A board operation, answered by a matching [`ServerMessage::Reply`].
    Request {
        /// Correlation id echoed back in the reply.
        request_id: RequestId,
        /// The operation to perform.
        op: TaskOp,
    },
}

/// Failure outcome of a board operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OpError {
    /// Credential missing, invalid, or expired. Never retried; the
    /// client must re-authenticate.
    #[error("not authorized: {0}")]
    Auth(String),
    /// A task field failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No such task for this owner. Deliberately carries no detail:
    /// "does not exist" and "belongs to someone else" must be
    /// indistinguishable.
    #[error("task not found")]
    NotFound,
    /// Concurrent reorder collision that survived the server's internal
    /// retries.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Successful or failed outcome of a board operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    /// The caller's full ordered list (`List`).
    Tasks(Vec<Task>),
    /// A single canonical task (`Create`, or an `Update` that did not
    /// move anything).
    Task(Task),
    /// Every task whose position changed, moved task first
    /// (`Move`, or an `Update` touching placement).
    Moved(Vec<Task>),
    /// The deleted id (`Delete`).
    Deleted(TaskId),
    /// The operation failed.
    Err(OpError),
}

/// A state change pushed to connected clients.
///
/// Mutation fan-out uses only the single-entity variants; `Snapshot` is
/// sent exactly once per connection, right after `Welcome`, so a
/// (re)connecting client starts from authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    /// A task was created.
    Created(Task),
    /// A task's fields or position changed.
    Updated(Task),
    /// A task was deleted.
    Deleted(TaskId),
    /// The owner's full ordered list, replacing local state wholesale.
    Snapshot(Vec<Task>),
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The credential verified; the connection is now subscribed.
    Welcome {
        /// The verified owner identity.
        owner: OwnerId,
    },
    /// The credential was rejected. The server closes the connection
    /// after sending this.
    Denied {
        /// Human-readable reason.
        reason: String,
    },
    /// Outcome of a request, correlated by id.
    Reply {
        /// The id from the originating [`ClientMessage::Request`].
        request_id: RequestId,
        /// The outcome.
        result: OpResult,
    },
    /// A pushed state change for the subscribed owner.
    Event(TaskEvent),
}

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization or deserialization failed.
    #[error("wire codec error: {0}")]
    Codec(String),
}

/// Encodes a [`ClientMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Codec`] if serialization fails.
pub fn encode_client(msg: &ClientMessage) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(msg).map_err(|e| WireError::Codec(e.to_string()))
}

/// Decodes a [`ClientMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Codec`] if deserialization fails.
pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, WireError> {
    postcard::from_bytes(bytes).map_err(|e| WireError::Codec(e.to_string()))
}

/// Encodes a [`ServerMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Codec`] if serialization fails.
pub fn encode_server(msg: &ServerMessage) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(msg).map_err(|e| WireError::Codec(e.to_string()))
}

/// Decodes a [`ServerMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Codec`] if deserialization fails.
pub fn decode_server(bytes: &[u8]) -> Result<ServerMessage, WireError> {
    postcard::from_bytes(bytes).map_err(|e| WireError::Codec(e.to_string()))
}
