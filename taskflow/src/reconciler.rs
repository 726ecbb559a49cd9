//! Optimistic mutation state machine.
//!
//! The reconciler owns a [`LocalBoard`] and layers the optimistic-update
//! contract on top: every user-initiated mutation is applied locally
//! first, the matching wire op is handed back for the caller to send,
//! and the eventual reply either confirms the change with the server's
//! canonical task(s) or tells the caller to throw the local state away
//! and re-fetch. Rollback is always a full re-sync, never a field-level
//! patch, so failed optimism can't accumulate drift.
//!
//! The reconciler is sans-IO: it never touches the network. The caller
//! wires it to a [`crate::connection::Connection`] (or anything else
//! that can move frames).

use std::collections::HashMap;

use taskflow_proto::task::{
    MAX_TITLE_LENGTH, OwnerId, Priority, Task, TaskId, TaskStatus,
};
use taskflow_proto::wire::{OpError, OpResult, RequestId, TaskEvent, TaskOp, TaskPatch};

use crate::board::LocalBoard;

/// Errors raised before a mutation is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max {MAX_TITLE_LENGTH} characters)")]
    TitleTooLong,
    /// The task is not on the local board.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    /// The patch contains no fields.
    #[error("empty update")]
    EmptyPatch,
}

/// What the caller must do after a reply has been absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Local state is consistent; nothing to do.
    Clean,
    /// The optimistic change was discarded; issue [`Reconciler::begin_resync`]
    /// and send the resulting `List`.
    Resync,
    /// The credential was rejected. Re-authenticate (new connection),
    /// then re-sync.
    Reauth,
}

/// What a pending request will need when its reply lands.
#[derive(Debug)]
enum Pending {
    /// An optimistic create holding a provisional id to retire.
    Create { provisional: TaskId },
    /// An update, move, or delete; rollback is a full re-sync.
    Mutate,
    /// A `List` issued to recover from a failed mutation.
    Resync,
}

/// Per-client optimistic state for one owner's board.
pub struct Reconciler {
    board: LocalBoard,
    owner: OwnerId,
    pending: HashMap<RequestId, Pending>,
    /// Provisional ids count down from `u64::MAX`; server ids count up
    /// from 1, so the ranges can never collide.
    next_provisional: u64,
}

impl Reconciler {
    /// Creates a reconciler for the given verified owner.
    #[must_use]
    pub fn new(owner: OwnerId) -> Self {
        Self {
            board: LocalBoard::new(),
            owner,
            pending: HashMap::new(),
            next_provisional: u64::MAX,
        }
    }

    /// Read access to the local board.
    #[must_use]
    pub fn board(&self) -> &LocalBoard {
        &self.board
    }

    /// Returns `true` while any request is awaiting its reply.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn alloc_provisional(&mut self) -> TaskId {
        let id = TaskId(self.next_provisional);
        self.next_provisional -= 1;
        id
    }

    /// Optimistically creates a task and returns the op to send.
    ///
    /// The local entry carries a provisional id until the reply delivers
    /// the canonical task.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::TitleEmpty`] or [`BoardError::TitleTooLong`]
    /// without touching local state or emitting an op.
    pub fn create(
        &mut self,
        title: &str,
        description: Option<String>,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<(RequestId, TaskOp), BoardError> {
        validate_title(title)?;

        let provisional = self.alloc_provisional();
        let task = Task {
            id: provisional,
            title: title.to_string(),
            description: description.clone(),
            status,
            priority,
            position: self.board.tail_position(status),
            owner: self.owner.clone(),
        };
        self.board.upsert(task);

        let request_id = RequestId::new();
        self.pending
            .insert(request_id, Pending::Create { provisional });
        Ok((
            request_id,
            TaskOp::Create {
                title: title.to_string(),
                description,
                status,
                priority,
            },
        ))
    }

    /// Optimistically applies a partial update and returns the op to send.
    ///
    /// Placement fields are applied through the same dense local
    /// renumbering the server uses: a guess the canonical reply
    /// overwrites.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::UnknownTask`] if the task is not local,
    /// [`BoardError::EmptyPatch`] for a patch with no fields, or a title
    /// validation error.
    pub fn update(
        &mut self,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<(RequestId, TaskOp), BoardError> {
        if patch.is_empty() {
            return Err(BoardError::EmptyPatch);
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let Some(current) = self.board.get(id) else {
            return Err(BoardError::UnknownTask(id));
        };
        let current_status = current.status;

        let mut edited = current.clone();
        if let Some(title) = &patch.title {
            edited.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            edited.description = Some(description.clone());
        }
        if let Some(priority) = patch.priority {
            edited.priority = priority;
        }
        self.board.upsert(edited);

        if patch.touches_placement() {
            let dest = patch.status.unwrap_or(current_status);
            let index = patch.position.map_or_else(
                || self.board.column(dest).len(),
                |p| p as usize,
            );
            self.board.local_move(id, dest, index);
        }

        let request_id = RequestId::new();
        self.pending.insert(request_id, Pending::Mutate);
        Ok((request_id, TaskOp::Update { id, patch }))
    }

    /// Optimistically moves a task and returns the op to send.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::UnknownTask`] if the task is not local.
    pub fn move_task(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        index: u32,
    ) -> Result<(RequestId, TaskOp), BoardError> {
        if !self.board.local_move(id, status, index as usize) {
            return Err(BoardError::UnknownTask(id));
        }
        let request_id = RequestId::new();
        self.pending.insert(request_id, Pending::Mutate);
        Ok((request_id, TaskOp::Move { id, status, index }))
    }

    /// Optimistically deletes a task and returns the op to send.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::UnknownTask`] if the task is not local.
    pub fn delete(&mut self, id: TaskId) -> Result<(RequestId, TaskOp), BoardError> {
        if self.board.remove(id).is_none() {
            return Err(BoardError::UnknownTask(id));
        }
        let request_id = RequestId::new();
        self.pending.insert(request_id, Pending::Mutate);
        Ok((request_id, TaskOp::Delete { id }))
    }

    /// Starts a full re-sync; send the returned `List` op.
    pub fn begin_resync(&mut self) -> (RequestId, TaskOp) {
        let request_id = RequestId::new();
        self.pending.insert(request_id, Pending::Resync);
        (request_id, TaskOp::List)
    }

    /// Absorbs the reply for a previously issued request.
    ///
    /// Success replaces optimistic state with the server's canonical
    /// task(s), which is required for every placement: the server may have
    /// computed different positions than the local guess. Failure
    /// discards the optimistic change and asks the caller to re-sync
    /// (or re-authenticate).
    pub fn apply_reply(&mut self, request_id: RequestId, result: &OpResult) -> Reconcile {
        let Some(pending) = self.pending.remove(&request_id) else {
            tracing::debug!(request_id = %request_id, "reply for unknown request, ignoring");
            return Reconcile::Clean;
        };

        if let Pending::Create { provisional } = &pending {
            // The provisional entry retires no matter how the create went.
            self.board.remove(*provisional);
        }

        if let OpResult::Err(err) = result {
            tracing::debug!(request_id = %request_id, error = %err, "request failed, discarding optimistic state");
            return match err {
                OpError::Auth(_) => Reconcile::Reauth,
                _ => Reconcile::Resync,
            };
        }

        match (pending, result) {
            (Pending::Create { .. }, OpResult::Task(task)) => {
                self.board.upsert(task.clone());
                Reconcile::Clean
            }
            (Pending::Mutate, OpResult::Task(task)) => {
                self.board.upsert(task.clone());
                Reconcile::Clean
            }
            (Pending::Mutate, OpResult::Moved(tasks)) => {
                for task in tasks {
                    self.board.upsert(task.clone());
                }
                Reconcile::Clean
            }
            (Pending::Mutate, OpResult::Deleted(id)) => {
                self.board.remove(*id);
                Reconcile::Clean
            }
            (Pending::Resync, OpResult::Tasks(tasks)) => {
                self.board.replace_all(tasks);
                Reconcile::Clean
            }
            (pending, result) => {
                tracing::warn!(
                    request_id = %request_id,
                    pending = ?pending,
                    result = ?result,
                    "unexpected reply shape, falling back to re-sync"
                );
                Reconcile::Resync
            }
        }
    }

    /// Merges a pushed event into the local board.
    pub fn apply_event(&mut self, event: &TaskEvent) {
        self.board.apply_event(event);
    }
}

/// Client-side mirror of the server's title validation, so obviously
/// invalid input fails fast instead of optimistically appearing.
fn validate_title(title: &str) -> Result<(), BoardError> {
    if title.is_empty() {
        return Err(BoardError::TitleEmpty);
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(BoardError::TitleTooLong);
    }
    Ok(())
}
