//! Authoritative task store: the single source of truth for existence,
//! ordering, and ownership.
//!
//! State is a per-owner board map. Each board sits behind its own async
//! mutex, the single-writer-per-owner discipline that serializes
//! concurrent reorders for one owner while leaving different owners
//! fully parallel. Every successful mutation publishes its event(s) to
//! the [`SyncHub`] *inside* the owner's critical section, so per-owner
//! event delivery order always equals commit order. Publishing is a
//! non-blocking channel push, so holding the lock across it never waits
//! on a slow client.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use taskflow_proto::task::{MAX_TITLE_LENGTH, OwnerId, Priority, Task, TaskId, TaskStatus};
use taskflow_proto::wire::{OpError, TaskEvent, TaskPatch};
use tokio::sync::{Mutex, RwLock};

use crate::hub::SyncHub;
use crate::ordering;

/// How many times a placement is re-run if its post-condition check
/// (unique positions in the touched column) fails before the operation
/// surfaces a conflict.
const MAX_PLACEMENT_RETRIES: usize = 3;

/// Errors surfaced by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A task field failed validation; surfaced verbatim, never retried.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No task with that id exists for the caller. Identical whether the
    /// id is absent or belongs to another owner; existence never leaks
    /// across owners.
    #[error("task not found")]
    NotFound,
    /// A reorder collision survived the internal retries.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for OpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

/// What a partial update did: a pure field edit touches one task, a
/// patch with placement fields repositions a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Only title/description/priority changed.
    Edited(Task),
    /// The task moved; every task whose position changed, moved task
    /// first.
    Moved(Vec<Task>),
}

/// One owner's tasks, guarded by that owner's writer lock.
type Board = Mutex<BTreeMap<TaskId, Task>>;

/// The authoritative, owner-partitioned task collection.
pub struct TaskStore {
    boards: RwLock<HashMap<OwnerId, Arc<Board>>>,
    next_id: AtomicU64,
    hub: Arc<SyncHub>,
}

impl TaskStore {
    /// Creates an empty store that publishes mutations to `hub`.
    #[must_use]
    pub fn new(hub: Arc<SyncHub>) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            hub,
        }
    }

    /// Returns the owner's board, creating an empty one on first use.
    async fn board(&self, owner: &OwnerId) -> Arc<Board> {
        {
            let boards = self.boards.read().await;
            if let Some(board) = boards.get(owner) {
                return Arc::clone(board);
            }
        }
        let mut boards = self.boards.write().await;
        Arc::clone(boards.entry(owner.clone()).or_default())
    }

    /// Returns all of `owner`'s tasks ordered by `(status, position, id)`.
    ///
    /// Never contains another owner's tasks: boards are partitioned by
    /// owner before any lookup happens.
    pub async fn list(&self, owner: &OwnerId) -> Vec<Task> {
        let board = self.board(owner).await;
        let tasks = board.lock().await;
        ordered_tasks(&tasks)
    }

    /// Creates a task at the tail of its column and publishes `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an empty or over-long title.
    pub async fn create(
        &self,
        owner: &OwnerId,
        title: &str,
        description: Option<String>,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<Task, StoreError> {
        validate_title(title)?;

        let board = self.board(owner).await;
        let mut tasks = board.lock().await;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let position = ordering::tail_position(&column_of(&tasks, status, None));
        let task = Task {
            id,
            title: title.to_string(),
            description,
            status,
            priority,
            position,
            owner: owner.clone(),
        };
        tasks.insert(id, task.clone());

        tracing::debug!(owner = %owner, id = %id, status = %status, position, "task created");
        self.hub.publish(owner, &TaskEvent::Created(task.clone())).await;
        Ok(task)
    }

    /// Applies a partial update and publishes `Updated` for every task
    /// it touched.
    ///
    /// A patch carrying `status` and/or `position` is a placement
    /// request: `position` is a target index within the destination
    /// column and final ranks are re-derived from current server state,
    /// never copied from the client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an empty patch or invalid
    /// title, [`StoreError::NotFound`] if `owner` has no such task, and
    /// [`StoreError::Conflict`] if placement failed to converge.
    pub async fn update(
        &self,
        owner: &OwnerId,
        id: TaskId,
        patch: &TaskPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::Validation("empty update".to_string()));
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }

        let board = self.board(owner).await;
        let mut tasks = board.lock().await;

        let current = tasks.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(title) = &patch.title {
            current.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            current.description = Some(description.clone());
        }
        if let Some(priority) = patch.priority {
            current.priority = priority;
        }
        let current_status = current.status;
        let edited = current.clone();

        if patch.touches_placement() {
            let dest = patch.status.unwrap_or(current_status);
            let index = patch.position.map_or_else(
                || column_of(&tasks, dest, Some(id)).len(),
                |p| p as usize,
            );
            let affected = apply_placement(&mut tasks, id, dest, index)?;
            let moved = collect_tasks(&tasks, &affected);
            for task in &moved {
                self.hub.publish(owner, &TaskEvent::Updated(task.clone())).await;
            }
            tracing::debug!(owner = %owner, id = %id, dest = %dest, index, "task moved");
            Ok(UpdateOutcome::Moved(moved))
        } else {
            self.hub
                .publish(owner, &TaskEvent::Updated(edited.clone()))
                .await;
            tracing::debug!(owner = %owner, id = %id, "task edited");
            Ok(UpdateOutcome::Edited(edited))
        }
    }

    /// Moves a task into `status` at visual `index` (clamped) and
    /// publishes `Updated` for the affected batch, moved task first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `owner` has no such task, or
    /// [`StoreError::Conflict`] if placement failed to converge.
    pub async fn move_task(
        &self,
        owner: &OwnerId,
        id: TaskId,
        status: TaskStatus,
        index: u32,
    ) -> Result<Vec<Task>, StoreError> {
        let board = self.board(owner).await;
        let mut tasks = board.lock().await;

        if !tasks.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        let affected = apply_placement(&mut tasks, id, status, index as usize)?;
        let moved = collect_tasks(&tasks, &affected);
        for task in &moved {
            self.hub.publish(owner, &TaskEvent::Updated(task.clone())).await;
        }
        tracing::debug!(owner = %owner, id = %id, dest = %status, index, "task moved");
        Ok(moved)
    }

    /// Deletes a task and publishes `Deleted`.
    ///
    /// Siblings keep their positions: the order within the column stays
    /// total (position, then id), and the gap is reclaimed by the next
    /// placement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `owner` has no such task; the
    /// store is unchanged and nothing is published.
    pub async fn delete(&self, owner: &OwnerId, id: TaskId) -> Result<(), StoreError> {
        let board = self.board(owner).await;
        let mut tasks = board.lock().await;

        if tasks.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tracing::debug!(owner = %owner, id = %id, "task deleted");
        self.hub.publish(owner, &TaskEvent::Deleted(id)).await;
        Ok(())
    }

    /// Subscribes a connection and snapshots the owner's board in one
    /// critical section.
    ///
    /// The snapshot is pushed into `sender` before the board lock is
    /// released, so no mutation event can slip in between subscription
    /// and snapshot: the first event a new connection sees is always
    /// the authoritative full list.
    pub async fn attach(
        &self,
        owner: &OwnerId,
        sender: tokio::sync::mpsc::UnboundedSender<taskflow_proto::wire::ServerMessage>,
    ) -> crate::hub::SubscriberId {
        let board = self.board(owner).await;
        let tasks = board.lock().await;
        let id = self.hub.subscribe(owner.clone(), sender.clone()).await;
        let snapshot = ordered_tasks(&tasks);
        let _ = sender.send(taskflow_proto::wire::ServerMessage::Event(
            TaskEvent::Snapshot(snapshot),
        ));
        id
    }
}

/// Rejects empty and over-long titles.
fn validate_title(title: &str) -> Result<(), StoreError> {
    if title.is_empty() {
        return Err(StoreError::Validation(
            "task title cannot be empty".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(StoreError::Validation(format!(
            "task title too long (max {MAX_TITLE_LENGTH} characters)"
        )));
    }
    Ok(())
}

/// Clones a board's tasks in display order.
fn ordered_tasks(tasks: &BTreeMap<TaskId, Task>) -> Vec<Task> {
    let mut all: Vec<Task> = tasks.values().cloned().collect();
    all.sort_by_key(Task::ordering_key);
    all
}

/// Snapshot of one column as `(id, position)` pairs in display order,
/// optionally excluding the task about to be re-placed.
fn column_of(
    tasks: &BTreeMap<TaskId, Task>,
    status: TaskStatus,
    exclude: Option<TaskId>,
) -> Vec<ordering::ColumnEntry> {
    let mut column: Vec<ordering::ColumnEntry> = tasks
        .values()
        .filter(|t| t.status == status && Some(t.id) != exclude)
        .map(|t| (t.id, t.position))
        .collect();
    column.sort_by_key(|&(id, position)| (position, id));
    column
}

/// Runs the ordering policy against the destination column and applies
/// the resulting assignments, re-running a bounded number of times if
/// the uniqueness post-condition fails.
///
/// Returns the affected ids in event order (moved task first).
fn apply_placement(
    tasks: &mut BTreeMap<TaskId, Task>,
    id: TaskId,
    dest: TaskStatus,
    index: usize,
) -> Result<Vec<TaskId>, StoreError> {
    for attempt in 0..MAX_PLACEMENT_RETRIES {
        let column = column_of(tasks, dest, Some(id));
        let assignments = ordering::place_at(&column, id, index);
        for &(task_id, position) in &assignments {
            if let Some(task) = tasks.get_mut(&task_id) {
                if task_id == id {
                    task.status = dest;
                }
                task.position = position;
            }
        }
        if ordering::positions_are_unique(&column_of(tasks, dest, None)) {
            return Ok(assignments.into_iter().map(|(task_id, _)| task_id).collect());
        }
        tracing::warn!(id = %id, dest = %dest, attempt, "placement produced duplicate positions, retrying");
    }
    Err(StoreError::Conflict(format!(
        "reorder did not converge after {MAX_PLACEMENT_RETRIES} attempts"
    )))
}

/// Clones the given ids out of the board, preserving order.
fn collect_tasks(tasks: &BTreeMap<TaskId, Task>, ids: &[TaskId]) -> Vec<Task> {
    ids.iter()
        .filter_map(|id| tasks.get(id).cloned())
        .collect()
}
