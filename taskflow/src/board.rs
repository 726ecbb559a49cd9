//! Local replica of one owner's board.
//!
//! The board is plain owned state, no I/O and no locking. The connection
//! layer feeds it pushed events; the reconciler layers optimistic
//! mutations on top. Ordering is always derived the same way the server
//! derives it: column, then position, then id.

use std::collections::HashMap;

use taskflow_proto::task::{Task, TaskId, TaskStatus};
use taskflow_proto::wire::TaskEvent;

/// One owner's local task state.
#[derive(Debug, Default)]
pub struct LocalBoard {
    tasks: HashMap<TaskId, Task>,
}

impl LocalBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the board holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Returns `true` if the board holds a task with this id.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// All tasks in display order: `(status, position, id)`.
    #[must_use]
    pub fn tasks_ordered(&self) -> Vec<Task> {
        let mut all: Vec<Task> = self.tasks.values().cloned().collect();
        all.sort_by_key(Task::ordering_key);
        all
    }

    /// One column in display order.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        let mut column: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        column.sort_by_key(Task::ordering_key);
        column
    }

    /// Inserts or replaces a task.
    pub fn upsert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Removes a task, returning it if present.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    /// Replaces the whole board with an authoritative list.
    pub fn replace_all(&mut self, tasks: &[Task]) {
        self.tasks = tasks.iter().map(|t| (t.id, t.clone())).collect();
    }

    /// Merges a pushed event into local state.
    ///
    /// Events are tolerated out of order: an `Updated` or `Deleted` for
    /// a task that is not present locally (already deleted, or never
    /// seen) is a no-op, never an error. A `Snapshot` replaces local
    /// state wholesale.
    pub fn apply_event(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::Created(task) => self.upsert(task.clone()),
            TaskEvent::Updated(task) => {
                if self.tasks.contains_key(&task.id) {
                    self.upsert(task.clone());
                }
            }
            TaskEvent::Deleted(id) => {
                self.tasks.remove(id);
            }
            TaskEvent::Snapshot(tasks) => self.replace_all(tasks),
        }
    }

    /// Applies an optimistic move locally: place the task in `status`
    /// at visual `index` (clamped) and renumber that column densely.
    ///
    /// This is the client's guess at what the server will compute; the
    /// canonical positions arrive in the reply and events and overwrite
    /// it. Returns `false` if the task is unknown.
    pub fn local_move(&mut self, id: TaskId, status: TaskStatus, index: usize) -> bool {
        if !self.tasks.contains_key(&id) {
            return false;
        }

        let mut column: Vec<(TaskId, u32)> = self
            .tasks
            .values()
            .filter(|t| t.status == status && t.id != id)
            .map(|t| (t.id, t.position))
            .collect();
        column.sort_by_key(|&(task_id, position)| (position, task_id));

        let index = index.min(column.len());
        let mut sequence: Vec<TaskId> = column.into_iter().map(|(task_id, _)| task_id).collect();
        sequence.insert(index, id);

        for (slot, task_id) in sequence.iter().enumerate() {
            if let Some(task) = self.tasks.get_mut(task_id) {
                if *task_id == id {
                    task.status = status;
                }
                #[allow(clippy::cast_possible_truncation)]
                {
                    task.position = slot as u32;
                }
            }
        }
        true
    }

    /// Tail position for an optimistic insert into a column.
    #[must_use]
    pub fn tail_position(&self, status: TaskStatus) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.position)
            .max()
            .map_or(0, |max| max + 1)
    }
}
