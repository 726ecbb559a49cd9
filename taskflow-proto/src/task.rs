//! Task data model shared by the `TaskFlow` server and clients.
//!
//! Defines the task record, its closed status/priority sets, and the
//! identifier newtypes. Status and priority parse case-insensitively at
//! every string boundary (legacy clients and servers disagreed on
//! casing) and always display in one canonical form.

use serde::{Deserialize, Serialize};

/// Maximum allowed task title length in characters.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Unique identifier for a task, assigned by the server store.
///
/// Ids are allocated from a monotonically increasing counter and never
/// reused, so ascending id doubles as a stable tiebreak for ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Returns the raw integer value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verified identity of the user a task belongs to.
///
/// Produced by the credential gate; the store never sees raw tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wraps a verified identity string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a status or priority string is not in the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind}: {value:?}")]
pub struct ParseEnumError {
    /// Which closed set was being parsed ("status" or "priority").
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

/// Normalizes a status/priority string for closed-set comparison.
///
/// Legacy clients send any mix of case plus hyphens or spaces instead of
/// underscores; all of those must compare equal to the canonical form.
fn canonical_key(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Status column a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not yet started.
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// All statuses in canonical column order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "TODO"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical_key(s).as_str() {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            _ => Err(ParseEnumError {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// Display priority of a task. Never used for ordering or access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Low urgency.
    Low,
    /// Default urgency.
    Medium,
    /// High urgency.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical_key(s).as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(ParseEnumError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// A single work item on an owner's board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned unique identifier.
    pub id: TaskId,
    /// Non-empty display title.
    pub title: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Column the task currently lives in.
    pub status: TaskStatus,
    /// Display priority.
    pub priority: Priority,
    /// Rank within the `(owner, status)` bucket; lower sorts first.
    pub position: u32,
    /// Identity of the user who created the task.
    pub owner: OwnerId,
}

impl Task {
    /// Ordering key used everywhere a board is rendered or compared:
    /// column, then position, then id as the tiebreak.
    #[must_use]
    pub const fn ordering_key(&self) -> (TaskStatus, u32, TaskId) {
        (self.status, self.position, self.id)
    }
}
