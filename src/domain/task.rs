//! Task domain model.
//!
//! A task is the only entity the reorder subsystem mutates. Its ordering key
//! (`position`) is only comparable with other live tasks that share the same
//! `(workspace_id, status)` partition.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Value Objects - Newtypes
// =============================================================================

/// Unique identifier for a task.
///
/// Ordered so that lock acquisition can follow a canonical sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a new `TaskId` with a time-ordered UUID (v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Tenant partition key. Every query and lock is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    /// Creates a `WorkspaceId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a new random `WorkspaceId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier of the user issuing a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(Uuid);

impl ActorId {
    /// Creates an `ActorId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a new random `ActorId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A timestamp wrapper for `DateTime<Utc>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    #[must_use]
    pub const fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Returns the inner `DateTime<Utc>`.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the current time as a `Timestamp`.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// =============================================================================
// Lanes
// =============================================================================

/// The lane a task occupies on the board.
///
/// Each lane is a separate position partition: keys from different lanes are
/// never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
    /// Abandoned.
    Cancelled,
}

impl TaskStatus {
    /// Every lane, in board order.
    pub const ALL: [Self; 4] = [Self::Todo, Self::InProgress, Self::Done, Self::Cancelled];

    /// Storage representation, matching the serde `snake_case` names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(formatter, "To Do"),
            Self::InProgress => write!(formatter, "In Progress"),
            Self::Done => write!(formatter, "Done"),
            Self::Cancelled => write!(formatter, "Cancelled"),
        }
    }
}

/// Returned when a string does not name one of the fixed lanes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lane '{0}', expected one of: todo, in_progress, done, cancelled")]
pub struct UnknownLane(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownLane;

    /// Parses a lane name case-insensitively. Both `in_progress` and
    /// `in-progress` are accepted.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownLane(value.to_string())),
        }
    }
}

// =============================================================================
// Task
// =============================================================================

/// A work item on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub task_id: TaskId,
    /// Owning tenant. Never changes after creation.
    pub workspace_id: WorkspaceId,
    /// Title of the task.
    pub title: String,
    /// Current lane.
    pub status: TaskStatus,
    /// Ordering key within `(workspace_id, status)`.
    pub position: f64,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-delete marker. Deleted tasks are invisible to ordering.
    pub deleted_at: Option<Timestamp>,
}

impl Task {
    /// Creates a live task in the given lane at the given position.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        workspace_id: WorkspaceId,
        title: impl Into<String>,
        status: TaskStatus,
        position: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            task_id,
            workspace_id,
            title: title.into(),
            status,
            position,
            created_at: timestamp.clone(),
            updated_at: timestamp,
            deleted_at: None,
        }
    }

    /// Returns `true` unless the task has been soft-deleted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns `true` if the task is live and sits in the given partition.
    #[must_use]
    pub fn is_in_lane(&self, workspace_id: &WorkspaceId, status: TaskStatus) -> bool {
        self.is_live() && &self.workspace_id == workspace_id && self.status == status
    }

    /// Returns a copy placed at a new position and lane.
    #[must_use]
    pub fn placed(self, position: f64, status: TaskStatus, timestamp: Timestamp) -> Self {
        Self {
            position,
            status,
            updated_at: timestamp,
            ..self
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("todo", TaskStatus::Todo)]
    #[case("TODO", TaskStatus::Todo)]
    #[case("in_progress", TaskStatus::InProgress)]
    #[case("IN-PROGRESS", TaskStatus::InProgress)]
    #[case(" done ", TaskStatus::Done)]
    #[case("Cancelled", TaskStatus::Cancelled)]
    fn test_status_from_str(#[case] input: &str, #[case] expected: TaskStatus) {
        assert_eq!(input.parse::<TaskStatus>(), Ok(expected));
    }

    #[rstest]
    #[case("archived")]
    #[case("")]
    #[case("in progress")]
    fn test_status_from_str_rejects_unknown(#[case] input: &str) {
        let error = input.parse::<TaskStatus>().unwrap_err();
        assert_eq!(error, UnknownLane(input.to_string()));
    }

    #[rstest]
    fn test_status_as_str_matches_serde() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[rstest]
    fn test_is_in_lane_excludes_deleted_and_foreign() {
        let workspace_id = WorkspaceId::generate();
        let task = Task::new(
            TaskId::generate(),
            workspace_id.clone(),
            "Write docs",
            TaskStatus::Todo,
            1000.0,
            Timestamp::now(),
        );

        assert!(task.is_in_lane(&workspace_id, TaskStatus::Todo));
        assert!(!task.is_in_lane(&workspace_id, TaskStatus::Done));
        assert!(!task.is_in_lane(&WorkspaceId::generate(), TaskStatus::Todo));

        let deleted = Task {
            deleted_at: Some(Timestamp::now()),
            ..task
        };
        assert!(!deleted.is_in_lane(&workspace_id, TaskStatus::Todo));
    }

    #[rstest]
    fn test_placed_updates_position_and_lane_only() {
        let task = Task::new(
            TaskId::generate(),
            WorkspaceId::generate(),
            "Ship it",
            TaskStatus::Todo,
            1000.0,
            Timestamp::now(),
        );
        let original_id = task.task_id.clone();

        let moved = task.placed(1500.0, TaskStatus::Done, Timestamp::now());

        assert_eq!(moved.task_id, original_id);
        assert_eq!(moved.status, TaskStatus::Done);
        assert!((moved.position - 1500.0).abs() < f64::EPSILON);
        assert_eq!(moved.title, "Ship it");
    }
}
