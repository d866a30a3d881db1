//! Repository traits for board ordering.
//!
//! The traits return `Send` futures so that a coordinator generic over them can
//! be driven from any tokio worker. Locking operations live on
//! [`LockingTransaction`], which is obtained from [`TaskStore::begin`]; every
//! lock taken through it is held until `commit`, `rollback`, or drop.

use std::future::Future;

use thiserror::Error;

use crate::domain::{ActorId, AuditEntry, Role, Task, TaskId, TaskStatus, WorkspaceId};

// =============================================================================
// Repository Error
// =============================================================================

/// Errors that can occur during repository operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Entity was not found in the requested scope.
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// A row lock could not be acquired within the configured timeout.
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Task Store
// =============================================================================

/// Direction used when looking for the nearest key around a pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest key strictly greater than the pivot.
    Above,
    /// Largest key strictly smaller than the pivot.
    Below,
}

/// The nearest live row on one side of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacent {
    /// Row found.
    pub task_id: TaskId,
    /// Its key at the time of the read.
    pub position: f64,
}

/// An open transaction that can take exclusive row locks.
///
/// Implementations must release every lock when the value is dropped without
/// being committed, which also discards its writes.
pub trait LockingTransaction: Send + Sized {
    /// Locks a live task of the workspace, in whatever lane it currently is.
    ///
    /// # Errors
    ///
    /// `RepositoryError::NotFound` if the task does not exist, belongs to
    /// another workspace or is soft-deleted.
    fn lock_target(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Task, RepositoryError>> + Send;

    /// Locks a live task that must currently sit in `lane`.
    ///
    /// # Errors
    ///
    /// `RepositoryError::NotFound` if the task is not in that exact
    /// workspace and lane.
    fn lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Task, RepositoryError>> + Send;

    /// Locks a live task of `lane` only if no other transaction holds it.
    ///
    /// Never waits. Returns `None` when the row is held elsewhere or is no
    /// longer in the lane; the two are not distinguished.
    fn try_lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Option<Task>, RepositoryError>> + Send;

    /// Locks every live task of a lane, in ascending id order.
    fn lock_lane(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    /// Takes the insertion lock of a lane.
    ///
    /// Rows are the only thing a move into a non-empty lane needs to lock.
    /// An empty lane has no rows, so moves into it serialize on this lock
    /// instead. It ranks before every row lock in acquisition order.
    fn lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Takes the insertion lock of a lane if it is free. Never waits.
    fn try_lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Nearest live row of the lane strictly above or below `pivot`,
    /// ignoring `exclude`. Among rows sharing that key, the one nearest to
    /// `pivot` in `(position, id)` order wins.
    ///
    /// Reads committed state without locking; the caller locks the returned
    /// row and reads again to confirm it is still adjacent.
    fn adjacent_task(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        pivot: f64,
        direction: Direction,
        exclude: &TaskId,
    ) -> impl Future<Output = Result<Option<Adjacent>, RepositoryError>> + Send;

    /// Writes a new position and lane onto a task.
    ///
    /// # Errors
    ///
    /// `RepositoryError::NotFound` if no live row matched.
    fn persist(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
        position: f64,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Commits the writes and releases the locks.
    fn commit(self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Discards the writes and releases the locks.
    fn rollback(self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Persistence for tasks, specialized for ordering.
pub trait TaskStore: Send + Sync {
    /// Transaction type handed out by [`TaskStore::begin`].
    type Transaction: LockingTransaction;

    /// Opens a transaction with the store's lock-wait timeout applied.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, RepositoryError>> + Send;

    /// Inserts a new task.
    fn insert(&self, task: &Task) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Finds a live task of the workspace. Unlocked.
    fn find_by_id(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Option<Task>, RepositoryError>> + Send;

    /// Lists the live tasks of a lane ordered by `(position, id)`.
    fn list_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    /// Largest key in a lane, or `0` when the lane is empty. Unlocked.
    fn max_position_in_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> impl Future<Output = Result<f64, RepositoryError>> + Send;

    /// Marks a task deleted. Returns `false` if there was no live task.
    fn soft_delete(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

// =============================================================================
// Collaborators
// =============================================================================

/// Errors returned by an [`AuthorizationResolver`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The actor is not a member of the workspace.
    #[error("actor {actor_id} is not a member of workspace {workspace_id}")]
    MemberNotFound {
        /// Actor that was looked up.
        actor_id: ActorId,
        /// Workspace that was searched.
        workspace_id: WorkspaceId,
    },

    /// The lookup itself failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Resolves an actor's role in a workspace. Called on every command.
pub trait AuthorizationResolver: Send + Sync {
    /// Returns the actor's role.
    fn get_role(
        &self,
        actor_id: &ActorId,
        workspace_id: &WorkspaceId,
    ) -> impl Future<Output = Result<Role, AuthorizationError>> + Send;
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Records an action.
    fn log_action(
        &self,
        entry: &AuditEntry,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

// =============================================================================
// Tests
// =============================================================================
