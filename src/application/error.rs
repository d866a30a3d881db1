//! Errors returned by the coordinator.
//!
//! Storage details never leave this layer: anything that is not a missing
//! row is logged with its context and surfaced as a generic
//! [`ReorderError::Internal`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ActorId, TaskId, UnknownLane, WorkspaceId};
use crate::infrastructure::{AuthorizationError, RepositoryError};

/// Coarse error category for callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Actor may not modify the workspace.
    Unauthorized,
    /// Target or anchor missing in the requested scope.
    NotFound,
    /// Malformed request.
    InvalidArgument,
    /// Storage failure or lock timeout.
    Internal,
}

impl ErrorKind {
    /// Stable code for programmatic handling.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Errors from [`ReorderCoordinator`](super::ReorderCoordinator) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReorderError {
    /// No membership, or a role without the modify capability.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A row was missing, deleted, foreign, or outside the destination lane.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request itself is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage failed. The detail is logged, not displayed.
    #[error("An internal error occurred")]
    Internal {
        /// Operation step that failed.
        step: &'static str,
        /// Underlying error, for logs and tests.
        detail: String,
    },
}

impl ReorderError {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn forbidden(actor_id: &ActorId, workspace_id: &WorkspaceId) -> Self {
        Self::Unauthorized(format!(
            "actor {actor_id} may not modify workspace {workspace_id}"
        ))
    }

    pub(crate) fn self_anchor(task_id: &TaskId) -> Self {
        Self::InvalidArgument(format!("task {task_id} cannot be placed relative to itself"))
    }

    /// Maps a storage error raised during `step`, logging anything that is
    /// not a plain missing row.
    pub(crate) fn storage(
        step: &'static str,
        workspace_id: &WorkspaceId,
        task_id: Option<&TaskId>,
        error: RepositoryError,
    ) -> Self {
        match error {
            RepositoryError::NotFound(message) => {
                tracing::debug!(%workspace_id, ?task_id, step, %message, "Row not found");
                Self::NotFound(message)
            }
            other => {
                tracing::error!(
                    %workspace_id,
                    ?task_id,
                    step,
                    error = %other,
                    "Storage failure"
                );
                Self::Internal {
                    step,
                    detail: other.to_string(),
                }
            }
        }
    }
}

impl From<UnknownLane> for ReorderError {
    fn from(error: UnknownLane) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

impl From<AuthorizationError> for ReorderError {
    fn from(error: AuthorizationError) -> Self {
        match error {
            AuthorizationError::MemberNotFound { .. } => Self::Unauthorized(error.to_string()),
            AuthorizationError::Repository(repository_error) => {
                tracing::error!(error = %repository_error, step = "authorize", "Role lookup failed");
                Self::Internal {
                    step: "authorize",
                    detail: repository_error.to_string(),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
