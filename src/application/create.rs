//! Creating a task at the tail of a lane.

use serde::{Deserialize, Serialize};

use crate::domain::{ActorId, AuditEntry, Task, TaskId, Timestamp, WorkspaceId};
use crate::infrastructure::{AuditSink, AuthorizationResolver, TaskStore};

use super::coordinator::parse_lane;
use super::{ReorderCoordinator, ReorderError};

/// A request to add a task to a lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    /// Tenant scope.
    pub workspace_id: WorkspaceId,
    /// Who is creating it.
    pub actor_id: ActorId,
    /// Task title. Must not be blank.
    pub title: String,
    /// Initial lane name.
    pub status: String,
}

impl<S, A, U> ReorderCoordinator<S, A, U>
where
    S: TaskStore,
    A: AuthorizationResolver,
    U: AuditSink,
{
    /// Creates a task after the current last task of its lane.
    ///
    /// The lane maximum is read without locking; two concurrent creations
    /// may receive the same key and are then ordered by id.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the actor cannot modify the workspace
    /// - `InvalidArgument` for a blank title or an unknown lane
    /// - `Internal` for storage failures
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<Task, ReorderError> {
        self.authorize(&request.actor_id, &request.workspace_id).await?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(ReorderError::InvalidArgument(
                "title must not be empty".to_string(),
            ));
        }
        let lane = parse_lane(&request.status)?;
        let workspace_id = &request.workspace_id;

        let max_position = self
            .store
            .max_position_in_lane(workspace_id, lane)
            .await
            .map_err(|error| ReorderError::storage("max_position", workspace_id, None, error))?;

        let task = Task::new(
            TaskId::generate(),
            workspace_id.clone(),
            title,
            lane,
            self.allocator.append_after(max_position),
            Timestamp::now(),
        );

        self.store.insert(&task).await.map_err(|error| {
            ReorderError::storage("insert", workspace_id, Some(&task.task_id), error)
        })?;

        tracing::info!(
            %workspace_id,
            task_id = %task.task_id,
            lane = lane.as_str(),
            position = task.position,
            "Task created"
        );

        self.record(AuditEntry::created(
            workspace_id.clone(),
            request.actor_id.clone(),
            &task.task_id,
            lane,
            task.position,
        ))
        .await;

        Ok(task)
    }
}
