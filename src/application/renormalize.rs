//! Re-spacing the keys of a lane.
//!
//! Repeated bisection eventually runs out of float precision between two
//! neighbors. Renormalization locks the whole lane, keeps the visual order,
//! and rewrites every key to an evenly spaced value.

use serde::{Deserialize, Serialize};

use crate::domain::{ActorId, AuditEntry, Task, TaskStatus, Timestamp, WorkspaceId};
use crate::infrastructure::{AuditSink, AuthorizationResolver, LockingTransaction, TaskStore};

use super::coordinator::parse_lane;
use super::{ReorderCoordinator, ReorderError};

/// A request to re-space one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenormalizeRequest {
    /// Tenant scope.
    pub workspace_id: WorkspaceId,
    /// Who is asking.
    pub actor_id: ActorId,
    /// Lane name.
    pub status: String,
}

/// The re-spaced lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenormalizeOutcome {
    /// Lane that was rewritten.
    pub lane: TaskStatus,
    /// Its tasks in visual order, with their new keys.
    pub tasks: Vec<Task>,
}

/// Orders tasks visually: by key, then by id for ties.
pub(super) fn visual_order(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        left.position
            .total_cmp(&right.position)
            .then_with(|| left.task_id.cmp(&right.task_id))
    });
}

impl<S, A, U> ReorderCoordinator<S, A, U>
where
    S: TaskStore,
    A: AuthorizationResolver,
    U: AuditSink,
{
    /// Rewrites every key of a lane to `(index + 1) * increment`.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the actor cannot modify the workspace
    /// - `InvalidArgument` for an unknown lane
    /// - `Internal` for storage failures and lock timeouts
    pub async fn renormalize_lane(
        &self,
        request: RenormalizeRequest,
    ) -> Result<RenormalizeOutcome, ReorderError> {
        self.authorize(&request.actor_id, &request.workspace_id).await?;
        let lane = parse_lane(&request.status)?;
        let workspace_id = &request.workspace_id;

        let mut transaction = self
            .store
            .begin()
            .await
            .map_err(|error| ReorderError::storage("begin", workspace_id, None, error))?;

        let tasks = match self.respace(&mut transaction, workspace_id, lane).await {
            Ok(tasks) => tasks,
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!(%workspace_id, error = %rollback_error, "Rollback failed");
                }
                return Err(error);
            }
        };

        transaction
            .commit()
            .await
            .map_err(|error| ReorderError::storage("commit", workspace_id, None, error))?;

        tracing::info!(
            %workspace_id,
            lane = lane.as_str(),
            task_count = tasks.len(),
            "Lane renormalized"
        );

        self.record(AuditEntry::renormalized(
            workspace_id.clone(),
            request.actor_id.clone(),
            lane,
            tasks.len(),
        ))
        .await;

        Ok(RenormalizeOutcome { lane, tasks })
    }

    async fn respace(
        &self,
        transaction: &mut S::Transaction,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<Vec<Task>, ReorderError> {
        let mut tasks = transaction
            .lock_lane(workspace_id, lane)
            .await
            .map_err(|error| ReorderError::storage("lock_lane", workspace_id, None, error))?;
        visual_order(&mut tasks);

        let now = Timestamp::now();
        let mut respaced = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let position = self.allocator.spaced(index);
            transaction
                .persist(workspace_id, &task.task_id, position, lane)
                .await
                .map_err(|error| {
                    ReorderError::storage("persist", workspace_id, Some(&task.task_id), error)
                })?;
            respaced.push(task.placed(position, lane, now.clone()));
        }
        Ok(respaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use rstest::rstest;
    use uuid::Uuid;

    fn task(id: u128, position: f64) -> Task {
        Task::new(
            TaskId::from_uuid(Uuid::from_u128(id)),
            WorkspaceId::generate(),
            "Task",
            TaskStatus::Todo,
            position,
            Timestamp::now(),
        )
    }

    #[rstest]
    fn test_visual_order_breaks_ties_by_id() {
        let mut tasks = vec![task(3, 10.0), task(2, 5.0), task(1, 10.0), task(4, -1.0)];

        visual_order(&mut tasks);

        let order: Vec<u128> = tasks
            .iter()
            .map(|task| task.task_id.as_uuid().as_u128())
            .collect();
        assert_eq!(order, vec![4, 2, 1, 3]);
    }
}
