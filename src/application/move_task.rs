//! Moving a task within or across lanes.
//!
//! A move runs in a single transaction: the target and the supplied anchors
//! are locked in [`LockPlan`] order, the rows currently bounding the
//! insertion gap are locked as well, a key is allocated between them, and the
//! task is written back with its new key and lane. Any failure before commit
//! rolls the transaction back. When a bounding row can only be locked out of
//! order and is busy, the attempt is rolled back and retried with that row in
//! the plan.

use serde::{Deserialize, Serialize};

use crate::domain::{ActorId, AuditEntry, Task, TaskId, TaskStatus, Timestamp, WorkspaceId};
use crate::infrastructure::{
    Adjacent, AuditSink, AuthorizationResolver, LockingTransaction, RepositoryError, TaskStore,
};

use super::coordinator::parse_lane;
use super::gap::{Gap, GapOutcome, secure_gap};
use super::lock_plan::{HeldLocks, LockPlan, LockRole};
use super::{ReorderCoordinator, ReorderError};

/// A request to place a task in a lane relative to its neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Tenant scope.
    pub workspace_id: WorkspaceId,
    /// Task being moved.
    pub task_id: TaskId,
    /// Who is moving it.
    pub actor_id: ActorId,
    /// Destination lane name.
    pub to_status: String,
    /// Task the moved task will sit directly before.
    pub before_task_id: Option<TaskId>,
    /// Task the moved task will sit directly after.
    pub after_task_id: Option<TaskId>,
}

impl MoveRequest {
    /// A move to the tail of `to_status` with no anchors.
    pub fn new(
        workspace_id: WorkspaceId,
        task_id: TaskId,
        actor_id: ActorId,
        to_status: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            task_id,
            actor_id,
            to_status: to_status.into(),
            before_task_id: None,
            after_task_id: None,
        }
    }

    /// Places the task directly before `task_id`.
    #[must_use]
    pub fn before(mut self, task_id: TaskId) -> Self {
        self.before_task_id = Some(task_id);
        self
    }

    /// Places the task directly after `task_id`.
    #[must_use]
    pub fn after(mut self, task_id: TaskId) -> Self {
        self.after_task_id = Some(task_id);
        self
    }

    fn validate_anchors(&self) -> Result<(), ReorderError> {
        let before = self.before_task_id.as_ref();
        let after = self.after_task_id.as_ref();

        if before == Some(&self.task_id) || after == Some(&self.task_id) {
            return Err(ReorderError::self_anchor(&self.task_id));
        }
        if let (Some(before), Some(after)) = (before, after)
            && before == after
        {
            return Err(ReorderError::InvalidArgument(format!(
                "task {before} cannot be both the before and the after anchor"
            )));
        }
        Ok(())
    }
}

/// The committed result of a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOutcome {
    /// The task as read back after commit.
    pub task: Task,
    /// Set when the neighbors were too close for a safe bisection. The move
    /// still committed; the lane should be renormalized.
    pub precision_exhausted: bool,
}

/// What was decided inside the transaction.
struct Placement {
    from_lane: TaskStatus,
    placed: Task,
    precision_exhausted: bool,
}

/// Transactions a single move may open before giving up.
const MAX_MOVE_ATTEMPTS: usize = 8;

/// What one transaction attempt produced.
enum Attempt {
    Placed(Placement),
    /// The gap needs locks this attempt could not take in order.
    Retry(LockPlan),
}

impl<S, A, U> ReorderCoordinator<S, A, U>
where
    S: TaskStore,
    A: AuthorizationResolver,
    U: AuditSink,
{
    /// Moves a task into `to_status`, between the given anchors.
    ///
    /// Dropping the returned future before it completes rolls the transaction
    /// back and releases every lock it held.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the actor cannot modify the workspace
    /// - `InvalidArgument` for an unknown lane or inconsistent anchors
    /// - `NotFound` when the target or an anchor is not in scope
    /// - `Internal` for storage failures and lock timeouts
    pub async fn move_task(&self, request: MoveRequest) -> Result<MoveOutcome, ReorderError> {
        self.authorize(&request.actor_id, &request.workspace_id).await?;
        let lane = parse_lane(&request.to_status)?;
        request.validate_anchors()?;

        let workspace_id = &request.workspace_id;
        let task_id = &request.task_id;
        let mut plan = LockPlan::new(
            task_id,
            request.before_task_id.as_ref(),
            request.after_task_id.as_ref(),
        );

        for attempt in 1..=MAX_MOVE_ATTEMPTS {
            let mut transaction = self.store.begin().await.map_err(|error| {
                ReorderError::storage("begin", workspace_id, Some(task_id), error)
            })?;

            match self.place(&mut transaction, &request, lane, &plan).await {
                Ok(Attempt::Placed(placement)) => {
                    transaction.commit().await.map_err(|error| {
                        ReorderError::storage("commit", workspace_id, Some(task_id), error)
                    })?;
                    return self.finish(&request, lane, placement).await;
                }
                Ok(Attempt::Retry(wider)) => {
                    abandon(transaction, workspace_id, task_id).await;
                    tracing::debug!(
                        %workspace_id,
                        %task_id,
                        attempt,
                        "Insertion gap needs out-of-order locks, retrying"
                    );
                    plan = wider;
                }
                Err(error) => {
                    abandon(transaction, workspace_id, task_id).await;
                    return Err(error);
                }
            }
        }

        tracing::error!(
            %workspace_id,
            %task_id,
            attempts = MAX_MOVE_ATTEMPTS,
            "Insertion gap never settled"
        );
        Err(ReorderError::Internal {
            step: "gap",
            detail: format!("insertion gap did not settle after {MAX_MOVE_ATTEMPTS} attempts"),
        })
    }

    async fn finish(
        &self,
        request: &MoveRequest,
        lane: TaskStatus,
        placement: Placement,
    ) -> Result<MoveOutcome, ReorderError> {
        let workspace_id = &request.workspace_id;
        let task_id = &request.task_id;

        tracing::info!(
            %workspace_id,
            %task_id,
            from_lane = placement.from_lane.as_str(),
            to_lane = lane.as_str(),
            position = placement.placed.position,
            "Task moved"
        );

        self.record(AuditEntry::moved(
            workspace_id.clone(),
            request.actor_id.clone(),
            task_id,
            placement.from_lane,
            lane,
            placement.placed.position,
        ))
        .await;

        let task = self
            .store
            .find_by_id(workspace_id, task_id)
            .await
            .map_err(|error| ReorderError::storage("refetch", workspace_id, Some(task_id), error))?
            .unwrap_or_else(|| {
                tracing::debug!(%workspace_id, %task_id, "Task vanished after commit");
                placement.placed
            });

        Ok(MoveOutcome {
            task,
            precision_exhausted: placement.precision_exhausted,
        })
    }

    async fn place(
        &self,
        transaction: &mut S::Transaction,
        request: &MoveRequest,
        lane: TaskStatus,
        plan: &LockPlan,
    ) -> Result<Attempt, ReorderError> {
        let workspace_id = &request.workspace_id;
        let lock_failed = |task_id: &TaskId, error| {
            ReorderError::storage("lock", workspace_id, Some(task_id), error)
        };

        let mut held = HeldLocks::default();
        if plan.locks_lane_seed() {
            transaction
                .lock_lane_seed(workspace_id, lane)
                .await
                .map_err(|error| lock_failed(&request.task_id, error))?;
            held.seeded();
        }

        let mut target = None;
        let mut anchors = Gap::default();
        for step in plan.steps() {
            held.attempted(&step.task_id);
            let locked = match step.role {
                LockRole::Target => transaction.lock_target(workspace_id, &step.task_id).await,
                LockRole::Before | LockRole::After | LockRole::Bound => {
                    transaction
                        .lock_neighbor(workspace_id, lane, &step.task_id)
                        .await
                }
            };

            let locked = match (step.role, locked) {
                (_, Ok(locked)) => locked,
                // A bound from an earlier attempt may have left the lane.
                (LockRole::Bound, Err(RepositoryError::NotFound(_))) => continue,
                (_, Err(error)) => return Err(lock_failed(&step.task_id, error)),
            };
            held.locked(&step.task_id);

            let row = Adjacent {
                task_id: locked.task_id.clone(),
                position: locked.position,
            };
            match step.role {
                LockRole::Target => target = Some(locked),
                LockRole::Before => anchors.before = Some(row),
                LockRole::After => anchors.after = Some(row),
                LockRole::Bound => {}
            }
        }

        let Some(target) = target else {
            return Err(ReorderError::Internal {
                step: "lock",
                detail: "lock plan did not include the target".to_string(),
            });
        };
        check_anchor_order(&anchors)?;

        let outcome = secure_gap(
            transaction,
            workspace_id,
            lane,
            &target.task_id,
            &anchors,
            &mut held,
        )
        .await
        .map_err(|error| ReorderError::storage("gap", workspace_id, Some(&target.task_id), error))?;

        let gap = match outcome {
            GapOutcome::Secured(gap) => gap,
            GapOutcome::Restart { bounds, lane_seed } => {
                let wider = plan.clone().with_bounds(&bounds);
                let wider = if lane_seed { wider.with_lane_seed() } else { wider };
                return Ok(Attempt::Retry(wider));
            }
        };

        let (before, after) = gap.keys();
        let allocation = self.allocator.allocate(before, after);
        if allocation.precision_exhausted {
            tracing::warn!(
                %workspace_id,
                task_id = %target.task_id,
                lane = lane.as_str(),
                ?before,
                ?after,
                position = allocation.position,
                "Position precision exhausted, lane needs renormalization"
            );
        }

        transaction
            .persist(workspace_id, &target.task_id, allocation.position, lane)
            .await
            .map_err(|error| {
                ReorderError::storage("persist", workspace_id, Some(&target.task_id), error)
            })?;

        Ok(Attempt::Placed(Placement {
            from_lane: target.status,
            placed: target.placed(allocation.position, lane, Timestamp::now()),
            precision_exhausted: allocation.precision_exhausted,
        }))
    }
}

/// Rejects anchors whose locked keys contradict the requested order.
fn check_anchor_order(anchors: &Gap) -> Result<(), ReorderError> {
    if let (Some(before), Some(after)) = (&anchors.before, &anchors.after)
        && after.position >= before.position
    {
        return Err(ReorderError::InvalidArgument(format!(
            "task {} (position {}) does not sit below task {} (position {}); \
             renormalize the lane if they share a position",
            after.task_id, after.position, before.task_id, before.position
        )));
    }
    Ok(())
}

/// Rolls back a transaction whose result is being discarded.
async fn abandon<T: LockingTransaction>(
    transaction: T,
    workspace_id: &WorkspaceId,
    task_id: &TaskId,
) {
    if let Err(rollback_error) = transaction.rollback().await {
        tracing::warn!(
            %workspace_id,
            %task_id,
            error = %rollback_error,
            "Rollback failed"
        );
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
    fn test_validate_anchors_rejects_self_reference() {
        let task_id = TaskId::generate();
        let request = MoveRequest::new(
            WorkspaceId::generate(),
            task_id.clone(),
            ActorId::generate(),
            "todo",
        )
        .before(task_id);

        let error = request.validate_anchors().unwrap_err();
        assert!(matches!(error, ReorderError::InvalidArgument(_)));
    }

    #[rstest]
    fn test_validate_anchors_rejects_identical_anchors() {
        let anchor = TaskId::generate();
        let request = MoveRequest::new(
            WorkspaceId::generate(),
            TaskId::generate(),
            ActorId::generate(),
            "todo",
        )
        .before(anchor.clone())
        .after(anchor);

        assert!(request.validate_anchors().is_err());
    }

    #[rstest]
    #[case(1000.0, 2000.0, true)]
    #[case(2000.0, 1000.0, false)]
    #[case(1500.0, 1500.0, false)]
    fn test_check_anchor_order(#[case] after: f64, #[case] before: f64, #[case] valid: bool) {
        let anchors = Gap {
            before: Some(Adjacent {
                task_id: TaskId::generate(),
                position: before,
            }),
            after: Some(Adjacent {
                task_id: TaskId::generate(),
                position: after,
            }),
        };

        let result = check_anchor_order(&anchors);

        if valid {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(ReorderError::InvalidArgument(_))));
        }
    }

    #[rstest]
    fn test_single_anchor_is_always_ordered() {
        let anchors = Gap {
            before: None,
            after: Some(Adjacent {
                task_id: TaskId::generate(),
                position: 1000.0,
            }),
        };
        assert!(check_anchor_order(&anchors).is_ok());
    }
}
