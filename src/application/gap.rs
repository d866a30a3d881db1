//! Securing the insertion gap of a move.
//!
//! The anchors a caller names are a hint: between the request and the lock,
//! other moves may have landed next to them. The gap a key is allocated in
//! is bounded by the rows that are adjacent *now*, and every one of those
//! rows must be locked by the transaction before the key is chosen. Two moves
//! into the same gap therefore always share a bounding row and serialize on
//! it; the later one reads the earlier one's committed row and narrows its
//! gap past it.
//!
//! A gap with no bounding rows (an empty lane) is guarded by the lane seed
//! lock instead.

use crate::domain::{TaskId, TaskStatus, WorkspaceId};
use crate::infrastructure::{Adjacent, Direction, LockingTransaction, RepositoryError};

use super::lock_plan::HeldLocks;

/// Re-reads allowed within one transaction before giving up on it.
const MAX_GAP_CHECKS: usize = 16;

/// Rows bounding an insertion point. `before` has the larger key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gap {
    /// Row the moved task will sit directly before.
    pub before: Option<Adjacent>,
    /// Row the moved task will sit directly after.
    pub after: Option<Adjacent>,
}

impl Gap {
    /// The pair of keys the allocator consumes.
    pub fn keys(&self) -> (Option<f64>, Option<f64>) {
        (
            self.before.as_ref().map(|row| row.position),
            self.after.as_ref().map(|row| row.position),
        )
    }

    /// Whether no row bounds the gap on either side.
    pub const fn is_open(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }

    fn rows(&self) -> impl Iterator<Item = &TaskId> {
        self.before
            .iter()
            .chain(self.after.iter())
            .map(|row| &row.task_id)
    }
}

/// Result of trying to lock a gap inside the current transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum GapOutcome {
    /// Every bounding row (or the lane seed) is locked.
    Secured(Gap),
    /// A lock could only be taken out of order and is currently held
    /// elsewhere. The transaction must be abandoned and retried with these
    /// locks planned up front.
    Restart {
        /// Rows to add to the lock plan.
        bounds: Vec<TaskId>,
        /// Whether the lane seed lock must be planned.
        lane_seed: bool,
    },
}

/// The gap the anchors currently describe, from committed state.
///
/// The supplied anchors are already locked. With both anchors, the row just
/// above `after` replaces `before` when it sits strictly below it. With one
/// anchor, the row next to it on the open side closes the gap. With none,
/// the lane's tail becomes `after`.
pub async fn find_gap<T: LockingTransaction>(
    transaction: &mut T,
    workspace_id: &WorkspaceId,
    lane: TaskStatus,
    target: &TaskId,
    anchors: &Gap,
) -> Result<Gap, RepositoryError> {
    match (&anchors.before, &anchors.after) {
        (Some(before), Some(after)) => {
            let nearest = transaction
                .adjacent_task(workspace_id, lane, after.position, Direction::Above, target)
                .await?
                .filter(|row| row.position < before.position);
            Ok(Gap {
                before: Some(nearest.unwrap_or_else(|| before.clone())),
                after: Some(after.clone()),
            })
        }
        (Some(before), None) => {
            let below = transaction
                .adjacent_task(workspace_id, lane, before.position, Direction::Below, target)
                .await?;
            Ok(Gap {
                before: Some(before.clone()),
                after: below,
            })
        }
        (None, Some(after)) => {
            let above = transaction
                .adjacent_task(workspace_id, lane, after.position, Direction::Above, target)
                .await?;
            Ok(Gap {
                before: above,
                after: Some(after.clone()),
            })
        }
        (None, None) => {
            let tail = transaction
                .adjacent_task(workspace_id, lane, f64::INFINITY, Direction::Below, target)
                .await?;
            Ok(Gap {
                before: None,
                after: tail,
            })
        }
    }
}

/// Locks every row bounding the gap, re-reading after each acquisition
/// until the gap is stable.
///
/// Rows above everything already held are waited for. Rows below are only
/// taken if free; otherwise the caller restarts with a wider plan.
///
/// # Errors
///
/// Lock timeouts and storage failures from the transaction.
pub async fn secure_gap<T: LockingTransaction>(
    transaction: &mut T,
    workspace_id: &WorkspaceId,
    lane: TaskStatus,
    target: &TaskId,
    anchors: &Gap,
    held: &mut HeldLocks,
) -> Result<GapOutcome, RepositoryError> {
    for _ in 0..MAX_GAP_CHECKS {
        let gap = find_gap(transaction, workspace_id, lane, target, anchors).await?;

        let mut missing: Vec<TaskId> = gap
            .rows()
            .filter(|task_id| !held.holds(task_id))
            .cloned()
            .collect();

        if missing.is_empty() {
            if !gap.is_open() || held.holds_lane_seed() {
                return Ok(GapOutcome::Secured(gap));
            }
            if !transaction.try_lock_lane_seed(workspace_id, lane).await? {
                return Ok(GapOutcome::Restart {
                    bounds: Vec::new(),
                    lane_seed: true,
                });
            }
            held.seeded();
            continue;
        }

        missing.sort();
        for task_id in missing {
            if held.may_wait_for(&task_id) {
                held.attempted(&task_id);
                match transaction.lock_neighbor(workspace_id, lane, &task_id).await {
                    Ok(_) => held.locked(&task_id),
                    // Left the lane; the next read finds its replacement.
                    Err(RepositoryError::NotFound(_)) => {}
                    Err(error) => return Err(error),
                }
            } else if transaction
                .try_lock_neighbor(workspace_id, lane, &task_id)
                .await?
                .is_some()
            {
                held.locked(&task_id);
            } else {
                return Ok(GapOutcome::Restart {
                    bounds: vec![task_id],
                    lane_seed: false,
                });
            }
        }
    }

    tracing::debug!(%workspace_id, %target, "Insertion gap kept moving");
    Ok(GapOutcome::Restart {
        bounds: Vec::new(),
        lane_seed: held.holds_lane_seed(),
    })
}

// =============================================================================
// Tests
// =============================================================================
