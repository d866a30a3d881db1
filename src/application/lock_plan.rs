//! Canonical lock acquisition order.
//!
//! Every locker in the crate acquires rows in ascending [`TaskId`] order, so two
//! transactions that share rows always queue on the smallest shared id first
//! and can never wait on each other in a cycle. A lane's seed lock ranks below
//! every row.
//!
//! A move only learns some of the rows it must hold (the rows bounding its
//! insertion gap) after it has locked others. [`HeldLocks`] tracks what a
//! transaction holds so it waits only on ids above everything it already
//! has; anything else is taken without waiting or becomes part of a wider
//! [`LockPlan`] for the next attempt.

use std::collections::HashSet;

use crate::domain::TaskId;

/// What a locked row is to the move being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRole {
    /// The task being moved.
    Target,
    /// The task it will sit directly before.
    Before,
    /// The task it will sit directly after.
    After,
    /// A row that bounded the insertion gap on an earlier attempt.
    Bound,
}

/// One lock to acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStep {
    /// Row to lock.
    pub task_id: TaskId,
    /// Role of that row in the move.
    pub role: LockRole,
}

/// Ordered lock acquisition plan for a single move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPlan {
    lane_seed: bool,
    steps: Vec<LockStep>,
}

impl LockPlan {
    /// Builds the plan for a target and its optional anchors.
    ///
    /// Anchors equal to the target or to each other must be rejected by the
    /// caller beforehand; they would otherwise be locked twice.
    #[must_use]
    pub fn new(target: &TaskId, before: Option<&TaskId>, after: Option<&TaskId>) -> Self {
        let mut steps = vec![LockStep {
            task_id: target.clone(),
            role: LockRole::Target,
        }];
        steps.extend(before.map(|task_id| LockStep {
            task_id: task_id.clone(),
            role: LockRole::Before,
        }));
        steps.extend(after.map(|task_id| LockStep {
            task_id: task_id.clone(),
            role: LockRole::After,
        }));
        steps.sort_by(|left, right| left.task_id.cmp(&right.task_id));

        Self {
            lane_seed: false,
            steps,
        }
    }

    /// Adds gap-bounding rows. Rows already in the plan keep their role.
    #[must_use]
    pub fn with_bounds<'a>(mut self, bounds: impl IntoIterator<Item = &'a TaskId>) -> Self {
        for task_id in bounds {
            if !self.contains(task_id) {
                self.steps.push(LockStep {
                    task_id: task_id.clone(),
                    role: LockRole::Bound,
                });
            }
        }
        self.steps
            .sort_by(|left, right| left.task_id.cmp(&right.task_id));
        self
    }

    /// Takes the destination lane's seed lock before any row.
    #[must_use]
    pub const fn with_lane_seed(mut self) -> Self {
        self.lane_seed = true;
        self
    }

    /// Whether the lane seed lock is taken first.
    #[must_use]
    pub const fn locks_lane_seed(&self) -> bool {
        self.lane_seed
    }

    /// Whether `task_id` is already planned.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.steps.iter().any(|step| &step.task_id == task_id)
    }

    /// Row steps in acquisition order.
    #[must_use]
    pub fn steps(&self) -> &[LockStep] {
        &self.steps
    }
}

/// Locks a transaction holds, as far as ordering is concerned.
#[derive(Debug, Clone, Default)]
pub struct HeldLocks {
    rows: HashSet<TaskId>,
    highest: Option<TaskId>,
    lane_seed: bool,
}

impl HeldLocks {
    /// Records an acquisition attempt on `task_id`, whether or not a row was
    /// returned. Some backends keep the lock even when the row is filtered out.
    pub fn attempted(&mut self, task_id: &TaskId) {
        if self.may_wait_for(task_id) {
            self.highest = Some(task_id.clone());
        }
    }

    /// Records a row lock that returned the row.
    pub fn locked(&mut self, task_id: &TaskId) {
        self.attempted(task_id);
        self.rows.insert(task_id.clone());
    }

    /// Records the lane seed lock.
    pub const fn seeded(&mut self) {
        self.lane_seed = true;
    }

    /// Whether the row is known to be locked.
    #[must_use]
    pub fn holds(&self, task_id: &TaskId) -> bool {
        self.rows.contains(task_id)
    }

    /// Whether the lane seed lock is held.
    #[must_use]
    pub const fn holds_lane_seed(&self) -> bool {
        self.lane_seed
    }

    /// Whether blocking on `task_id` keeps the ascending order.
    #[must_use]
    pub fn may_wait_for(&self, task_id: &TaskId) -> bool {
        self.highest
            .as_ref()
            .is_none_or(|highest| task_id > highest)
    }
}
