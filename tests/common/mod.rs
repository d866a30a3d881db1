//! Common test helpers for integration tests.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{Board, assert_approx_eq};
//! ```
//!
//! # Note
//!
//! Each integration test file is compiled as its own crate, so helpers used
//! by only some of them would otherwise trigger dead code warnings.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kanban_reorder::application::{MoveRequest, ReorderCoordinator};
use kanban_reorder::domain::{
    ActorId, PositionAllocator, Role, Task, TaskId, TaskStatus, Timestamp, WorkspaceId,
};
use kanban_reorder::infrastructure::{
    InMemoryAuditSink, InMemoryAuthorizationResolver, InMemoryTaskStore, TaskStore,
};

/// Coordinator wired to the in-memory backends.
pub type TestCoordinator =
    ReorderCoordinator<InMemoryTaskStore, InMemoryAuthorizationResolver, InMemoryAuditSink>;

// =============================================================================
// Board Fixture
// =============================================================================

/// A workspace with one member, backed by in-memory storage.
///
/// The store, resolver and sink are clones sharing state with the
/// coordinator, so tests can inspect or manipulate them directly.
pub struct Board {
    pub coordinator: Arc<TestCoordinator>,
    pub store: InMemoryTaskStore,
    pub authorization: InMemoryAuthorizationResolver,
    pub audit: InMemoryAuditSink,
    pub workspace_id: WorkspaceId,
    pub actor_id: ActorId,
}

impl Board {
    /// Creates a board whose actor is a `Member`.
    pub async fn new() -> Self {
        Self::with_store(InMemoryTaskStore::new()).await
    }

    /// Creates a board whose lock waits give up after `lock_timeout`.
    pub async fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self::with_store(InMemoryTaskStore::with_lock_timeout(lock_timeout)).await
    }

    async fn with_store(store: InMemoryTaskStore) -> Self {
        let authorization = InMemoryAuthorizationResolver::new();
        let audit = InMemoryAuditSink::new();
        let workspace_id = WorkspaceId::generate();
        let actor_id = ActorId::generate();
        authorization
            .grant(&workspace_id, &actor_id, Role::Member)
            .await;

        let coordinator = Arc::new(ReorderCoordinator::new(
            store.clone(),
            authorization.clone(),
            audit.clone(),
            PositionAllocator::default(),
        ));

        Self {
            coordinator,
            store,
            authorization,
            audit,
            workspace_id,
            actor_id,
        }
    }

    /// Inserts a task directly at `position`, bypassing the coordinator.
    pub async fn seed(&self, lane: TaskStatus, position: f64) -> Task {
        let task = Task::new(
            TaskId::generate(),
            self.workspace_id.clone(),
            format!("Task at {position}"),
            lane,
            position,
            Timestamp::now(),
        );
        self.store.insert(&task).await.unwrap();
        task
    }

    /// Inserts tasks at each of `positions`, returning them in the same order.
    pub async fn seed_many(&self, lane: TaskStatus, positions: &[f64]) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(positions.len());
        for position in positions {
            tasks.push(self.seed(lane, *position).await);
        }
        tasks
    }

    /// A move request issued by this board's actor.
    pub fn move_request(&self, task_id: &TaskId, lane: &str) -> MoveRequest {
        MoveRequest::new(
            self.workspace_id.clone(),
            task_id.clone(),
            self.actor_id.clone(),
            lane,
        )
    }

    /// Current live tasks of a lane in visual order.
    pub async fn lane(&self, lane: TaskStatus) -> Vec<Task> {
        self.store.list_lane(&self.workspace_id, lane).await.unwrap()
    }

    /// Ids of a lane in visual order.
    pub async fn lane_ids(&self, lane: TaskStatus) -> Vec<TaskId> {
        self.lane(lane)
            .await
            .into_iter()
            .map(|task| task.task_id)
            .collect()
    }

    /// Keys of a lane in visual order.
    pub async fn positions(&self, lane: TaskStatus) -> Vec<f64> {
        self.lane(lane)
            .await
            .into_iter()
            .map(|task| task.position)
            .collect()
    }

    /// Reads a task without locking.
    pub async fn find(&self, task_id: &TaskId) -> Option<Task> {
        self.store
            .find_by_id(&self.workspace_id, task_id)
            .await
            .unwrap()
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Asserts that two floats are within `f64::EPSILON` scaled to their magnitude.
pub fn assert_approx_eq(actual: f64, expected: f64) {
    let tolerance = f64::EPSILON * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}

/// Asserts that keys are strictly increasing.
pub fn assert_strictly_increasing(positions: &[f64]) {
    for pair in positions.windows(2) {
        assert!(
            pair[0] < pair[1],
            "keys are not strictly increasing: {positions:?}"
        );
    }
}
