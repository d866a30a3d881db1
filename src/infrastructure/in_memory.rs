//! In-memory repository implementations.
//!
//! These implementations reproduce the locking behavior of the Postgres store
//! so that the coordinator's concurrency guarantees can be exercised without
//! a database.
//!
//! # Locking model
//!
//! - Each task row has its own `tokio::sync::Mutex`; a transaction holds the
//!   owned guard until commit, rollback or drop. Lane seed locks live in the
//!   same table.
//! - Lock table entries that nobody holds or waits on are pruned when a
//!   transaction releases its guards.
//! - Writes are staged in the transaction and applied to the shared map
//!   before the guards are released, so a waiter always reads the committed
//!   state once it acquires the row.
//! - Lock waits are bounded by the store's lock timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{ActorId, AuditEntry, Role, Task, TaskId, TaskStatus, Timestamp, WorkspaceId};
use crate::infrastructure::{
    Adjacent, AuditSink, AuthorizationError, AuthorizationResolver, Direction, LockingTransaction,
    RepositoryError, TaskStore,
};

/// Lock wait bound used by [`InMemoryTaskStore::new`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Shared State
// =============================================================================

/// Something a transaction can hold exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Seed(WorkspaceId, TaskStatus),
    Row(TaskId),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed(workspace_id, lane) => {
                write!(formatter, "seed of {}", lane_scope(workspace_id, *lane))
            }
            Self::Row(task_id) => write!(formatter, "task {task_id}"),
        }
    }
}

#[derive(Debug, Default)]
struct SharedTasks {
    rows: RwLock<HashMap<TaskId, Task>>,
    lock_table: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl SharedTasks {
    async fn lock_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut lock_table = self.lock_table.lock().await;
        Arc::clone(lock_table.entry(key.clone()).or_default())
    }

    /// Drops entries whose only reference is the table itself.
    ///
    /// Guards and waiters keep their own clone of the `Arc`, so an entry at
    /// a strong count of one is neither held nor awaited.
    fn prune(&self) {
        // Skipped under contention; the next release prunes the same entries.
        if let Ok(mut lock_table) = self.lock_table.try_lock() {
            lock_table.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }
}

fn lane_scope(workspace_id: &WorkspaceId, lane: TaskStatus) -> String {
    format!("lane {} of workspace {workspace_id}", lane.as_str())
}

// =============================================================================
// In-Memory Task Store
// =============================================================================

/// In-memory implementation of [`TaskStore`].
///
/// Cloning shares the underlying rows and row locks.
///
/// # Example
///
/// ```ignore
/// let store = InMemoryTaskStore::new();
/// store.insert(&task).await?;
///
/// let mut transaction = store.begin().await?;
/// let locked = transaction.lock_target(&task.workspace_id, &task.task_id).await?;
/// transaction.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryTaskStore {
    shared: Arc<SharedTasks>,
    lock_timeout: Duration,
}

impl InMemoryTaskStore {
    /// Creates an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an empty store whose transactions give up on a lock after
    /// `lock_timeout`.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(SharedTasks::default()),
            lock_timeout,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for InMemoryTaskStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, RepositoryError> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            guards: HashMap::new(),
            pending: HashMap::new(),
        })
    }

    async fn insert(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut rows = self.shared.rows.write().await;
        if rows.contains_key(&task.task_id) {
            return Err(RepositoryError::DatabaseError(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        rows.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        let rows = self.shared.rows.read().await;
        Ok(rows
            .get(task_id)
            .filter(|task| task.is_live() && &task.workspace_id == workspace_id)
            .cloned())
    }

    async fn list_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows = self.shared.rows.read().await;
        let mut tasks: Vec<Task> = rows
            .values()
            .filter(|task| task.is_in_lane(workspace_id, lane))
            .cloned()
            .collect();
        drop(rows);

        tasks.sort_by(|left, right| {
            left.position
                .total_cmp(&right.position)
                .then_with(|| left.task_id.cmp(&right.task_id))
        });
        Ok(tasks)
    }

    async fn max_position_in_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<f64, RepositoryError> {
        let rows = self.shared.rows.read().await;
        Ok(rows
            .values()
            .filter(|task| task.is_in_lane(workspace_id, lane))
            .map(|task| task.position)
            .reduce(f64::max)
            .unwrap_or(0.0))
    }

    async fn soft_delete(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<bool, RepositoryError> {
        let mut transaction = self.begin().await?;
        match transaction.lock_target(workspace_id, task_id).await {
            Ok(_) => {}
            Err(RepositoryError::NotFound(_)) => return Ok(false),
            Err(error) => return Err(error),
        }

        let mut rows = self.shared.rows.write().await;
        if let Some(task) = rows.get_mut(task_id) {
            let now = Timestamp::now();
            task.deleted_at = Some(now.clone());
            task.updated_at = now;
        }
        drop(rows);

        transaction.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// In-Memory Transaction
// =============================================================================

/// Transaction over an [`InMemoryTaskStore`].
///
/// Dropping it without calling `commit` discards staged writes and releases
/// all row locks.
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<SharedTasks>,
    lock_timeout: Duration,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
    pending: HashMap<TaskId, (f64, TaskStatus, Timestamp)>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, key: LockKey) -> Result<(), RepositoryError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let lock = self.shared.lock_for(&key).await;
        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| RepositoryError::LockTimeout(key.to_string()))?;

        self.guards.insert(key, guard);
        Ok(())
    }

    async fn acquire_row(&mut self, task_id: &TaskId) -> Result<(), RepositoryError> {
        self.acquire(LockKey::Row(task_id.clone())).await
    }

    /// Like [`Self::acquire`] but gives up at once when the lock is held.
    async fn try_acquire(&mut self, key: LockKey) -> bool {
        if self.guards.contains_key(&key) {
            return true;
        }

        let lock = self.shared.lock_for(&key).await;
        match lock.try_lock_owned() {
            Ok(guard) => {
                self.guards.insert(key, guard);
                true
            }
            Err(_) => false,
        }
    }

    /// Current row as seen by this transaction, staged writes included.
    fn overlay(&self, task: &Task) -> Task {
        match self.pending.get(&task.task_id) {
            Some((position, status, updated_at)) => {
                task.clone().placed(*position, *status, updated_at.clone())
            }
            None => task.clone(),
        }
    }

    async fn current(&self, task_id: &TaskId) -> Option<Task> {
        let rows = self.shared.rows.read().await;
        rows.get(task_id).map(|task| self.overlay(task))
    }

    async fn lane_snapshot(&self, workspace_id: &WorkspaceId, lane: TaskStatus) -> Vec<Task> {
        let rows = self.shared.rows.read().await;
        rows.values()
            .map(|task| self.overlay(task))
            .filter(|task| task.is_in_lane(workspace_id, lane))
            .collect()
    }
}

impl LockingTransaction for InMemoryTransaction {
    async fn lock_target(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<Task, RepositoryError> {
        self.acquire_row(task_id).await?;
        self.current(task_id)
            .await
            .filter(|task| task.is_live() && &task.workspace_id == workspace_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("task {task_id} in workspace {workspace_id}"))
            })
    }

    async fn lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> Result<Task, RepositoryError> {
        self.acquire_row(task_id).await?;
        self.current(task_id)
            .await
            .filter(|task| task.is_in_lane(workspace_id, lane))
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "task {task_id} in {}",
                    lane_scope(workspace_id, lane)
                ))
            })
    }

    async fn try_lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        if !self.try_acquire(LockKey::Row(task_id.clone())).await {
            return Ok(None);
        }
        Ok(self
            .current(task_id)
            .await
            .filter(|task| task.is_in_lane(workspace_id, lane)))
    }

    async fn lock_lane(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<Vec<Task>, RepositoryError> {
        let mut task_ids: Vec<TaskId> = self
            .lane_snapshot(workspace_id, lane)
            .await
            .into_iter()
            .map(|task| task.task_id)
            .collect();
        task_ids.sort();

        let mut locked = Vec::with_capacity(task_ids.len());
        for task_id in &task_ids {
            self.acquire_row(task_id).await?;
            // Rows that left the lane while we waited are skipped.
            if let Some(task) = self.current(task_id).await
                && task.is_in_lane(workspace_id, lane)
            {
                locked.push(task);
            }
        }
        Ok(locked)
    }

    async fn lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<(), RepositoryError> {
        self.acquire(LockKey::Seed(workspace_id.clone(), lane)).await
    }

    async fn try_lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .try_acquire(LockKey::Seed(workspace_id.clone(), lane))
            .await)
    }

    async fn adjacent_task(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        pivot: f64,
        direction: Direction,
        exclude: &TaskId,
    ) -> Result<Option<Adjacent>, RepositoryError> {
        let candidates = self
            .lane_snapshot(workspace_id, lane)
            .await
            .into_iter()
            .filter(|task| &task.task_id != exclude);
        let visual = |left: &Task, right: &Task| {
            left.position
                .total_cmp(&right.position)
                .then_with(|| left.task_id.cmp(&right.task_id))
        };

        let nearest = match direction {
            Direction::Above => candidates
                .filter(|task| task.position > pivot)
                .min_by(visual),
            Direction::Below => candidates
                .filter(|task| task.position < pivot)
                .max_by(visual),
        };
        Ok(nearest.map(|task| Adjacent {
            task_id: task.task_id,
            position: task.position,
        }))
    }

    async fn persist(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
        position: f64,
        lane: TaskStatus,
    ) -> Result<(), RepositoryError> {
        let exists = self
            .current(task_id)
            .await
            .is_some_and(|task| task.is_live() && &task.workspace_id == workspace_id);
        if !exists {
            return Err(RepositoryError::NotFound(format!(
                "task {task_id} in workspace {workspace_id}"
            )));
        }

        self.pending
            .insert(task_id.clone(), (position, lane, Timestamp::now()));
        Ok(())
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        let mut rows = self.shared.rows.write().await;
        for (task_id, (position, lane, updated_at)) in &self.pending {
            if let Some(task) = rows.get_mut(task_id) {
                task.position = *position;
                task.status = *lane;
                task.updated_at = updated_at.clone();
            }
        }
        drop(rows);
        // Guards are released on drop, after the writes are visible.
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), RepositoryError> {
        self.pending.clear();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.guards.clear();
        self.shared.prune();
    }
}

// =============================================================================
// In-Memory Authorization
// =============================================================================

/// Membership table kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuthorizationResolver {
    members: Arc<RwLock<HashMap<(WorkspaceId, ActorId), Role>>>,
}

impl InMemoryAuthorizationResolver {
    /// Creates an empty membership table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants (or replaces) an actor's role in a workspace.
    pub async fn grant(&self, workspace_id: &WorkspaceId, actor_id: &ActorId, role: Role) {
        self.members
            .write()
            .await
            .insert((workspace_id.clone(), actor_id.clone()), role);
    }

    /// Removes an actor from a workspace.
    pub async fn revoke(&self, workspace_id: &WorkspaceId, actor_id: &ActorId) {
        self.members
            .write()
            .await
            .remove(&(workspace_id.clone(), actor_id.clone()));
    }
}

impl AuthorizationResolver for InMemoryAuthorizationResolver {
    async fn get_role(
        &self,
        actor_id: &ActorId,
        workspace_id: &WorkspaceId,
    ) -> Result<Role, AuthorizationError> {
        self.members
            .read()
            .await
            .get(&(workspace_id.clone(), actor_id.clone()))
            .copied()
            .ok_or_else(|| AuthorizationError::MemberNotFound {
                actor_id: actor_id.clone(),
                workspace_id: workspace_id.clone(),
            })
    }
}

// =============================================================================
// In-Memory Audit Sink
// =============================================================================

/// Audit sink that keeps entries in memory.
///
/// Can be switched into a failing mode to exercise the "audit failures are
/// swallowed" path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that rejects every entry.
    #[must_use]
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    /// Toggles the failing mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a copy of the recorded entries, oldest first.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    async fn log_action(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError(
                "audit sink unavailable".to_string(),
            ));
        }
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
