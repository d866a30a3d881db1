//! `PostgreSQL` repository implementations.
//!
//! This module provides `PostgreSQL`-based implementations of the store and
//! collaborator traits using `sqlx`. Row locks are real `SELECT ... FOR UPDATE`
//! locks held by a `sqlx::Transaction`, so they are released by commit,
//! rollback, or by dropping the transaction.
//!
//! # Table Schema
//!
//! ```sql
//! CREATE TABLE tasks (
//!     id UUID PRIMARY KEY,
//!     workspace_id UUID NOT NULL,
//!     title TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     position DOUBLE PRECISION NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     deleted_at TIMESTAMPTZ
//! );
//! CREATE INDEX idx_tasks_lane_position
//!     ON tasks (workspace_id, status, position) WHERE deleted_at IS NULL;
//!
//! CREATE TABLE workspace_members (
//!     workspace_id UUID NOT NULL,
//!     user_id UUID NOT NULL,
//!     role TEXT NOT NULL,
//!     PRIMARY KEY (workspace_id, user_id)
//! );
//!
//! CREATE TABLE audit_logs (
//!     id UUID PRIMARY KEY,
//!     workspace_id UUID NOT NULL,
//!     actor_id UUID NOT NULL,
//!     action TEXT NOT NULL,
//!     resource_type TEXT NOT NULL,
//!     resource_id UUID NOT NULL,
//!     metadata JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, Transaction};
use uuid::Uuid;

use crate::config::ReorderConfig;
use crate::domain::{ActorId, AuditEntry, Role, Task, TaskId, TaskStatus, Timestamp, WorkspaceId};
use crate::infrastructure::{
    Adjacent, AuditSink, AuthorizationError, AuthorizationResolver, Direction, LockingTransaction,
    RepositoryError, TaskStore,
};

/// `SQLSTATE` raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// `SQLSTATE` raised when Postgres breaks a deadlock.
const DEADLOCK_DETECTED: &str = "40P01";

const TASK_COLUMNS: &str =
    "id, workspace_id, title, status, position, created_at, updated_at, deleted_at";

/// Idempotent schema statements, applied in order by [`ensure_schema`].
pub const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS tasks (\
         id UUID PRIMARY KEY, \
         workspace_id UUID NOT NULL, \
         title TEXT NOT NULL, \
         status TEXT NOT NULL CHECK (status IN ('todo', 'in_progress', 'done', 'cancelled')), \
         position DOUBLE PRECISION NOT NULL, \
         created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
         updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
         deleted_at TIMESTAMPTZ)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_lane_position \
         ON tasks (workspace_id, status, position) WHERE deleted_at IS NULL",
    "CREATE TABLE IF NOT EXISTS workspace_members (\
         workspace_id UUID NOT NULL, \
         user_id UUID NOT NULL, \
         role TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'member', 'viewer')), \
         PRIMARY KEY (workspace_id, user_id))",
    "CREATE TABLE IF NOT EXISTS audit_logs (\
         id UUID PRIMARY KEY, \
         workspace_id UUID NOT NULL, \
         actor_id UUID NOT NULL, \
         action TEXT NOT NULL, \
         resource_type TEXT NOT NULL, \
         resource_id UUID NOT NULL, \
         metadata JSONB NOT NULL, \
         created_at TIMESTAMPTZ NOT NULL)",
];

// =============================================================================
// Helper Functions
// =============================================================================

/// Maps a `sqlx` error, recognizing lock timeouts and deadlocks.
fn database_error(error: &sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(database) = error
        && let Some(code) = database.code()
        && (code == LOCK_NOT_AVAILABLE || code == DEADLOCK_DETECTED)
    {
        return RepositoryError::LockTimeout(database.message().to_string());
    }
    RepositoryError::DatabaseError(error.to_string())
}

/// Advisory lock key text for a lane's seed lock, hashed by Postgres.
fn lane_seed_key(workspace_id: &WorkspaceId, lane: TaskStatus) -> String {
    format!("kanban_reorder:lane_seed:{workspace_id}:{}", lane.as_str())
}

/// Formats a duration as a Postgres interval literal for `lock_timeout`.
fn lock_timeout_setting(lock_timeout: Duration) -> String {
    format!("{}ms", lock_timeout.as_millis().max(1))
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    workspace_id: Uuid,
    title: String,
    status: String,
    position: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = RepositoryError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|error| RepositoryError::SerializationError(error.to_string()))?;

        Ok(Self {
            task_id: TaskId::from_uuid(row.id),
            workspace_id: WorkspaceId::from_uuid(row.workspace_id),
            title: row.title,
            status,
            position: row.position,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            deleted_at: row.deleted_at.map(Timestamp::from_datetime),
        })
    }
}

/// Creates the tables and indexes used by this crate if they do not exist.
///
/// # Errors
///
/// Returns `RepositoryError::DatabaseError` if any statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|error| database_error(&error))?;
    }
    tracing::info!(statements = SCHEMA_STATEMENTS.len(), "Schema ensured");
    Ok(())
}

/// Opens a connection pool sized by the configuration.
///
/// # Errors
///
/// Returns `RepositoryError::DatabaseError` if no database URL is configured
/// or the connection fails.
pub async fn connect(config: &ReorderConfig) -> Result<PgPool, RepositoryError> {
    let database_url = config.database_url.as_deref().ok_or_else(|| {
        RepositoryError::DatabaseError("DATABASE_URL is not configured".to_string())
    })?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .map_err(|error| database_error(&error))
}

// =============================================================================
// PostgreSQL Task Store
// =============================================================================

/// `PostgreSQL` implementation of [`TaskStore`].
///
/// # Example
///
/// ```ignore
/// let pool = PgPool::connect("postgres://localhost/board").await?;
/// let store = PostgresTaskStore::new(pool, Duration::from_secs(5));
///
/// let mut transaction = store.begin().await?;
/// let task = transaction.lock_target(&workspace_id, &task_id).await?;
/// transaction.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresTaskStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl TaskStore for PostgresTaskStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction, RepositoryError> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| database_error(&error))?;

        // Scoped to this transaction only.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut *transaction)
            .await
            .map_err(|error| database_error(&error))?;

        Ok(PostgresTransaction { transaction })
    }

    async fn insert(&self, task: &Task) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tasks (id, workspace_id, title, status, position, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(task.task_id.as_uuid())
        .bind(task.workspace_id.as_uuid())
        .bind(&task.title)
        .bind(task.status.as_str())
        .bind(task.position)
        .bind(task.created_at.as_datetime())
        .bind(task.updated_at.as_datetime())
        .bind(task.deleted_at.as_ref().map(Timestamp::as_datetime))
        .execute(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE id = $1 AND workspace_id = $2 AND deleted_at IS NULL"
        ))
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;

        row.map(Task::try_from).transpose()
    }

    async fn list_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE workspace_id = $1 AND status = $2 AND deleted_at IS NULL \
             ORDER BY position ASC, id ASC"
        ))
        .bind(workspace_id.as_uuid())
        .bind(lane.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn max_position_in_lane(
        &self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<f64, RepositoryError> {
        let (max,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position), 0)::DOUBLE PRECISION FROM tasks \
             WHERE workspace_id = $1 AND status = $2 AND deleted_at IS NULL",
        )
        .bind(workspace_id.as_uuid())
        .bind(lane.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;
        Ok(max)
    }

    async fn soft_delete(
        &self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE tasks SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND workspace_id = $2 AND deleted_at IS NULL",
        )
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// PostgreSQL Transaction
// =============================================================================

/// A `sqlx` transaction holding `FOR UPDATE` locks.
///
/// Dropping it without commit rolls back on the connection.
pub struct PostgresTransaction {
    transaction: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgresTransaction")
            .finish_non_exhaustive()
    }
}

impl LockingTransaction for PostgresTransaction {
    async fn lock_target(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
    ) -> Result<Task, RepositoryError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE id = $1 AND workspace_id = $2 AND deleted_at IS NULL \
             FOR UPDATE"
        ))
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| database_error(&error))?;

        row.map(Task::try_from).transpose()?.ok_or_else(|| {
            RepositoryError::NotFound(format!("task {task_id} in workspace {workspace_id}"))
        })
    }

    async fn lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> Result<Task, RepositoryError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE id = $1 AND workspace_id = $2 AND status = $3 AND deleted_at IS NULL \
             FOR UPDATE"
        ))
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .bind(lane.as_str())
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| database_error(&error))?;

        row.map(Task::try_from).transpose()?.ok_or_else(|| {
            RepositoryError::NotFound(format!(
                "task {task_id} in lane {} of workspace {workspace_id}",
                lane.as_str()
            ))
        })
    }

    async fn try_lock_neighbor(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        task_id: &TaskId,
    ) -> Result<Option<Task>, RepositoryError> {
        // SKIP LOCKED returns no row instead of raising, so the transaction
        // stays usable.
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE id = $1 AND workspace_id = $2 AND status = $3 AND deleted_at IS NULL \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .bind(lane.as_str())
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| database_error(&error))?;

        row.map(Task::try_from).transpose()
    }

    async fn lock_lane(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<Vec<Task>, RepositoryError> {
        // ORDER BY id makes the lock sequence match every other locker.
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE workspace_id = $1 AND status = $2 AND deleted_at IS NULL \
             ORDER BY id ASC \
             FOR UPDATE"
        ))
        .bind(workspace_id.as_uuid())
        .bind(lane.as_str())
        .fetch_all(&mut *self.transaction)
        .await
        .map_err(|error| database_error(&error))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<(), RepositoryError> {
        // Transaction-scoped; released by commit or rollback like row locks.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(lane_seed_key(workspace_id, lane))
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| database_error(&error))?;
        Ok(())
    }

    async fn try_lock_lane_seed(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
    ) -> Result<bool, RepositoryError> {
        let (acquired,): (bool,) =
            sqlx::query_as("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(lane_seed_key(workspace_id, lane))
                .fetch_one(&mut *self.transaction)
                .await
                .map_err(|error| database_error(&error))?;
        Ok(acquired)
    }

    async fn adjacent_task(
        &mut self,
        workspace_id: &WorkspaceId,
        lane: TaskStatus,
        pivot: f64,
        direction: Direction,
        exclude: &TaskId,
    ) -> Result<Option<Adjacent>, RepositoryError> {
        let query = match direction {
            Direction::Above => {
                "SELECT id, position FROM tasks \
                 WHERE workspace_id = $1 AND status = $2 AND deleted_at IS NULL \
                 AND position > $3 AND id <> $4 \
                 ORDER BY position ASC, id ASC LIMIT 1"
            }
            Direction::Below => {
                "SELECT id, position FROM tasks \
                 WHERE workspace_id = $1 AND status = $2 AND deleted_at IS NULL \
                 AND position < $3 AND id <> $4 \
                 ORDER BY position DESC, id DESC LIMIT 1"
            }
        };

        let row: Option<(Uuid, f64)> = sqlx::query_as(query)
            .bind(workspace_id.as_uuid())
            .bind(lane.as_str())
            .bind(pivot)
            .bind(exclude.as_uuid())
            .fetch_optional(&mut *self.transaction)
            .await
            .map_err(|error| database_error(&error))?;

        Ok(row.map(|(id, position)| Adjacent {
            task_id: TaskId::from_uuid(id),
            position,
        }))
    }

    async fn persist(
        &mut self,
        workspace_id: &WorkspaceId,
        task_id: &TaskId,
        position: f64,
        lane: TaskStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tasks SET position = $1, status = $2, updated_at = NOW() \
             WHERE id = $3 AND workspace_id = $4 AND deleted_at IS NULL",
        )
        .bind(position)
        .bind(lane.as_str())
        .bind(task_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| database_error(&error))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "task {task_id} in workspace {workspace_id}"
            )));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.transaction
            .commit()
            .await
            .map_err(|error| database_error(&error))
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        self.transaction
            .rollback()
            .await
            .map_err(|error| database_error(&error))
    }
}

// =============================================================================
// PostgreSQL Collaborators
// =============================================================================

/// Reads roles from `workspace_members` on every call.
#[derive(Debug, Clone)]
pub struct PostgresAuthorizationResolver {
    pool: PgPool,
}

impl PostgresAuthorizationResolver {
    /// Creates a resolver over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Grants (or replaces) a role.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DatabaseError` if the upsert fails.
    pub async fn grant(
        &self,
        workspace_id: &WorkspaceId,
        actor_id: &ActorId,
        role: Role,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT (workspace_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(workspace_id.as_uuid())
        .bind(actor_id.as_uuid())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;
        Ok(())
    }
}

impl AuthorizationResolver for PostgresAuthorizationResolver {
    async fn get_role(
        &self,
        actor_id: &ActorId,
        workspace_id: &WorkspaceId,
    ) -> Result<Role, AuthorizationError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
        )
        .bind(workspace_id.as_uuid())
        .bind(actor_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;

        let Some((role,)) = row else {
            return Err(AuthorizationError::MemberNotFound {
                actor_id: actor_id.clone(),
                workspace_id: workspace_id.clone(),
            });
        };

        role.parse::<Role>()
            .map_err(|error| RepositoryError::SerializationError(error).into())
    }
}

/// Appends audit entries to `audit_logs`.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    /// Creates a sink over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PostgresAuditSink {
    async fn log_action(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let resource_type = match entry.action {
            crate::domain::AuditAction::Renormalize => "workspace",
            crate::domain::AuditAction::Create | crate::domain::AuditAction::Move => "task",
        };

        sqlx::query(
            "INSERT INTO audit_logs \
             (id, workspace_id, actor_id, action, resource_type, resource_id, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::now_v7())
        .bind(entry.workspace_id.as_uuid())
        .bind(entry.actor_id.as_uuid())
        .bind(entry.action.as_str())
        .bind(resource_type)
        .bind(entry.resource_id)
        .bind(&entry.metadata)
        .bind(entry.occurred_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|error| database_error(&error))?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
