//! The reorder coordinator.

use crate::domain::{ActorId, AuditEntry, PositionAllocator, Role, TaskStatus, WorkspaceId};
use crate::infrastructure::{AuditSink, AuthorizationResolver, TaskStore};

use super::ReorderError;

/// Orchestrates ordering commands over a store and its collaborators.
///
/// The coordinator holds no per-request state. Share it behind an `Arc` to
/// drive concurrent commands from separate tokio tasks.
///
/// # Example
///
/// ```ignore
/// let coordinator = ReorderCoordinator::new(
///     PostgresTaskStore::new(pool.clone(), config.lock_timeout()),
///     PostgresAuthorizationResolver::new(pool.clone()),
///     PostgresAuditSink::new(pool),
///     config.allocator(),
/// );
/// let outcome = coordinator.move_task(request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ReorderCoordinator<S, A, U> {
    pub(super) store: S,
    authorization: A,
    audit: U,
    pub(super) allocator: PositionAllocator,
}

impl<S, A, U> ReorderCoordinator<S, A, U>
where
    S: TaskStore,
    A: AuthorizationResolver,
    U: AuditSink,
{
    /// Creates a coordinator.
    pub const fn new(store: S, authorization: A, audit: U, allocator: PositionAllocator) -> Self {
        Self {
            store,
            authorization,
            audit,
            allocator,
        }
    }

    /// The underlying store, for plain reads.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The allocator in use.
    pub const fn allocator(&self) -> &PositionAllocator {
        &self.allocator
    }

    /// Resolves the actor's role and requires the modify capability.
    pub(super) async fn authorize(
        &self,
        actor_id: &ActorId,
        workspace_id: &WorkspaceId,
    ) -> Result<Role, ReorderError> {
        let role = self.authorization.get_role(actor_id, workspace_id).await?;
        if !role.can_modify() {
            tracing::info!(%actor_id, %workspace_id, role = role.as_str(), "Modification denied");
            return Err(ReorderError::forbidden(actor_id, workspace_id));
        }
        Ok(role)
    }

    /// Records an audit entry. Failures are logged and dropped.
    pub(super) async fn record(&self, entry: AuditEntry) {
        if let Err(error) = self.audit.log_action(&entry).await {
            tracing::warn!(
                workspace_id = %entry.workspace_id,
                resource_id = %entry.resource_id,
                action = entry.action.as_str(),
                %error,
                "Failed to write audit entry"
            );
        }
    }
}

/// Parses a lane name coming from a request.
pub(super) fn parse_lane(value: &str) -> Result<TaskStatus, ReorderError> {
    Ok(value.parse::<TaskStatus>()?)
}
