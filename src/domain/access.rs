//! Workspace roles and audit records.
//!
//! Both are consumed from collaborators outside this crate: roles come from
//! an [`AuthorizationResolver`](crate::infrastructure::AuthorizationResolver)
//! and audit entries go to an [`AuditSink`](crate::infrastructure::AuditSink).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{ActorId, TaskId, TaskStatus, Timestamp, WorkspaceId};

// =============================================================================
// Role
// =============================================================================

/// Membership role of an actor inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Workspace owner.
    Owner,
    /// Administrator.
    Admin,
    /// Regular member.
    Member,
    /// Read-only access.
    Viewer,
}

impl Role {
    /// Returns `true` if the role may create, move or renormalize tasks.
    #[must_use]
    pub const fn can_modify(self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Member)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "viewer" => Ok(Self::Viewer),
            _ => Err(format!("unknown role '{value}'")),
        }
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Kind of action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A task was created at the tail of a lane.
    Create,
    /// A task was moved within or across lanes.
    Move,
    /// A lane's keys were re-spaced.
    Renormalize,
}

impl AuditAction {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Move => "move",
            Self::Renormalize => "renormalize",
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Tenant the action happened in.
    pub workspace_id: WorkspaceId,
    /// Who performed it.
    pub actor_id: ActorId,
    /// What was done.
    pub action: AuditAction,
    /// Task (or, for renormalization, workspace) the action targeted.
    pub resource_id: Uuid,
    /// Action-specific details.
    pub metadata: serde_json::Value,
    /// When it happened.
    pub occurred_at: Timestamp,
}

impl AuditEntry {
    /// Audit record for a committed move.
    #[must_use]
    pub fn moved(
        workspace_id: WorkspaceId,
        actor_id: ActorId,
        task_id: &TaskId,
        from_lane: TaskStatus,
        to_lane: TaskStatus,
        new_position: f64,
    ) -> Self {
        Self {
            workspace_id,
            actor_id,
            action: AuditAction::Move,
            resource_id: *task_id.as_uuid(),
            metadata: json!({
                "fromLane": from_lane.as_str(),
                "toLane": to_lane.as_str(),
                "newPosition": new_position,
            }),
            occurred_at: Timestamp::now(),
        }
    }

    /// Audit record for a created task.
    #[must_use]
    pub fn created(
        workspace_id: WorkspaceId,
        actor_id: ActorId,
        task_id: &TaskId,
        lane: TaskStatus,
        position: f64,
    ) -> Self {
        Self {
            workspace_id,
            actor_id,
            action: AuditAction::Create,
            resource_id: *task_id.as_uuid(),
            metadata: json!({
                "lane": lane.as_str(),
                "position": position,
            }),
            occurred_at: Timestamp::now(),
        }
    }

    /// Audit record for a renormalized lane.
    #[must_use]
    pub fn renormalized(
        workspace_id: WorkspaceId,
        actor_id: ActorId,
        lane: TaskStatus,
        task_count: usize,
    ) -> Self {
        Self {
            resource_id: *workspace_id.as_uuid(),
            workspace_id,
            actor_id,
            action: AuditAction::Renormalize,
            metadata: json!({
                "lane": lane.as_str(),
                "taskCount": task_count,
            }),
            occurred_at: Timestamp::now(),
        }
    }
}
