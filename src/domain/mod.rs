//! Domain module for board ordering.
//!
//! This module contains the task model, lane enumeration, roles, audit
//! records and the pure position allocator.

pub mod access;
pub mod position;
pub mod task;

pub use access::{AuditAction, AuditEntry, Role};
pub use position::{Allocation, DEFAULT_EXHAUSTION_EPSILON, DEFAULT_INCREMENT, PositionAllocator};
pub use task::{ActorId, Task, TaskId, TaskStatus, Timestamp, UnknownLane, WorkspaceId};
