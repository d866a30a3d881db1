//! Application layer.
//!
//! [`ReorderCoordinator`] runs the ordering commands: moving a task, creating
//! a task at the tail of a lane, and renormalizing a lane. Each command checks
//! the actor's role first, does its storage work inside one transaction, and
//! writes an audit entry after commit.

mod coordinator;
mod create;
mod error;
mod gap;
pub mod lock_plan;
mod move_task;
mod renormalize;

pub use coordinator::ReorderCoordinator;
pub use create::CreateTaskRequest;
pub use error::{ErrorKind, ReorderError};
pub use lock_plan::{HeldLocks, LockPlan, LockRole, LockStep};
pub use move_task::{MoveOutcome, MoveRequest};
pub use renormalize::{RenormalizeOutcome, RenormalizeRequest};
