//! Concurrency-safe ordering of tasks inside Kanban lanes.
//!
//! Tasks carry a fractional `f64` key that is only compared with other live
//! tasks of the same workspace and lane. Moves lock the moving task and its
//! anchors inside one transaction, allocate a key between the anchors, and
//! commit; concurrent moves that touch the same rows serialize on those locks.
//!
//! # Modules
//!
//! - [`domain`]: task model, lanes, roles, audit records, key allocation
//! - [`infrastructure`]: store traits with `PostgreSQL` and in-memory backends
//! - [`application`]: the [`ReorderCoordinator`](application::ReorderCoordinator)
//! - [`config`]: environment configuration
//! - [`telemetry`]: tracing subscriber setup

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;
