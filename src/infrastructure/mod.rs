//! Infrastructure module for storage and collaborators.
//!
//! This module contains the store traits, the in-memory backend used for
//! development and tests, and the `PostgreSQL` backend.

pub mod in_memory;
pub mod postgres;
pub mod repository;

pub use in_memory::{
    DEFAULT_LOCK_TIMEOUT, InMemoryAuditSink, InMemoryAuthorizationResolver, InMemoryTaskStore,
    InMemoryTransaction,
};
pub use postgres::{
    PostgresAuditSink, PostgresAuthorizationResolver, PostgresTaskStore, PostgresTransaction,
    connect, ensure_schema,
};
pub use repository::{
    Adjacent, AuditSink, AuthorizationError, AuthorizationResolver, Direction, LockingTransaction,
    RepositoryError, TaskStore,
};
