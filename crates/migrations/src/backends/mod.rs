//! Migration Backends
//!
//! Implementations of the driver traits: a SQL backend for PostgreSQL and
//! SQLite, and an in-memory backend for tests and previews.

pub mod memory;
pub mod sql;

pub use memory::MemoryBackend;
pub use sql::{SqlBackend, SqlDialect};
