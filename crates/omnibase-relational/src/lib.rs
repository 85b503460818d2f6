//! # omnibase-relational
//!
//! Relational adapter for omnibase. CRUD is compiled through the
//! translator and builder, single-row operations and upsert are emulated
//! per dialect, and execution goes through a minimal [`SqlExecutor`]
//! contract so connection-pool drivers stay pluggable. A PostgreSQL
//! executor on tokio-postgres is built in; register factories for MySQL,
//! MSSQL and SQLite with [`ExecutorRegistry::global`].

pub mod adapter;
pub mod executor;
pub mod postgres;

pub use adapter::RelationalAdapter;
pub use executor::{ExecutorRegistry, SqlExecutor, SqlExecutorFactory};
pub use postgres::{PgExecutor, PgExecutorFactory};
