//! # omnibase-translate
//!
//! Compiles the document-style filter and update algebra into each
//! backend's native dialect: parameterized SQL for PostgreSQL, MySQL,
//! MSSQL and SQLite, and query DSL / mutation scripts for the search
//! engine. Also assembles full SQL statements with dialect-correct
//! pagination and single-row targeting.
//!
//! Everything in this crate is pure: no I/O, no shared state.

pub mod builder;
pub mod dialect;
pub mod elastic;
pub mod sql_filter;
pub mod sql_update;

pub use builder::{
    build_count, build_delete, build_delete_one, build_insert, build_insert_many, build_select,
    build_update, build_update_one, SqlStatement,
};
pub use dialect::{quote_ident, SqlDialect};
pub use sql_filter::{translate_filter, SqlFragment};
pub use sql_update::translate_update;
