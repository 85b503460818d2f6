//! # omnibase-core
//!
//! Shared foundations of omnibase: the document-style filter and update
//! algebra, query options, write receipts, the normalized error taxonomy
//! with per-backend mappers, the typed event bus, connection
//! configuration, and the adapter contract every backend implements.
//!
//! Backend crates depend on this crate and nothing in it performs I/O.

pub mod adapter;
pub mod config;
pub mod error;
pub mod error_map;
pub mod events;
pub mod filter;
pub mod types;
pub mod update;

pub use adapter::{
    CollectionIntrospection, DatabaseAdapter, FieldInfo, JoinKind, LookupSpec,
};
pub use config::{
    DbConfig, ElasticConfig, FieldSelector, LogMode, PoolSize, ReconnectConfig, SanitizeRule,
    TimestampConfig,
};
pub use error::{DbError, ErrorCode, Result};
pub use error_map::{
    map_elastic_error, map_mongo_error, map_sql_error, suggest_for_foreign_method,
    unknown_collection,
};
pub use events::{DbEvent, EventBus};
pub use filter::{FieldCondition, FieldOp, Filter, FilterClause, SUPPORTED_OPERATORS};
pub use types::{
    redact_uri, Backend, Confirm, ConnectionState, ConnectionStatus, Document, Operation,
    PoolStatus, Projection, QueryOptions, ReconnectStatus, SortOrder, WriteReceipt,
};
pub use update::Update;
