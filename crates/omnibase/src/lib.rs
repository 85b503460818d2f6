//! # omnibase
//!
//! One document-style query API over heterogeneous database backends:
//! a document store (MongoDB), four SQL dialects (PostgreSQL, MySQL,
//! MSSQL, SQLite) and a search engine (Elasticsearch). Callers write
//! filters, updates and options in one vocabulary; the layer translates,
//! executes, enforces safety and returns uniform structured results.
//!
//! ## Example
//!
//! ```rust,no_run
//! use omnibase::{Database, DbConfig, QueryOptions};
//! use serde_json::json;
//!
//! # async fn example() -> omnibase::Result<()> {
//! let db = Database::connect(DbConfig::new("postgresql://localhost/app")).await?;
//!
//! let admins = db
//!     .query_many(
//!         "users",
//!         &json!({"role": "admin", "age": {"$gte": 18}}),
//!         &QueryOptions::new().with_limit(100),
//!     )
//!     .await?;
//!
//! let receipt = db
//!     .update_one(
//!         "users",
//!         &json!({"email": "ann@example.com"}),
//!         &json!({"$set": {"verified": true}}),
//!         false,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every operation threads the same pipeline: sanitize → guardrail →
//! schema-validate → timestamp-inject → adapter → error-normalize →
//! receipt → events.

pub mod batch;
pub mod guardrail;
pub mod logger;
pub mod reconnect;
pub mod router;
pub mod sanitize;
pub mod timestamps;

pub use batch::BatchStep;
pub use guardrail::check_guardrails;
pub use logger::OperationLogger;
pub use reconnect::ReconnectController;
pub use router::{
    CollectionDescription, Database, DescribedField, ExplainOutput, TransactionScope,
};
pub use sanitize::{
    apply_sanitize_rules, check_filter_fields, check_index_name, check_regex_complexity,
    check_reserved_fields, ELASTIC_RESERVED_FIELDS,
};
pub use timestamps::{inject_insert_timestamps, inject_update_timestamps};

// Re-export the building blocks callers need at the surface.
pub use omnibase_core::{
    Backend, CollectionIntrospection, Confirm, ConnectionState, ConnectionStatus,
    DatabaseAdapter, DbConfig, DbError, DbEvent, Document, ErrorCode, EventBus, FieldInfo,
    FieldSelector, Filter, JoinKind, LogMode, LookupSpec, Operation, PoolSize, Projection,
    QueryOptions, ReconnectConfig, Result, SanitizeRule, SortOrder, TimestampConfig, Update,
    WriteReceipt,
};
pub use omnibase_schema::{
    CollectionSchema, FieldKind, FieldSpec, IndexRegistry, IndexSpec, SchemaRegistry,
    ValidationFailure,
};
