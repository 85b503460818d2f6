//! # omnibase-schema
//!
//! Declared per-collection field typings and their derived artifacts:
//! the sanitizer's field whitelist, CREATE TABLE DDL per SQL dialect,
//! search-engine index mappings, example filters for discovery, and
//! dry-run document validation. Schemas and indexes live in process-wide
//! registries mutated only by explicit register calls.

pub mod model;
pub mod registry;

pub use model::{CollectionSchema, FieldKind, FieldSpec, ValidationFailure};
pub use registry::{IndexRegistry, IndexSpec, SchemaRegistry};
