//! Process-wide schema and index registries.
//!
//! Both are initialized during startup via explicit register calls and
//! live until process exit. Long-lived servers register once; tests use
//! the `clear` entry points between cases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use omnibase_core::SortOrder;
use omnibase_translate::{quote_ident, SqlDialect};

use crate::model::CollectionSchema;

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of declared collection schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, CollectionSchema>>,
}

static GLOBAL_SCHEMAS: OnceLock<SchemaRegistry> = OnceLock::new();

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SchemaRegistry {
        GLOBAL_SCHEMAS.get_or_init(SchemaRegistry::new)
    }

    pub fn register(&self, schema: CollectionSchema) {
        write_lock(&self.schemas).insert(schema.name.clone(), schema);
    }

    pub fn get(&self, collection: &str) -> Option<CollectionSchema> {
        read_lock(&self.schemas).get(collection).cloned()
    }

    pub fn contains(&self, collection: &str) -> bool {
        read_lock(&self.schemas).contains_key(collection)
    }

    /// Declared field whitelist for a collection, if it has a schema.
    pub fn field_names(&self, collection: &str) -> Option<Vec<String>> {
        read_lock(&self.schemas)
            .get(collection)
            .map(CollectionSchema::field_names)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.schemas).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<CollectionSchema> {
        let mut schemas: Vec<CollectionSchema> =
            read_lock(&self.schemas).values().cloned().collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Remove every registered schema. Test-only entry point.
    pub fn clear(&self) {
        write_lock(&self.schemas).clear();
    }
}

/// One declared index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<(String, SortOrder)>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, fields: Vec<(String, SortOrder)>) -> Self {
        Self {
            name: name.into(),
            fields,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// CREATE INDEX statement for a relational backend. MySQL and MSSQL
    /// have no IF NOT EXISTS form; the adapter treats an already-exists
    /// error as success.
    pub fn create_sql(&self, collection: &str, dialect: SqlDialect) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        let if_not_exists = match dialect {
            SqlDialect::Postgres | SqlDialect::Sqlite => "IF NOT EXISTS ",
            SqlDialect::MySql | SqlDialect::Mssql => "",
        };
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|(field, order)| format!("{} {}", quote_ident(field), order.sql_keyword()))
            .collect();
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            if_not_exists,
            quote_ident(&self.name),
            quote_ident(collection),
            columns.join(", ")
        )
    }
}

/// Registry of declared indexes, keyed by collection.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
}

static GLOBAL_INDEXES: OnceLock<IndexRegistry> = OnceLock::new();

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static IndexRegistry {
        GLOBAL_INDEXES.get_or_init(IndexRegistry::new)
    }

    pub fn register(&self, collection: impl Into<String>, index: IndexSpec) {
        write_lock(&self.indexes)
            .entry(collection.into())
            .or_default()
            .push(index);
    }

    pub fn for_collection(&self, collection: &str) -> Vec<IndexSpec> {
        read_lock(&self.indexes)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.indexes).keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every registered index. Test-only entry point.
    pub fn clear(&self) {
        write_lock(&self.indexes).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldSpec;

    #[test]
    fn register_and_lookup() {
        let registry = SchemaRegistry::new();
        registry.register(
            CollectionSchema::new("users").field(FieldSpec::string("email").required()),
        );

        assert!(registry.contains("users"));
        assert_eq!(
            registry.field_names("users"),
            Some(vec!["email".to_string()])
        );
        assert!(registry.get("orders").is_none());
        assert_eq!(registry.collection_names(), vec!["users".to_string()]);

        registry.clear();
        assert!(!registry.contains("users"));
    }

    #[test]
    fn index_create_sql() {
        let index = IndexSpec::new(
            "idx_users_email",
            vec![("email".to_string(), SortOrder::Ascending)],
        )
        .unique();
        assert_eq!(
            index.create_sql("users", SqlDialect::Postgres),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_users_email\" ON \"users\" (\"email\" ASC)"
        );
        assert_eq!(
            index.create_sql("users", SqlDialect::MySql),
            "CREATE UNIQUE INDEX \"idx_users_email\" ON \"users\" (\"email\" ASC)"
        );
    }

    #[test]
    fn index_registry_groups_by_collection() {
        let registry = IndexRegistry::new();
        registry.register(
            "users",
            IndexSpec::new("idx_a", vec![("a".to_string(), SortOrder::Ascending)]),
        );
        registry.register(
            "users",
            IndexSpec::new("idx_b", vec![("b".to_string(), SortOrder::Descending)]),
        );

        assert_eq!(registry.for_collection("users").len(), 2);
        assert!(registry.for_collection("orders").is_empty());
    }
}
