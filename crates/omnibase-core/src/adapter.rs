//! The uniform adapter contract every backend implements.

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::filter::Filter;
use crate::types::{Backend, ConnectionStatus, Document, QueryOptions, WriteReceipt};
use crate::update::Update;

/// Join kind for cross-collection lookup.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// A missing local value attaches an empty sequence.
    #[default]
    Left,
    /// A missing local value means not-found.
    Inner,
}

/// Cross-collection lookup declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    /// Foreign collection to read related rows from.
    pub from: String,
    /// Field on the primary document holding the join value.
    pub local_field: String,
    /// Field on the foreign collection matched against the local value.
    pub foreign_field: String,
    /// Key the related rows are attached under.
    pub alias: String,
    #[serde(default)]
    pub join: JoinKind,
    /// Attach only the first related row in place of the sequence.
    #[serde(default)]
    pub unwind: bool,
}

/// One introspected field of a live collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// Backend-reported type name (column type, inferred BSON type, mapping type).
    pub field_type: String,
    pub nullable: bool,
}

/// Native introspection result for `describe_collection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionIntrospection {
    pub name: String,
    pub fields: Vec<FieldInfo>,
}

/// Uniform per-backend operation contract.
///
/// Adapters are `Downcast` so callers with backend-specific needs can
/// recover the concrete adapter and its raw driver handle.
///
/// Transactional scopes are modeled as child adapters: `begin_transaction`
/// yields a boxed adapter sharing the same driver handle under a
/// transaction token; `commit_transaction` / `rollback_transaction` are
/// valid only on that child. Backends without transactions keep the
/// defaults, which report `UNSUPPORTED_OPERATION`.
#[async_trait]
pub trait DatabaseAdapter: DowncastSync {
    fn backend(&self) -> Backend;

    /// Verify connectivity. Called once by the router after construction
    /// and again by the reconnect controller.
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn status(&self) -> Result<ConnectionStatus>;

    async fn query_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Option<Document>>;

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>>;

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteReceipt>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt>;

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseAdapter>> {
        Err(no_transactions(self.backend()))
    }

    async fn commit_transaction(&self) -> Result<()> {
        Err(no_transactions(self.backend()))
    }

    async fn rollback_transaction(&self) -> Result<()> {
        Err(no_transactions(self.backend()))
    }

    /// Create every collection registered in the schema registry.
    async fn ensure_collections(&self) -> Result<()> {
        Err(DbError::unsupported(
            format!("{} does not support ensure_collections.", self.backend()),
            "Create collections with backend-native tooling.",
        ))
    }

    /// Create every index registered in the index registry.
    async fn ensure_indexes(&self) -> Result<()> {
        Err(DbError::unsupported(
            format!("{} does not support ensure_indexes.", self.backend()),
            "Create indexes with backend-native tooling.",
        ))
    }

    /// Introspect a live collection, if the backend can.
    async fn describe_collection(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionIntrospection>>;

    /// Total document count of a collection.
    async fn document_count(&self, collection: &str) -> Result<u64> {
        self.count(collection, &Filter::empty()).await
    }
}

impl_downcast!(sync DatabaseAdapter);

fn no_transactions(backend: Backend) -> DbError {
    DbError::unsupported(
        format!("{} does not support transactions.", backend),
        "Run the operations individually, or use batch for best-effort sequencing.",
    )
}
