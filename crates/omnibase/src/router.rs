//! Router / façade: backend detection, adapter construction and the
//! per-operation pipeline.
//!
//! Every call threads the same stages: sanitize → guardrail →
//! schema-validate → timestamp-inject → adapter → error-normalize →
//! receipt → events.

use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use omnibase_core::{
    unknown_collection, Backend, Confirm, ConnectionStatus, DatabaseAdapter, DbConfig, DbError,
    DbEvent, Document, ErrorCode, EventBus, Filter, LookupSpec, Operation, QueryOptions, Result,
    Update, WriteReceipt,
};
use omnibase_elastic::ElasticAdapter;
use omnibase_mongodb::convert as mongo_convert;
use omnibase_mongodb::MongoAdapter;
use omnibase_relational::RelationalAdapter;
use omnibase_schema::{IndexRegistry, SchemaRegistry, ValidationFailure};
use omnibase_translate::{build_select, elastic, SqlDialect};

use crate::batch::{run_batch, BatchStep};
use crate::guardrail::check_guardrails;
use crate::logger::OperationLogger;
use crate::reconnect::ReconnectController;
use crate::sanitize::{
    apply_rules_to_value, apply_sanitize_rules, check_filter_fields, check_index_name,
    check_regex_complexity, check_reserved_fields,
};
use crate::timestamps::{inject_insert_timestamps, inject_update_timestamps};

/// The native query that would execute, without executing it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainOutput {
    /// Relational backends: statement text plus ordered parameters.
    Sql { sql: String, params: Vec<Value> },
    /// Document store: the native find invocation.
    DocumentQuery { body: Value },
    /// Search engine: the `_search` request body.
    SearchDsl { body: Value },
}

/// One field in a `describe` listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DescribedField {
    pub name: String,
    pub field_type: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

/// Per-collection discovery output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionDescription {
    pub name: String,
    pub fields: Vec<DescribedField>,
    pub indexes: Vec<String>,
    pub document_count: u64,
    /// A working starting-point filter for this collection.
    pub example_filter: Value,
}

/// The per-operation stages, shared by the database handle and every
/// transactional scope.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) config: DbConfig,
    pub(crate) events: EventBus,
    pub(crate) logger: OperationLogger,
}

impl Pipeline {
    fn backend_of(&self, adapter: &dyn DatabaseAdapter) -> Backend {
        adapter.backend()
    }

    /// Sanitize and parse a raw filter value.
    pub(crate) fn prepare_filter(
        &self,
        backend: Backend,
        collection: &str,
        filter: &Value,
        operation: Operation,
    ) -> Result<Filter> {
        let sanitized = if self.config.sanitize {
            apply_rules_to_value(filter, &self.config.sanitize_rules)
        } else {
            filter.clone()
        };

        let parsed =
            Filter::parse(&sanitized).map_err(|e| self.wrap(e, backend, collection, operation))?;

        if self.config.sanitize {
            check_regex_complexity(&parsed)
                .map_err(|e| self.wrap(e, backend, collection, operation))?;
            match backend {
                Backend::Elastic => {
                    check_index_name(collection)
                        .map_err(|e| self.wrap(e, backend, collection, operation))?;
                    check_reserved_fields(&parsed)
                        .map_err(|e| self.wrap(e, backend, collection, operation))?;
                }
                backend if backend.is_relational() => {
                    if let Some(allowed) = SchemaRegistry::global().field_names(collection) {
                        check_filter_fields(&parsed, &allowed, collection)
                            .map_err(|e| self.wrap(e, backend, collection, operation))?;
                    }
                }
                _ => {}
            }
        }

        Ok(parsed)
    }

    /// Sanitize, schema-validate and timestamp a document for insertion.
    fn prepare_document(
        &self,
        backend: Backend,
        collection: &str,
        document: &Value,
        operation: Operation,
    ) -> Result<Document> {
        let document = document.as_object().ok_or_else(|| {
            self.wrap(
                DbError::new(
                    ErrorCode::QueryError,
                    "Document must be a JSON object.".to_string(),
                    "Pass the fields as an object, e.g. {\"name\": \"Ann\"}.",
                ),
                backend,
                collection,
                operation,
            )
        })?;

        let sanitized = if self.config.sanitize {
            apply_sanitize_rules(document, &self.config.sanitize_rules)
        } else {
            document.clone()
        };

        if self.config.schema_validation {
            if let Some(schema) = SchemaRegistry::global().get(collection) {
                let failures = schema.validate_document(&sanitized);
                if !failures.is_empty() {
                    let summary: Vec<String> =
                        failures.iter().take(3).map(|f| f.message.clone()).collect();
                    return Err(self.wrap(
                        DbError::new(
                            ErrorCode::ValidationError,
                            format!(
                                "Document failed schema validation for '{}': {}",
                                collection,
                                summary.join(" ")
                            ),
                            "Run validate with this document to list every failing field.",
                        ),
                        backend,
                        collection,
                        operation,
                    ));
                }
            }
        }

        Ok(inject_insert_timestamps(
            &sanitized,
            &self.config.timestamps,
            chrono::Utc::now(),
        ))
    }

    fn prepare_update(
        &self,
        backend: Backend,
        collection: &str,
        update: &Value,
        operation: Operation,
    ) -> Result<Update> {
        let parsed =
            Update::parse(update).map_err(|e| self.wrap(e, backend, collection, operation))?;
        Ok(inject_update_timestamps(
            &parsed,
            &self.config.timestamps,
            chrono::Utc::now(),
        ))
    }

    fn wrap(
        &self,
        err: DbError,
        backend: Backend,
        collection: &str,
        operation: Operation,
    ) -> DbError {
        err.contextualize(backend, Some(collection), operation)
    }

    fn observe(&self, receipt: WriteReceipt) -> WriteReceipt {
        self.logger.observe(&receipt);
        receipt
    }

    pub(crate) async fn query_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Document>> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::QueryOne)?;
        adapter
            .query_one(collection, &parsed, options)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::QueryOne))
    }

    pub(crate) async fn query_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::QueryMany)?;
        check_guardrails(
            self.config.guardrails,
            Operation::QueryMany,
            collection,
            &parsed,
            options,
            None,
            &self.events,
        )?;
        adapter
            .query_many(collection, &parsed, options)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::QueryMany))
    }

    pub(crate) async fn query_with_lookup(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        let backend = self.backend_of(adapter);
        let parsed =
            self.prepare_filter(backend, collection, filter, Operation::QueryWithLookup)?;
        adapter
            .query_with_lookup(collection, &parsed, options, lookup)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::QueryWithLookup))
    }

    pub(crate) async fn count(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
    ) -> Result<u64> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::Count)?;
        adapter
            .count(collection, &parsed)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::Count))
    }

    pub(crate) async fn insert_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        document: &Value,
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        let prepared =
            self.prepare_document(backend, collection, document, Operation::InsertOne)?;
        let receipt = adapter
            .insert_one(collection, prepared)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::InsertOne))?;
        Ok(self.observe(receipt))
    }

    pub(crate) async fn insert_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        documents: &[Value],
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        // Validation failures abort the whole call; nothing is inserted.
        let prepared = documents
            .iter()
            .map(|document| {
                self.prepare_document(backend, collection, document, Operation::InsertMany)
            })
            .collect::<Result<Vec<_>>>()?;
        let receipt = adapter
            .insert_many(collection, prepared)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::InsertMany))?;
        Ok(self.observe(receipt))
    }

    pub(crate) async fn update_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::UpdateOne)?;
        let prepared = self.prepare_update(backend, collection, update, Operation::UpdateOne)?;
        let receipt = adapter
            .update_one(collection, &parsed, &prepared, upsert)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::UpdateOne))?;
        Ok(self.observe(receipt))
    }

    pub(crate) async fn update_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::UpdateMany)?;
        check_guardrails(
            self.config.guardrails,
            Operation::UpdateMany,
            collection,
            &parsed,
            &QueryOptions::new(),
            confirm,
            &self.events,
        )?;
        let prepared = self.prepare_update(backend, collection, update, Operation::UpdateMany)?;
        let receipt = adapter
            .update_many(collection, &parsed, &prepared)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::UpdateMany))?;
        Ok(self.observe(receipt))
    }

    pub(crate) async fn delete_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::DeleteOne)?;
        check_guardrails(
            self.config.guardrails,
            Operation::DeleteOne,
            collection,
            &parsed,
            &QueryOptions::new(),
            None,
            &self.events,
        )?;
        let receipt = adapter
            .delete_one(collection, &parsed)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::DeleteOne))?;
        Ok(self.observe(receipt))
    }

    pub(crate) async fn delete_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        let backend = self.backend_of(adapter);
        let parsed = self.prepare_filter(backend, collection, filter, Operation::DeleteMany)?;
        check_guardrails(
            self.config.guardrails,
            Operation::DeleteMany,
            collection,
            &parsed,
            &QueryOptions::new(),
            confirm,
            &self.events,
        )?;
        let receipt = adapter
            .delete_many(collection, &parsed)
            .await
            .map_err(|e| self.wrap(e, backend, collection, Operation::DeleteMany))?;
        Ok(self.observe(receipt))
    }
}

/// The unified database handle.
///
/// One adapter per process; transactional scopes borrow a child adapter
/// sharing the same driver handle for their duration.
pub struct Database {
    pipeline: Pipeline,
    adapter: Arc<dyn DatabaseAdapter>,
    reconnect: Arc<ReconnectController>,
    reconnecting: Arc<AtomicBool>,
}

impl Database {
    /// Detect the backend from the URI, construct the matching adapter
    /// and verify connectivity.
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let backend = Backend::from_uri(&config.uri)?;
        let events = EventBus::default();

        let adapter: Arc<dyn DatabaseAdapter> = match backend {
            Backend::MongoDb => Arc::new(MongoAdapter::connect(&config).await?),
            Backend::Elastic => Arc::new(ElasticAdapter::connect(&config).await?),
            _ => Arc::new(RelationalAdapter::connect(&config).await?),
        };

        let redacted = omnibase_core::redact_uri(&config.uri);
        info!(backend = %backend, uri = %redacted, label = config.label.as_deref(), "connected");
        events.publish(DbEvent::Connected {
            backend,
            redacted_uri: redacted,
        });

        let logger = OperationLogger::new(events.clone(), config.logging, config.slow_query_ms);
        let reconnect = Arc::new(ReconnectController::new(
            config.reconnect.clone(),
            events.clone(),
        ));

        Ok(Self {
            pipeline: Pipeline {
                config,
                events,
                logger,
            },
            adapter,
            reconnect,
            reconnecting: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a handle around an existing adapter. Used by embedders that
    /// construct adapters themselves, and by tests.
    pub fn with_adapter(config: DbConfig, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        let events = EventBus::default();
        let logger = OperationLogger::new(events.clone(), config.logging, config.slow_query_ms);
        let reconnect = Arc::new(ReconnectController::new(
            config.reconnect.clone(),
            events.clone(),
        ));
        Self {
            pipeline: Pipeline {
                config,
                events,
                logger,
            },
            adapter,
            reconnect,
            reconnecting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn backend(&self) -> Backend {
        self.adapter.backend()
    }

    /// Subscribe to lifecycle, operation, slow-query, guardrail and
    /// shutdown events.
    pub fn events(&self) -> broadcast::Receiver<DbEvent> {
        self.pipeline.events.subscribe()
    }

    /// The concrete adapter, for backend-specific escapes (downcast to
    /// the adapter type to reach the raw driver handle).
    pub fn raw_adapter(&self) -> Arc<dyn DatabaseAdapter> {
        Arc::clone(&self.adapter)
    }

    fn watch<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.maybe_reconnect(err);
        }
        result
    }

    /// Kick the reconnect controller on connection-level failures. At
    /// most one controller run is in flight at a time.
    fn maybe_reconnect(&self, err: &DbError) {
        let connection_level =
            matches!(err.code, ErrorCode::ConnectionLost | ErrorCode::ConnectionFailed);
        if !connection_level || !self.pipeline.config.reconnect.enabled {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let controller = Arc::clone(&self.reconnect);
        let adapter = Arc::clone(&self.adapter);
        let flag = Arc::clone(&self.reconnecting);
        let backend = adapter.backend();
        let reason = err.message.clone();
        tokio::spawn(async move {
            let connect_adapter = Arc::clone(&adapter);
            let outcome = controller
                .run(backend, &reason, move || {
                    let adapter = Arc::clone(&connect_adapter);
                    async move { adapter.connect().await }
                })
                .await;
            if let Err(e) = outcome {
                warn!("reconnect failed: {}", e);
            }
            flag.store(false, Ordering::SeqCst);
        });
    }

    pub async fn query_one(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Document>> {
        let result = self
            .pipeline
            .query_one(self.adapter.as_ref(), collection, filter, options)
            .await;
        self.watch(result)
    }

    pub async fn query_many(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let result = self
            .pipeline
            .query_many(self.adapter.as_ref(), collection, filter, options)
            .await;
        self.watch(result)
    }

    pub async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        let result = self
            .pipeline
            .query_with_lookup(self.adapter.as_ref(), collection, filter, options, lookup)
            .await;
        self.watch(result)
    }

    pub async fn count(&self, collection: &str, filter: &Value) -> Result<u64> {
        let result = self
            .pipeline
            .count(self.adapter.as_ref(), collection, filter)
            .await;
        self.watch(result)
    }

    pub async fn insert_one(&self, collection: &str, document: &Value) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .insert_one(self.adapter.as_ref(), collection, document)
            .await;
        self.watch(result)
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .insert_many(self.adapter.as_ref(), collection, documents)
            .await;
        self.watch(result)
    }

    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .update_one(self.adapter.as_ref(), collection, filter, update, upsert)
            .await;
        self.watch(result)
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .update_many(self.adapter.as_ref(), collection, filter, update, confirm)
            .await;
        self.watch(result)
    }

    pub async fn delete_one(&self, collection: &str, filter: &Value) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .delete_one(self.adapter.as_ref(), collection, filter)
            .await;
        self.watch(result)
    }

    pub async fn delete_many(
        &self,
        collection: &str,
        filter: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        let result = self
            .pipeline
            .delete_many(self.adapter.as_ref(), collection, filter, confirm)
            .await;
        self.watch(result)
    }

    /// Execute an ordered batch and return one accumulated receipt.
    pub async fn batch(&self, steps: Vec<BatchStep>) -> Result<WriteReceipt> {
        let result = run_batch(&self.pipeline, self.adapter.as_ref(), steps).await;
        let result = result.map(|receipt| {
            self.pipeline.logger.observe(&receipt);
            receipt
        });
        self.watch(result)
    }

    /// Run a closure inside a transactional scope. Commits on `Ok`,
    /// rolls back on `Err`.
    pub async fn with_transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let child: Arc<dyn DatabaseAdapter> = Arc::from(self.adapter.begin_transaction().await?);
        let scope = TransactionScope {
            pipeline: self.pipeline.clone(),
            adapter: Arc::clone(&child),
        };

        match f(scope).await {
            Ok(value) => {
                child.commit_transaction().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = child.rollback_transaction().await {
                    warn!("rollback failed: {}", rollback);
                }
                Err(err)
            }
        }
    }

    /// Per-collection discovery: declared fields, indexes, live count and
    /// a working example filter.
    pub async fn describe(&self) -> Result<Vec<CollectionDescription>> {
        let mut descriptions = Vec::new();
        for schema in SchemaRegistry::global().all() {
            let document_count = match self.adapter.document_count(&schema.name).await {
                Ok(count) => count,
                Err(e) => {
                    debug!(collection = %schema.name, "count unavailable: {}", e);
                    0
                }
            };
            let indexes = IndexRegistry::global()
                .for_collection(&schema.name)
                .into_iter()
                .map(|index| index.name)
                .collect();
            let fields = schema
                .fields
                .iter()
                .map(|field| DescribedField {
                    name: field.name.clone(),
                    field_type: field.kind.name().to_string(),
                    required: field.required,
                    enum_values: field.allowed_values.clone(),
                })
                .collect();

            descriptions.push(CollectionDescription {
                name: schema.name.clone(),
                fields,
                indexes,
                document_count,
                example_filter: schema.example_filter(),
            });
        }
        Ok(descriptions)
    }

    /// Dry-run a filter and/or document against the declared schema.
    pub async fn validate(
        &self,
        collection: &str,
        filter: Option<&Value>,
        document: Option<&Value>,
    ) -> Result<Vec<ValidationFailure>> {
        let registry = SchemaRegistry::global();
        let Some(schema) = registry.get(collection) else {
            return Err(
                unknown_collection(collection, &registry.collection_names())
                    .with_backend(self.backend())
                    .with_operation(Operation::Validate),
            );
        };

        let mut failures = Vec::new();

        if let Some(filter) = filter {
            let parsed = Filter::parse(filter)
                .map_err(|e| e.contextualize(self.backend(), Some(collection), Operation::Validate))?;
            let allowed = schema.field_names();
            for name in parsed.field_names() {
                if !allowed.iter().any(|field| field == name) {
                    failures.push(ValidationFailure {
                        field: name.to_string(),
                        message: format!(
                            "Field '{}' is not declared for '{}'.",
                            name, collection
                        ),
                        expected: format!("one of: {}", allowed.join(", ")),
                        received: name.to_string(),
                    });
                }
            }
        }

        if let Some(document) = document {
            match document.as_object() {
                Some(map) => failures.extend(schema.validate_document(map)),
                None => failures.push(ValidationFailure {
                    field: "$document".to_string(),
                    message: "Document must be a JSON object.".to_string(),
                    expected: "object".to_string(),
                    received: document.to_string(),
                }),
            }
        }

        Ok(failures)
    }

    /// Emit the native query that would execute, without running it.
    pub fn explain(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<ExplainOutput> {
        let backend = self.backend();
        let parsed =
            self.pipeline
                .prepare_filter(backend, collection, filter, Operation::Explain)?;

        match backend {
            Backend::MongoDb => {
                let native = mongo_convert::filter_to_bson(&parsed)?;
                let body = json!({
                    "filter": Value::Object(mongo_convert::bson_to_document(native)),
                    "options": options,
                });
                Ok(ExplainOutput::DocumentQuery { body })
            }
            Backend::Elastic => {
                let body = elastic::build_search_body(&parsed, options)?;
                Ok(ExplainOutput::SearchDsl { body })
            }
            backend => {
                let dialect = SqlDialect::for_backend(backend).ok_or_else(|| {
                    DbError::internal("Relational backend without a dialect.")
                })?;
                let statement = build_select(collection, &parsed, options, dialect)?;
                Ok(ExplainOutput::Sql {
                    sql: statement.sql,
                    params: statement.params,
                })
            }
        }
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let mut status = self.adapter.status().await?;
        status.reconnect = self.reconnect.status();
        self.pipeline.events.publish(DbEvent::PoolStatus {
            status: status.clone(),
        });
        Ok(status)
    }

    /// Create every registered collection on the backend.
    pub async fn ensure_collections(&self) -> Result<()> {
        self.adapter.ensure_collections().await
    }

    /// Create every registered index on the backend.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.adapter.ensure_indexes().await
    }

    /// Close the adapter and release driver resources.
    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await?;
        debug!("database closed");
        Ok(())
    }

    /// Close and publish the `shutdown` event with an exit code.
    pub async fn graceful_shutdown(&self, exit_code: i32) -> Result<()> {
        self.close().await?;
        info!(exit_code, "shutting down");
        self.pipeline.events.publish(DbEvent::Shutdown { exit_code });
        Ok(())
    }
}

/// A transactional scope: the same operation surface bound to a child
/// adapter sharing the parent's driver handle under a transaction token.
pub struct TransactionScope {
    pipeline: Pipeline,
    adapter: Arc<dyn DatabaseAdapter>,
}

impl TransactionScope {
    pub async fn query_one(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Document>> {
        self.pipeline
            .query_one(self.adapter.as_ref(), collection, filter, options)
            .await
    }

    pub async fn query_many(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        self.pipeline
            .query_many(self.adapter.as_ref(), collection, filter, options)
            .await
    }

    pub async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        self.pipeline
            .query_with_lookup(self.adapter.as_ref(), collection, filter, options, lookup)
            .await
    }

    pub async fn count(&self, collection: &str, filter: &Value) -> Result<u64> {
        self.pipeline
            .count(self.adapter.as_ref(), collection, filter)
            .await
    }

    pub async fn insert_one(&self, collection: &str, document: &Value) -> Result<WriteReceipt> {
        self.pipeline
            .insert_one(self.adapter.as_ref(), collection, document)
            .await
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> Result<WriteReceipt> {
        self.pipeline
            .insert_many(self.adapter.as_ref(), collection, documents)
            .await
    }

    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt> {
        self.pipeline
            .update_one(self.adapter.as_ref(), collection, filter, update, upsert)
            .await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        self.pipeline
            .update_many(self.adapter.as_ref(), collection, filter, update, confirm)
            .await
    }

    pub async fn delete_one(&self, collection: &str, filter: &Value) -> Result<WriteReceipt> {
        self.pipeline
            .delete_one(self.adapter.as_ref(), collection, filter)
            .await
    }

    pub async fn delete_many(
        &self,
        collection: &str,
        filter: &Value,
        confirm: Option<Confirm>,
    ) -> Result<WriteReceipt> {
        self.pipeline
            .delete_many(self.adapter.as_ref(), collection, filter, confirm)
            .await
    }
}
