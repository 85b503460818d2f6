//! Dialect-generic relational adapter.
//!
//! All CRUD goes through the translator and builder; the executor only
//! ever sees finished parameterized statements. Single-row operations are
//! emulated per dialect (ctid / rowid subqueries, LIMIT 1, TOP(1)), and
//! upsert is update-then-insert-on-miss.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use omnibase_core::{
    redact_uri, Backend, ConnectionState, ConnectionStatus, DatabaseAdapter, DbConfig, DbError,
    Document, ErrorCode, FieldInfo, Filter, JoinKind, LookupSpec, Operation, Projection,
    QueryOptions, ReconnectStatus, Result, Update, WriteReceipt,
    CollectionIntrospection,
};
use omnibase_schema::{IndexRegistry, SchemaRegistry};
use omnibase_translate::{
    build_count, build_delete, build_delete_one, build_insert, build_insert_many, build_select,
    build_update, build_update_one, quote_ident, SqlDialect,
};

use crate::executor::{ExecutorRegistry, SqlExecutor};
use crate::postgres::PgExecutorFactory;

/// Relational adapter over any [`SqlExecutor`].
pub struct RelationalAdapter {
    backend: Backend,
    dialect: SqlDialect,
    executor: Arc<dyn SqlExecutor>,
    redacted_uri: String,
    database: Option<String>,
    connected_at: Instant,
    reconnect_enabled: bool,
    in_transaction: bool,
}

impl RelationalAdapter {
    /// Connect through the executor registry. The built-in PostgreSQL
    /// factory is registered on first use; other dialects must have been
    /// registered by the embedder.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let backend = Backend::from_uri(&config.uri)?;
        let dialect = SqlDialect::for_backend(backend).ok_or_else(|| {
            DbError::new(
                ErrorCode::ConnectionFailed,
                format!("{} is not a relational backend.", backend),
                "Use the matching adapter for this URI.",
            )
        })?;

        let registry = ExecutorRegistry::global();
        if dialect == SqlDialect::Postgres && registry.get(SqlDialect::Postgres).is_none() {
            registry.register(Arc::new(PgExecutorFactory));
        }
        let executor = registry.create(dialect, config).await?;

        let adapter = Self {
            backend,
            dialect,
            executor,
            redacted_uri: redact_uri(&config.uri),
            database: config.db_name.clone(),
            connected_at: Instant::now(),
            reconnect_enabled: config.reconnect.enabled,
            in_transaction: false,
        };
        adapter.connect_check().await?;
        Ok(adapter)
    }

    /// Wrap an existing executor. Used by tests and by embedders that
    /// manage their own driver.
    pub fn with_executor(
        backend: Backend,
        dialect: SqlDialect,
        executor: Arc<dyn SqlExecutor>,
        redacted_uri: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            dialect,
            executor,
            redacted_uri: redacted_uri.into(),
            database: None,
            connected_at: Instant::now(),
            reconnect_enabled: true,
            in_transaction: false,
        }
    }

    async fn connect_check(&self) -> Result<()> {
        self.executor.query("SELECT 1", &[]).await?;
        debug!(backend = %self.backend, "connection verified");
        Ok(())
    }

    fn contextualize(&self, err: DbError, collection: &str, operation: Operation) -> DbError {
        err.contextualize(self.backend, Some(collection), operation)
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let statement = build_select(collection, filter, options, self.dialect)?;
        let rows = self.executor.query(&statement.sql, &statement.params).await?;
        Ok(strip_excluded(rows, options.projection.as_ref()))
    }

    /// Compose the INSERT half of an upsert: filter equality fields
    /// unioned with the `$set` map, `$set` winning on conflicts.
    fn upsert_document(filter: &Filter, update: &Update) -> Result<Document> {
        let mut document = Document::new();
        for (field, value) in filter.equality_pairs() {
            document.insert(field.to_string(), value.clone());
        }
        for (field, value) in update.set_document() {
            document.insert(field, value);
        }
        if document.is_empty() {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "Upsert matched nothing and no insertable fields were given.".to_string(),
                "Provide equality fields in the filter or a $set map to insert from.",
            ));
        }
        Ok(document)
    }
}

fn strip_excluded(mut rows: Vec<Document>, projection: Option<&Projection>) -> Vec<Document> {
    if let Some(Projection::Exclude(fields)) = projection {
        for row in &mut rows {
            for field in fields {
                row.remove(field);
            }
        }
    }
    rows
}

fn count_from_row(rows: &[Document]) -> Result<u64> {
    let value = rows
        .first()
        .and_then(|row| row.get("count"))
        .ok_or_else(|| DbError::internal("COUNT query returned no rows."))?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .ok_or_else(|| DbError::internal("COUNT returned a non-integer value.")),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| DbError::internal("COUNT returned a non-numeric string.")),
        _ => Err(DbError::internal("COUNT returned an unexpected value.")),
    }
}

#[async_trait]
impl DatabaseAdapter for RelationalAdapter {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn connect(&self) -> Result<()> {
        self.connect_check().await
    }

    async fn close(&self) -> Result<()> {
        self.executor.close().await
    }

    async fn status(&self) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus {
            state: ConnectionState::Connected,
            backend: self.backend,
            driver: self.executor.driver_name().to_string(),
            redacted_uri: self.redacted_uri.clone(),
            database: self.database.clone(),
            uptime_ms: self.connected_at.elapsed().as_millis() as u64,
            pool: self.executor.pool_status(),
            reconnect: ReconnectStatus {
                enabled: self.reconnect_enabled,
                attempts: 0,
                last_disconnect: None,
            },
        })
    }

    async fn query_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Option<Document>> {
        let mut options = options.clone();
        options.limit = Some(1);
        let mut rows = self
            .fetch(collection, filter, &options)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::QueryOne))?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        self.fetch(collection, filter, options)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::QueryMany))
    }

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        let Some(mut primary) = self.query_one(collection, filter, options).await? else {
            return Ok(None);
        };

        let local_value = primary.get(&lookup.local_field).cloned().unwrap_or(Value::Null);
        if local_value.is_null() {
            return Ok(match lookup.join {
                JoinKind::Inner => None,
                JoinKind::Left => {
                    let related = if lookup.unwind {
                        Value::Null
                    } else {
                        Value::Array(Vec::new())
                    };
                    primary.insert(lookup.alias.clone(), related);
                    Some(primary)
                }
            });
        }

        let mut foreign_filter = Filter::empty();
        foreign_filter.clauses.push(omnibase_core::FilterClause::Field {
            name: lookup.foreign_field.clone(),
            condition: omnibase_core::FieldCondition::Eq(local_value),
        });
        let related = self
            .fetch(&lookup.from, &foreign_filter, &QueryOptions::new())
            .await
            .map_err(|e| self.contextualize(e, &lookup.from, Operation::QueryWithLookup))?;

        if related.is_empty() && lookup.join == JoinKind::Inner {
            return Ok(None);
        }

        let attached = if lookup.unwind {
            related
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null)
        } else {
            Value::Array(related.into_iter().map(Value::Object).collect())
        };
        primary.insert(lookup.alias.clone(), attached);
        Ok(Some(primary))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let statement = build_count(collection, filter, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::Count))?;
        let rows = self
            .executor
            .query(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::Count))?;
        count_from_row(&rows)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_insert(collection, &document, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::InsertOne))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::InsertOne))?;
        Ok(
            WriteReceipt::new(Operation::InsertOne, collection, self.backend)
                .with_inserted(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_insert_many(collection, &documents, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::InsertMany))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::InsertMany))?;
        Ok(
            WriteReceipt::new(Operation::InsertMany, collection, self.backend)
                .with_inserted(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_update_one(collection, filter, update, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::UpdateOne))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::UpdateOne))?;

        if affected == 0 && upsert {
            let document = Self::upsert_document(filter, update)
                .map_err(|e| self.contextualize(e, collection, Operation::UpdateOne))?;
            let insert = build_insert(collection, &document, self.dialect)
                .map_err(|e| self.contextualize(e, collection, Operation::UpdateOne))?;
            let inserted = self
                .executor
                .execute(&insert.sql, &insert.params)
                .await
                .map_err(|e| self.contextualize(e, collection, Operation::UpdateOne))?;
            return Ok(
                WriteReceipt::new(Operation::UpdateOne, collection, self.backend)
                    .with_inserted(inserted)
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            );
        }

        Ok(
            WriteReceipt::new(Operation::UpdateOne, collection, self.backend)
                .with_matched(affected)
                .with_modified(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_update(collection, filter, update, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::UpdateMany))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::UpdateMany))?;
        Ok(
            WriteReceipt::new(Operation::UpdateMany, collection, self.backend)
                .with_matched(affected)
                .with_modified(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_delete_one(collection, filter, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::DeleteOne))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::DeleteOne))?;
        Ok(
            WriteReceipt::new(Operation::DeleteOne, collection, self.backend)
                .with_deleted(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let statement = build_delete(collection, filter, self.dialect)
            .map_err(|e| self.contextualize(e, collection, Operation::DeleteMany))?;
        let affected = self
            .executor
            .execute(&statement.sql, &statement.params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::DeleteMany))?;
        Ok(
            WriteReceipt::new(Operation::DeleteMany, collection, self.backend)
                .with_deleted(affected)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseAdapter>> {
        if self.in_transaction {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "A transaction is already open on this scope.".to_string(),
                "Commit or roll back the current scope first.",
            ));
        }
        self.executor
            .execute(self.dialect.begin_transaction_sql(), &[])
            .await?;
        Ok(Box::new(Self {
            backend: self.backend,
            dialect: self.dialect,
            executor: Arc::clone(&self.executor),
            redacted_uri: self.redacted_uri.clone(),
            database: self.database.clone(),
            connected_at: self.connected_at,
            reconnect_enabled: self.reconnect_enabled,
            in_transaction: true,
        }))
    }

    async fn commit_transaction(&self) -> Result<()> {
        if !self.in_transaction {
            return Err(not_in_transaction());
        }
        self.executor.execute("COMMIT", &[]).await?;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        if !self.in_transaction {
            return Err(not_in_transaction());
        }
        self.executor.execute("ROLLBACK", &[]).await?;
        Ok(())
    }

    async fn ensure_collections(&self) -> Result<()> {
        for schema in SchemaRegistry::global().all() {
            let ddl = schema.ddl(self.dialect);
            debug!(collection = %schema.name, "ensuring table");
            self.executor.execute(&ddl, &[]).await?;
        }
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let registry = IndexRegistry::global();
        for collection in registry.collections() {
            for index in registry.for_collection(&collection) {
                let sql = index.create_sql(&collection, self.dialect);
                debug!(index = %index.name, "ensuring index");
                match self.executor.execute(&sql, &[]).await {
                    Ok(_) => {}
                    // Dialects without IF NOT EXISTS report an existing
                    // index as a duplicate; that is success here.
                    Err(e) if e.code == ErrorCode::DuplicateKey => {
                        warn!(index = %index.name, "index already exists");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn describe_collection(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionIntrospection>> {
        let (sql, params): (String, Vec<Value>) = match self.dialect {
            SqlDialect::Postgres => (
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_name = $1 ORDER BY ordinal_position"
                    .to_string(),
                vec![Value::String(collection.to_string())],
            ),
            SqlDialect::MySql => (
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position"
                    .to_string(),
                vec![Value::String(collection.to_string())],
            ),
            SqlDialect::Mssql => (
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_name = @p1 ORDER BY ordinal_position"
                    .to_string(),
                vec![Value::String(collection.to_string())],
            ),
            // PRAGMA takes no bound parameters.
            SqlDialect::Sqlite => (
                format!("PRAGMA table_info({})", quote_ident(collection)),
                Vec::new(),
            ),
        };

        let rows = self
            .executor
            .query(&sql, &params)
            .await
            .map_err(|e| self.contextualize(e, collection, Operation::Describe))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let fields = rows
            .iter()
            .map(|row| match self.dialect {
                SqlDialect::Sqlite => FieldInfo {
                    name: string_at(row, "name"),
                    field_type: string_at(row, "type"),
                    nullable: row.get("notnull").and_then(Value::as_i64) == Some(0),
                },
                _ => FieldInfo {
                    name: string_at(row, "column_name"),
                    field_type: string_at(row, "data_type"),
                    nullable: row
                        .get("is_nullable")
                        .and_then(Value::as_str)
                        .map(|v| v.eq_ignore_ascii_case("yes"))
                        .unwrap_or(true),
                },
            })
            .collect();

        Ok(Some(CollectionIntrospection {
            name: collection.to_string(),
            fields,
        }))
    }
}

fn string_at(row: &Document, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn not_in_transaction() -> DbError {
    DbError::new(
        ErrorCode::QueryError,
        "No transaction is open on this adapter.".to_string(),
        "Obtain a transactional scope with begin_transaction first.",
    )
}
