//! # omnibase-mongodb
//!
//! Document-store adapter. The filter algebra is MongoDB's native query
//! vocabulary, so filters and updates pass through as reconstructed BSON
//! rather than being translated. Transactions use driver sessions: the
//! transactional scope is a child adapter holding the session.

pub mod convert;

use async_trait::async_trait;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, ClientSession, Collection, IndexModel};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use omnibase_core::{
    map_mongo_error, redact_uri, Backend, ConnectionState, ConnectionStatus, DatabaseAdapter,
    DbConfig, DbError, Document, ErrorCode, FieldInfo, Filter, JoinKind, LookupSpec, Operation,
    PoolStatus, QueryOptions, ReconnectStatus, Result, Update, WriteReceipt,
    CollectionIntrospection,
};
use omnibase_schema::{IndexRegistry, SchemaRegistry};

use convert::{
    bson_to_document, document_to_bson, filter_to_bson, projection_to_bson, sort_to_bson,
    update_to_bson,
};

/// Document-store adapter.
pub struct MongoAdapter {
    client: Client,
    db_name: String,
    redacted_uri: String,
    pool_max: u32,
    connected_at: Instant,
    reconnect_enabled: bool,
    /// Present on transactional scopes only.
    session: Option<Mutex<ClientSession>>,
}

impl MongoAdapter {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        debug!("connecting to document store");

        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| map_driver_error(e, None))?;
        let pool_max = config.pool.max_connections();
        options.max_pool_size = Some(pool_max);

        let db_name = config
            .db_name
            .clone()
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| "test".to_string());

        let client = Client::with_options(options).map_err(|e| map_driver_error(e, None))?;

        let adapter = Self {
            client,
            db_name,
            redacted_uri: redact_uri(&config.uri),
            pool_max,
            connected_at: Instant::now(),
            reconnect_enabled: config.reconnect.enabled,
            session: None,
        };
        adapter.connect_check().await?;
        Ok(adapter)
    }

    async fn connect_check(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| map_driver_error(e, None))?;
        debug!(database = %self.db_name, "connection verified");
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.client.database(&self.db_name).collection(name)
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let native = filter_to_bson(filter)?;
        let coll = self.collection(collection);
        let mut find = coll.find(native);
        if !options.sort.is_empty() {
            find = find.sort(sort_to_bson(&options.sort));
        }
        if let Some(skip) = options.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = options.limit {
            find = find.limit(limit as i64);
        }
        if let Some(projection) = projection_to_bson(options) {
            find = find.projection(projection);
        }

        let raw: Vec<bson::Document> = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                let mut cursor = find
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
                let mut raw = Vec::new();
                while let Some(next) = cursor.next(&mut *session).await {
                    raw.push(next.map_err(|e| map_driver_error(e, Some(collection)))?);
                }
                raw
            }
            None => {
                let cursor = find
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
                cursor
                    .try_collect()
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
        };

        Ok(raw.into_iter().map(bson_to_document).collect())
    }
}

fn map_driver_error(e: mongodb::error::Error, collection: Option<&str>) -> DbError {
    let code = native_error_code(&e);
    map_mongo_error(code.as_deref(), &e.to_string(), collection).with_source(e)
}

fn native_error_code(e: &mongodb::error::Error) -> Option<String> {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*e.kind {
        ErrorKind::Command(command) => Some(command.code.to_string()),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code.to_string()),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => {
            Some(concern.code.to_string())
        }
        _ => None,
    }
}

/// Collection-already-exists is success for ensure_collections.
fn is_namespace_exists(e: &mongodb::error::Error) -> bool {
    native_error_code(e).as_deref() == Some("48") || e.to_string().contains("already exists")
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::String(_) => "string",
        Bson::Int32(_) | Bson::Int64(_) => "integer",
        Bson::Double(_) => "double",
        Bson::Boolean(_) => "boolean",
        Bson::DateTime(_) => "date",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::ObjectId(_) => "objectId",
        Bson::Null => "null",
        _ => "unknown",
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn backend(&self) -> Backend {
        Backend::MongoDb
    }

    async fn connect(&self) -> Result<()> {
        self.connect_check().await
    }

    async fn close(&self) -> Result<()> {
        debug!("closing document-store adapter");
        // The driver tears its pool down when the last clone drops.
        Ok(())
    }

    async fn status(&self) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus {
            state: ConnectionState::Connected,
            backend: Backend::MongoDb,
            driver: "mongodb".to_string(),
            redacted_uri: self.redacted_uri.clone(),
            database: Some(self.db_name.clone()),
            uptime_ms: self.connected_at.elapsed().as_millis() as u64,
            pool: PoolStatus {
                active: 0,
                idle: 0,
                waiting: 0,
                max: self.pool_max,
            },
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
        let mut rows = self.fetch(collection, filter, &options).await?;
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
        self.fetch(collection, filter, options).await
    }

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
        lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        let mut pipeline = vec![doc! {"$match": filter_to_bson(filter)?}];
        if !options.sort.is_empty() {
            pipeline.push(doc! {"$sort": sort_to_bson(&options.sort)});
        }
        pipeline.push(doc! {"$limit": 1});
        pipeline.push(doc! {"$lookup": {
            "from": lookup.from.clone(),
            "localField": lookup.local_field.clone(),
            "foreignField": lookup.foreign_field.clone(),
            "as": lookup.alias.clone(),
        }});
        if lookup.unwind {
            pipeline.push(doc! {"$unwind": {
                "path": format!("${}", lookup.alias),
                "preserveNullAndEmptyArrays": lookup.join == JoinKind::Left,
            }});
        }

        let coll = self.collection(collection);
        let aggregate = coll.aggregate(pipeline);
        let raw: Vec<bson::Document> = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                let mut cursor = aggregate
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
                let mut raw = Vec::new();
                while let Some(next) = cursor.next(&mut *session).await {
                    raw.push(next.map_err(|e| map_driver_error(e, Some(collection)))?);
                }
                raw
            }
            None => {
                let cursor = aggregate
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
                cursor
                    .try_collect()
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
        };

        let Some(primary) = raw.into_iter().next().map(bson_to_document) else {
            return Ok(None);
        };

        // Without $unwind an inner join with no related rows is not-found.
        if !lookup.unwind && lookup.join == JoinKind::Inner {
            let empty = primary
                .get(&lookup.alias)
                .and_then(|v| v.as_array())
                .map(|related| related.is_empty())
                .unwrap_or(true);
            if empty {
                return Ok(None);
            }
        }

        Ok(Some(primary))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let native = filter_to_bson(filter)?;
        let coll = self.collection(collection);
        let count = coll.count_documents(native);
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                count
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))
            }
            None => count
                .await
                .map_err(|e| map_driver_error(e, Some(collection))),
        }
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteReceipt> {
        let started = Instant::now();
        let native = document_to_bson(&document)?;
        let coll = self.collection(collection);
        let insert = coll.insert_one(native);
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                insert
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
            }
            None => {
                insert
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?;
            }
        }
        Ok(
            WriteReceipt::new(Operation::InsertOne, collection, Backend::MongoDb)
                .with_inserted(1)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        if documents.is_empty() {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "Nothing to insert.".to_string(),
                "Provide at least one non-empty document.",
            ));
        }
        let native = documents
            .iter()
            .map(document_to_bson)
            .collect::<Result<Vec<_>>>()?;

        let coll = self.collection(collection);
        let insert = coll.insert_many(native);
        let inserted = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                insert
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
                    .inserted_ids
                    .len() as u64
            }
            None => {
                insert
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
                    .inserted_ids
                    .len() as u64
            }
        };

        Ok(
            WriteReceipt::new(Operation::InsertMany, collection, Backend::MongoDb)
                .with_inserted(inserted)
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
        let native_filter = filter_to_bson(filter)?;
        let native_update = update_to_bson(update)?;

        let coll = self.collection(collection);
        let action = coll.update_one(native_filter, native_update).upsert(upsert);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                action
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
            None => action
                .await
                .map_err(|e| map_driver_error(e, Some(collection)))?,
        };

        let mut receipt = WriteReceipt::new(Operation::UpdateOne, collection, Backend::MongoDb)
            .with_matched(result.matched_count)
            .with_modified(result.modified_count)
            .with_duration_ms(started.elapsed().as_millis() as u64);
        if result.upserted_id.is_some() {
            receipt.inserted_count = 1;
        }
        Ok(receipt)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let action = coll.update_many(filter_to_bson(filter)?, update_to_bson(update)?);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                action
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
            None => action
                .await
                .map_err(|e| map_driver_error(e, Some(collection)))?,
        };

        Ok(
            WriteReceipt::new(Operation::UpdateMany, collection, Backend::MongoDb)
                .with_matched(result.matched_count)
                .with_modified(result.modified_count)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let action = coll.delete_one(filter_to_bson(filter)?);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                action
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
            None => action
                .await
                .map_err(|e| map_driver_error(e, Some(collection)))?,
        };

        Ok(
            WriteReceipt::new(Operation::DeleteOne, collection, Backend::MongoDb)
                .with_deleted(result.deleted_count)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let action = coll.delete_many(filter_to_bson(filter)?);
        let result = match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                action
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_driver_error(e, Some(collection)))?
            }
            None => action
                .await
                .map_err(|e| map_driver_error(e, Some(collection)))?,
        };

        Ok(
            WriteReceipt::new(Operation::DeleteMany, collection, Backend::MongoDb)
                .with_deleted(result.deleted_count)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseAdapter>> {
        if self.session.is_some() {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "A transaction is already open on this scope.".to_string(),
                "Commit or roll back the current scope first.",
            ));
        }

        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| map_driver_error(e, None))?;
        session
            .start_transaction()
            .await
            .map_err(|e| map_driver_error(e, None))?;

        Ok(Box::new(Self {
            client: self.client.clone(),
            db_name: self.db_name.clone(),
            redacted_uri: self.redacted_uri.clone(),
            pool_max: self.pool_max,
            connected_at: self.connected_at,
            reconnect_enabled: self.reconnect_enabled,
            session: Some(Mutex::new(session)),
        }))
    }

    async fn commit_transaction(&self) -> Result<()> {
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| map_driver_error(e, None))
            }
            None => Err(not_in_transaction()),
        }
    }

    async fn rollback_transaction(&self) -> Result<()> {
        match &self.session {
            Some(session) => {
                let mut session = session.lock().await;
                session
                    .abort_transaction()
                    .await
                    .map_err(|e| map_driver_error(e, None))
            }
            None => Err(not_in_transaction()),
        }
    }

    async fn ensure_collections(&self) -> Result<()> {
        let db = self.client.database(&self.db_name);
        for name in SchemaRegistry::global().collection_names() {
            match db.create_collection(&name).await {
                Ok(()) => debug!(collection = %name, "collection created"),
                Err(e) if is_namespace_exists(&e) => {
                    warn!(collection = %name, "collection already exists")
                }
                Err(e) => return Err(map_driver_error(e, Some(&name))),
            }
        }
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let registry = IndexRegistry::global();
        for collection in registry.collections() {
            for index in registry.for_collection(&collection) {
                let model = IndexModel::builder()
                    .keys(sort_to_bson(&index.fields))
                    .options(
                        IndexOptions::builder()
                            .name(index.name.clone())
                            .unique(index.unique)
                            .build(),
                    )
                    .build();
                self.collection(&collection)
                    .create_index(model)
                    .await
                    .map_err(|e| map_driver_error(e, Some(&collection)))?;
            }
        }
        Ok(())
    }

    async fn describe_collection(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionIntrospection>> {
        let sample = self
            .collection(collection)
            .find_one(doc! {})
            .await
            .map_err(|e| map_driver_error(e, Some(collection)))?;

        let Some(sample) = sample else {
            return Ok(None);
        };

        // Schema is inferred from one sampled document.
        let fields = sample
            .iter()
            .map(|(name, value)| FieldInfo {
                name: name.clone(),
                field_type: bson_type_name(value).to_string(),
                nullable: true,
            })
            .collect();

        Ok(Some(CollectionIntrospection {
            name: collection.to_string(),
            fields,
        }))
    }

    async fn document_count(&self, collection: &str) -> Result<u64> {
        self.collection(collection)
            .estimated_document_count()
            .await
            .map_err(|e| map_driver_error(e, Some(collection)))
    }
}

fn not_in_transaction() -> DbError {
    DbError::new(
        ErrorCode::QueryError,
        "No transaction is open on this adapter.".to_string(),
        "Obtain a transactional scope with begin_transaction first.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bson_types_are_named_for_introspection() {
        assert_eq!(bson_type_name(&Bson::String("x".into())), "string");
        assert_eq!(bson_type_name(&Bson::Int64(1)), "integer");
        assert_eq!(bson_type_name(&Bson::Boolean(true)), "boolean");
        assert_eq!(bson_type_name(&Bson::Array(vec![])), "array");
    }
}
