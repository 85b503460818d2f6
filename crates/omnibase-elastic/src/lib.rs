//! # omnibase-elastic
//!
//! Search-engine adapter speaking the REST API. Queries go through the
//! DSL translator, mutations through `_update_by_query` /
//! `_delete_by_query` with painless scripts, bulk ingestion through
//! `_bulk`. The engine has no transactions; `begin_transaction` reports
//! `UNSUPPORTED_OPERATION` via the contract default.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use omnibase_core::{
    map_elastic_error, redact_uri, Backend, ConnectionState, ConnectionStatus, DatabaseAdapter,
    DbConfig, DbError, Document, ErrorCode, FieldInfo, Filter, JoinKind, LookupSpec, Operation,
    PoolStatus, Projection, QueryOptions, ReconnectStatus, Result, Update, WriteReceipt,
    CollectionIntrospection,
};
use omnibase_schema::SchemaRegistry;
use omnibase_translate::elastic::{build_search_body, translate_filter, translate_update};

/// Search-engine adapter.
pub struct ElasticAdapter {
    http: reqwest::Client,
    base_url: String,
    redacted_uri: String,
    connected_at: Instant,
    reconnect_enabled: bool,
    sniff_on_start: bool,
}

impl ElasticAdapter {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        debug!("connecting to search engine");

        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.elastic.api_key {
            let value = HeaderValue::from_str(&format!("ApiKey {}", api_key)).map_err(|e| {
                DbError::new(
                    ErrorCode::AuthenticationFailed,
                    "The configured API key is not a valid header value.".to_string(),
                    "Check the elastic.apiKey setting for stray whitespace or control characters.",
                )
                .with_source(e)
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        if config.elastic.ca_fingerprint.is_some() {
            // Fingerprint pinning needs a caller-built TLS stack; the
            // setting is accepted so configs stay portable.
            warn!("elastic.caFingerprint is set but TLS pinning is delegated to the embedder");
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| map_transport_error(e, None))?;

        let adapter = Self {
            http,
            base_url: config.uri.trim_end_matches('/').to_string(),
            redacted_uri: redact_uri(&config.uri),
            connected_at: Instant::now(),
            reconnect_enabled: config.reconnect.enabled,
            sniff_on_start: config.elastic.sniff_on_start,
        };
        adapter.connect_check().await?;
        Ok(adapter)
    }

    async fn connect_check(&self) -> Result<()> {
        self.request(Method::GET, "", None, None).await?;
        if self.sniff_on_start {
            // Best-effort topology sniff; failures are not fatal.
            match self.request(Method::GET, "/_nodes/http", None, None).await {
                Ok(nodes) => {
                    let count = nodes["nodes"].as_object().map(|n| n.len()).unwrap_or(0);
                    debug!(nodes = count, "sniffed cluster topology");
                }
                Err(e) => warn!("node sniff failed: {}", e),
            }
        }
        debug!("connection verified");
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        collection: Option<&str>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, collection))?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(payload);
        }
        Err(map_response_error(status, &payload, collection))
    }

    /// `_bulk` takes newline-delimited JSON rather than one body object.
    async fn bulk(&self, lines: Vec<Value>, collection: &str) -> Result<Value> {
        let mut body = String::new();
        for line in &lines {
            body.push_str(&line.to_string());
            body.push('\n');
        }

        let url = format!("{}/_bulk", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, Some(collection)))?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(payload);
        }
        Err(map_response_error(status, &payload, Some(collection)))
    }

    fn hits_to_documents(payload: &Value, projection: Option<&Projection>) -> Vec<Document> {
        let hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
        hits.into_iter()
            .filter_map(|hit| match hit.get("_source") {
                Some(Value::Object(source)) => {
                    let mut document = source.clone();
                    if let Some(Projection::Exclude(fields)) = projection {
                        for field in fields {
                            document.remove(field);
                        }
                    }
                    Some(document)
                }
                _ => None,
            })
            .collect()
    }
}

fn map_transport_error(e: reqwest::Error, collection: Option<&str>) -> DbError {
    map_elastic_error(None, &e.to_string(), collection).with_source(e)
}

fn map_response_error(status: StatusCode, payload: &Value, collection: Option<&str>) -> DbError {
    let error_type = payload["error"]["type"].as_str().map(str::to_string);
    let reason = payload["error"]["reason"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("request failed with status {}", status));
    let code = error_type.unwrap_or_else(|| status.as_u16().to_string());
    map_elastic_error(Some(&code), &reason, collection)
}

#[async_trait]
impl DatabaseAdapter for ElasticAdapter {
    fn backend(&self) -> Backend {
        Backend::Elastic
    }

    async fn connect(&self) -> Result<()> {
        self.connect_check().await
    }

    async fn close(&self) -> Result<()> {
        debug!("closing search-engine adapter");
        Ok(())
    }

    async fn status(&self) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus {
            state: ConnectionState::Connected,
            backend: Backend::Elastic,
            driver: "reqwest".to_string(),
            redacted_uri: self.redacted_uri.clone(),
            database: None,
            uptime_ms: self.connected_at.elapsed().as_millis() as u64,
            pool: PoolStatus {
                active: 0,
                idle: 0,
                waiting: 0,
                max: 0,
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
        let mut rows = self.query_many(collection, filter, &options).await?;
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
        let body = build_search_body(filter, options)?;
        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_search", collection),
                Some(body),
                Some(collection),
            )
            .await?;
        Ok(Self::hits_to_documents(
            &payload,
            options.projection.as_ref(),
        ))
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

        let local_value = primary
            .get(&lookup.local_field)
            .cloned()
            .unwrap_or(Value::Null);
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

        let body = json!({"query": {"term": {lookup.foreign_field.as_str(): local_value}}});
        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_search", lookup.from),
                Some(body),
                Some(&lookup.from),
            )
            .await?;
        let related = Self::hits_to_documents(&payload, None);

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
        let body = json!({"query": translate_filter(filter)?});
        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_count", collection),
                Some(body),
                Some(collection),
            )
            .await?;
        Ok(payload["count"].as_u64().unwrap_or(0))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteReceipt> {
        let started = Instant::now();
        self.request(
            Method::POST,
            &format!("/{}/_doc", collection),
            Some(Value::Object(document)),
            Some(collection),
        )
        .await?;
        Ok(
            WriteReceipt::new(Operation::InsertOne, collection, Backend::Elastic)
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

        let mut lines = Vec::with_capacity(documents.len() * 2);
        for document in documents {
            lines.push(json!({"index": {"_index": collection}}));
            lines.push(Value::Object(document));
        }
        let payload = self.bulk(lines, collection).await?;

        let items = payload["items"].as_array().cloned().unwrap_or_default();
        let inserted = items
            .iter()
            .filter(|item| {
                item["index"]["status"]
                    .as_u64()
                    .map(|status| status < 300)
                    .unwrap_or(false)
            })
            .count() as u64;

        let mut receipt = WriteReceipt::new(Operation::InsertMany, collection, Backend::Elastic)
            .with_inserted(inserted)
            .with_duration_ms(started.elapsed().as_millis() as u64);
        receipt.success = !payload["errors"].as_bool().unwrap_or(false);
        Ok(receipt)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let mut body = json!({"query": translate_filter(filter)?});
        if let Value::Object(script) = translate_update(update)? {
            for (key, value) in script {
                body[key] = value;
            }
        }

        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_update_by_query?max_docs=1&refresh=true", collection),
                Some(body),
                Some(collection),
            )
            .await?;
        let updated = payload["updated"].as_u64().unwrap_or(0);

        if updated == 0 && upsert {
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
                )
                .with_collection(collection));
            }
            self.request(
                Method::POST,
                &format!("/{}/_doc", collection),
                Some(Value::Object(document)),
                Some(collection),
            )
            .await?;
            return Ok(
                WriteReceipt::new(Operation::UpdateOne, collection, Backend::Elastic)
                    .with_inserted(1)
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            );
        }

        Ok(
            WriteReceipt::new(Operation::UpdateOne, collection, Backend::Elastic)
                .with_matched(payload["total"].as_u64().unwrap_or(updated))
                .with_modified(updated)
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
        let mut body = json!({"query": translate_filter(filter)?});
        if let Value::Object(script) = translate_update(update)? {
            for (key, value) in script {
                body[key] = value;
            }
        }

        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_update_by_query?refresh=true", collection),
                Some(body),
                Some(collection),
            )
            .await?;

        Ok(
            WriteReceipt::new(Operation::UpdateMany, collection, Backend::Elastic)
                .with_matched(payload["total"].as_u64().unwrap_or(0))
                .with_modified(payload["updated"].as_u64().unwrap_or(0))
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let body = json!({"query": translate_filter(filter)?});
        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_delete_by_query?max_docs=1&refresh=true", collection),
                Some(body),
                Some(collection),
            )
            .await?;

        Ok(
            WriteReceipt::new(Operation::DeleteOne, collection, Backend::Elastic)
                .with_deleted(payload["deleted"].as_u64().unwrap_or(0))
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<WriteReceipt> {
        let started = Instant::now();
        let body = json!({"query": translate_filter(filter)?});
        let payload = self
            .request(
                Method::POST,
                &format!("/{}/_delete_by_query?refresh=true", collection),
                Some(body),
                Some(collection),
            )
            .await?;

        Ok(
            WriteReceipt::new(Operation::DeleteMany, collection, Backend::Elastic)
                .with_deleted(payload["deleted"].as_u64().unwrap_or(0))
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    async fn ensure_collections(&self) -> Result<()> {
        for schema in SchemaRegistry::global().all() {
            let result = self
                .request(
                    Method::PUT,
                    &format!("/{}", schema.name),
                    Some(schema.elastic_mapping()),
                    Some(&schema.name),
                )
                .await;
            match result {
                Ok(_) => debug!(index = %schema.name, "index created"),
                // resource_already_exists_exception normalizes to
                // DUPLICATE_KEY; that is success here.
                Err(e) if e.code == ErrorCode::DuplicateKey => {
                    warn!(index = %schema.name, "index already exists")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        // Secondary indexes have no meaning here: every mapped field is
        // searchable, so declared indexes are satisfied by the mapping.
        debug!("ensure_indexes is a no-op for the search engine");
        Ok(())
    }

    async fn describe_collection(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionIntrospection>> {
        let payload = match self
            .request(
                Method::GET,
                &format!("/{}/_mapping", collection),
                None,
                Some(collection),
            )
            .await
        {
            Ok(payload) => payload,
            Err(e) if e.code == ErrorCode::CollectionNotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let properties = payload[collection]["mappings"]["properties"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        let fields = properties
            .iter()
            .map(|(name, spec)| FieldInfo {
                name: name.clone(),
                field_type: spec["type"].as_str().unwrap_or("object").to_string(),
                nullable: true,
            })
            .collect();

        Ok(Some(CollectionIntrospection {
            name: collection.to_string(),
            fields,
        }))
    }

    async fn document_count(&self, collection: &str) -> Result<u64> {
        self.count(collection, &Filter::empty()).await
    }
}
