//! End-to-end pipeline tests over a recording adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use omnibase::{
    Backend, BatchStep, CollectionSchema, Confirm, ConnectionState, ConnectionStatus, Database,
    DatabaseAdapter, DbConfig, DbError, DbEvent, Document, ErrorCode, FieldSelector, FieldSpec,
    Filter, LookupSpec, Operation, QueryOptions, Result, SanitizeRule, SchemaRegistry,
    TimestampConfig, Update, WriteReceipt, ExplainOutput,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    InsertOne(String, Document),
    InsertMany(String, usize),
    UpdateOne(String),
    UpdateMany(String),
    DeleteOne(String),
    DeleteMany(String),
    Begin,
    Commit,
    Rollback,
}

struct MockAdapter {
    backend: Backend,
    transactional: bool,
    in_transaction: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockAdapter {
    fn new(backend: Backend) -> Arc<Self> {
        Arc::new(Self {
            backend,
            transactional: false,
            in_transaction: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn transactional(backend: Backend) -> Arc<Self> {
        Arc::new(Self {
            backend,
            transactional: true,
            in_transaction: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn status(&self) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus {
            state: ConnectionState::Connected,
            backend: self.backend,
            driver: "mock".into(),
            redacted_uri: "mock://".into(),
            database: None,
            uptime_ms: 0,
            pool: Default::default(),
            reconnect: Default::default(),
        })
    }

    async fn query_one(
        &self,
        _collection: &str,
        _filter: &Filter,
        _options: &QueryOptions,
    ) -> Result<Option<Document>> {
        Ok(None)
    }

    async fn query_many(
        &self,
        _collection: &str,
        _filter: &Filter,
        _options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn query_with_lookup(
        &self,
        _collection: &str,
        _filter: &Filter,
        _options: &QueryOptions,
        _lookup: &LookupSpec,
    ) -> Result<Option<Document>> {
        Ok(None)
    }

    async fn count(&self, _collection: &str, _filter: &Filter) -> Result<u64> {
        Ok(0)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteReceipt> {
        self.record(Call::InsertOne(collection.to_string(), document));
        Ok(WriteReceipt::new(Operation::InsertOne, collection, self.backend).with_inserted(1))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt> {
        self.record(Call::InsertMany(collection.to_string(), documents.len()));
        Ok(
            WriteReceipt::new(Operation::InsertMany, collection, self.backend)
                .with_inserted(documents.len() as u64),
        )
    }

    async fn update_one(
        &self,
        collection: &str,
        _filter: &Filter,
        _update: &Update,
        _upsert: bool,
    ) -> Result<WriteReceipt> {
        self.record(Call::UpdateOne(collection.to_string()));
        Ok(WriteReceipt::new(Operation::UpdateOne, collection, self.backend)
            .with_matched(1)
            .with_modified(1))
    }

    async fn update_many(
        &self,
        collection: &str,
        _filter: &Filter,
        _update: &Update,
    ) -> Result<WriteReceipt> {
        self.record(Call::UpdateMany(collection.to_string()));
        Ok(WriteReceipt::new(Operation::UpdateMany, collection, self.backend)
            .with_matched(2)
            .with_modified(2))
    }

    async fn delete_one(&self, collection: &str, _filter: &Filter) -> Result<WriteReceipt> {
        self.record(Call::DeleteOne(collection.to_string()));
        Ok(WriteReceipt::new(Operation::DeleteOne, collection, self.backend).with_deleted(1))
    }

    async fn delete_many(&self, collection: &str, _filter: &Filter) -> Result<WriteReceipt> {
        self.record(Call::DeleteMany(collection.to_string()));
        Ok(WriteReceipt::new(Operation::DeleteMany, collection, self.backend).with_deleted(3))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseAdapter>> {
        if !self.transactional {
            return Err(DbError::unsupported(
                "mock has no transactions.".to_string(),
                "run steps directly.",
            ));
        }
        self.record(Call::Begin);
        Ok(Box::new(Self {
            backend: self.backend,
            transactional: true,
            in_transaction: true,
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn commit_transaction(&self) -> Result<()> {
        assert!(self.in_transaction);
        self.record(Call::Commit);
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        assert!(self.in_transaction);
        self.record(Call::Rollback);
        Ok(())
    }

    async fn describe_collection(
        &self,
        _collection: &str,
    ) -> Result<Option<omnibase::CollectionIntrospection>> {
        Ok(None)
    }
}

fn database(adapter: Arc<MockAdapter>, config: DbConfig) -> Database {
    Database::with_adapter(config, adapter)
}

fn base_config() -> DbConfig {
    DbConfig::new("postgresql://localhost/app")
}

#[tokio::test]
async fn batch_receipt_sums_per_step_counts() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(Arc::clone(&adapter), base_config());

    let receipt = db
        .batch(vec![
            BatchStep::InsertOne {
                collection: "a".into(),
                document: json!({"x": 1}),
            },
            BatchStep::InsertMany {
                collection: "a".into(),
                documents: vec![json!({"x": 2}), json!({"x": 3})],
            },
            BatchStep::UpdateMany {
                collection: "b".into(),
                filter: json!({"x": 1}),
                update: json!({"$set": {"y": 2}}),
                confirm: None,
            },
            BatchStep::DeleteMany {
                collection: "c".into(),
                filter: json!({"x": 1}),
                confirm: None,
            },
        ])
        .await
        .unwrap();

    assert_eq!(receipt.operation, Operation::Batch);
    assert_eq!(receipt.collection, "batch");
    assert_eq!(receipt.inserted_count, 3);
    assert_eq!(receipt.modified_count, 2);
    assert_eq!(receipt.deleted_count, 3);
    assert!(receipt.success);
}

#[tokio::test]
async fn batch_runs_under_a_transaction_when_supported() {
    let adapter = MockAdapter::transactional(Backend::Postgres);
    let db = database(Arc::clone(&adapter), base_config());

    db.batch(vec![BatchStep::InsertOne {
        collection: "a".into(),
        document: json!({"x": 1}),
    }])
    .await
    .unwrap();

    let calls = adapter.calls();
    assert_eq!(calls.first(), Some(&Call::Begin));
    assert_eq!(calls.last(), Some(&Call::Commit));
}

#[tokio::test]
async fn guardrail_blocks_unconfirmed_delete_many_and_publishes() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(Arc::clone(&adapter), base_config());
    let mut events = db.events();

    let err = db.delete_many("users", &json!({}), None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::GuardrailBlocked);
    assert!(err.fix.contains("DELETE_ALL"));
    assert!(adapter.calls().is_empty());

    match events.recv().await.unwrap() {
        DbEvent::GuardrailBlocked { operation, .. } => assert_eq!(operation, "delete_many"),
        other => panic!("unexpected event {:?}", other),
    }

    // With the token the operation reaches the adapter.
    db.delete_many("users", &json!({}), Some(Confirm::DeleteAll))
        .await
        .unwrap();
    assert_eq!(adapter.calls(), vec![Call::DeleteMany("users".into())]);
}

#[tokio::test]
async fn query_many_requires_a_limit_through_the_facade() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(adapter, base_config());

    let err = db
        .query_many("users", &json!({}), &QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GuardrailBlocked);

    db.query_many("users", &json!({}), &QueryOptions::new().with_limit(10))
        .await
        .unwrap();
}

#[tokio::test]
async fn timestamps_are_injected_on_insert() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let config = base_config().with_timestamps(TimestampConfig::enabled());
    let db = database(Arc::clone(&adapter), config);

    db.insert_one("events_ts", &json!({"kind": "click"}))
        .await
        .unwrap();

    match &adapter.calls()[0] {
        Call::InsertOne(_, document) => {
            assert!(document.contains_key("created_at"));
            assert!(document.contains_key("updated_at"));
            assert_eq!(document.get("kind"), Some(&json!("click")));
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn sanitize_rules_run_before_the_adapter() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let config = base_config().with_sanitize_rule(SanitizeRule::new(
        FieldSelector::One("email".into()),
        |v| match v.as_str() {
            Some(s) => json!(s.trim().to_lowercase()),
            None => v.clone(),
        },
    ));
    let db = database(Arc::clone(&adapter), config);

    db.insert_one("users_rules", &json!({"email": "  A@B.C  "}))
        .await
        .unwrap();

    match &adapter.calls()[0] {
        Call::InsertOne(_, document) => {
            assert_eq!(document.get("email"), Some(&json!("a@b.c")));
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn schema_validation_aborts_before_the_adapter() {
    SchemaRegistry::global().register(
        CollectionSchema::new("pipeline_validated_users")
            .field(FieldSpec::string("email").required())
            .field(FieldSpec::integer("age")),
    );

    let adapter = MockAdapter::new(Backend::Postgres);
    let config = base_config().with_schema_validation(true);
    let db = database(Arc::clone(&adapter), config);

    let err = db
        .insert_one("pipeline_validated_users", &json!({"age": "old"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(adapter.calls().is_empty());

    // One bad document aborts the whole insert_many.
    let err = db
        .insert_many(
            "pipeline_validated_users",
            &[json!({"email": "a@b.c"}), json!({"age": "old"})],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn relational_whitelist_applies_when_a_schema_is_registered() {
    SchemaRegistry::global().register(
        CollectionSchema::new("pipeline_whitelisted_users")
            .field(FieldSpec::string("role"))
            .field(FieldSpec::integer("age")),
    );

    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(adapter, base_config());

    let err = db
        .query_one(
            "pipeline_whitelisted_users",
            &json!({"bogus": 1}),
            &QueryOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryError);
    assert!(err.fix.contains("role"));

    db.query_one(
        "pipeline_whitelisted_users",
        &json!({"role": "admin"}),
        &QueryOptions::new(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn elastic_reserved_fields_and_index_names_are_blocked() {
    let adapter = MockAdapter::new(Backend::Elastic);
    let db = database(adapter, DbConfig::new("http://localhost:9200"));

    let err = db
        .query_one("users", &json!({"_id": "x"}), &QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryError);

    let err = db
        .query_one("bad index", &json!({"a": 1}), &QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryError);
}

#[tokio::test]
async fn explain_emits_dialect_correct_sql_without_executing() {
    let adapter = MockAdapter::new(Backend::Mssql);
    let db = database(Arc::clone(&adapter), DbConfig::new("mssql://localhost/app"));

    let output = db
        .explain(
            "users",
            &json!({}),
            &QueryOptions::new().with_skip(20).with_limit(10),
        )
        .unwrap();
    match output {
        ExplainOutput::Sql { sql, params } => {
            assert_eq!(
                sql,
                "SELECT * FROM \"users\" ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
            );
            assert!(params.is_empty());
        }
        other => panic!("unexpected explain output {:?}", other),
    }
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn explain_emits_search_dsl_for_the_search_backend() {
    let adapter = MockAdapter::new(Backend::Elastic);
    let db = database(adapter, DbConfig::new("http://localhost:9200"));

    let output = db
        .explain(
            "users",
            &json!({"role": "admin"}),
            &QueryOptions::new().with_limit(5),
        )
        .unwrap();
    match output {
        ExplainOutput::SearchDsl { body } => {
            assert_eq!(body["query"], json!({"term": {"role": "admin"}}));
            assert_eq!(body["size"], json!(5));
        }
        other => panic!("unexpected explain output {:?}", other),
    }
}

#[tokio::test]
async fn with_transaction_commits_on_ok_and_rolls_back_on_err() {
    let adapter = MockAdapter::transactional(Backend::Postgres);
    let db = database(Arc::clone(&adapter), base_config());

    db.with_transaction(|scope| async move {
        scope.insert_one("a", &json!({"x": 1})).await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(adapter.calls().last(), Some(&Call::Commit));

    let err = db
        .with_transaction(|_scope| async move {
            Err::<(), _>(DbError::new(
                ErrorCode::QueryError,
                "forced failure.".to_string(),
                "none.",
            ))
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryError);
    assert_eq!(adapter.calls().last(), Some(&Call::Rollback));
}

#[tokio::test]
async fn validate_reports_filter_and_document_failures() {
    SchemaRegistry::global().register(
        CollectionSchema::new("pipeline_validate_target")
            .field(
                FieldSpec::string("status")
                    .required()
                    .with_allowed_values(["open".to_string(), "closed".to_string()]),
            )
            .field(FieldSpec::integer("priority")),
    );

    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(adapter, base_config());

    let failures = db
        .validate(
            "pipeline_validate_target",
            Some(&json!({"nope": 1})),
            Some(&json!({"status": "wontfix"})),
        )
        .await
        .unwrap();
    let fields: Vec<&str> = failures.iter().map(|f| f.field.as_str()).collect();
    assert!(fields.contains(&"nope"));
    assert!(fields.contains(&"status"));

    // Unknown collections get a nearest-name suggestion.
    let err = db
        .validate("pipeline_validate_targef", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::CollectionNotFound);
    assert!(err.fix.contains("pipeline_validate_target"));
}

#[tokio::test]
async fn operation_events_flow_from_receipts() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(adapter, base_config());
    let mut events = db.events();

    db.insert_one("audit_events", &json!({"x": 1})).await.unwrap();

    match events.recv().await.unwrap() {
        DbEvent::Operation { receipt } => {
            assert_eq!(receipt.collection, "audit_events");
            assert_eq!(receipt.inserted_count, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn shutdown_publishes_the_exit_code() {
    let adapter = MockAdapter::new(Backend::Postgres);
    let db = database(adapter, base_config());
    let mut events = db.events();

    db.graceful_shutdown(0).await.unwrap();

    match events.recv().await.unwrap() {
        DbEvent::Shutdown { exit_code } => assert_eq!(exit_code, 0),
        other => panic!("unexpected event {:?}", other),
    }
}
