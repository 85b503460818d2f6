//! Minimal SQL execution contract.
//!
//! Concrete connection-pool drivers stay outside this crate: the adapter
//! only needs to run a parameterized statement and read rows back as JSON
//! documents. A PostgreSQL executor ships in [`crate::postgres`]; MySQL,
//! MSSQL and SQLite arrive through the process-wide factory registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use omnibase_core::{DbConfig, DbError, Document, ErrorCode, PoolStatus, Result};
use omnibase_translate::SqlDialect;

/// One live SQL connection (or pool) able to run parameterized statements.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Driver crate name reported in `status`.
    fn driver_name(&self) -> &'static str;

    /// Run a statement and return its rows as documents.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Document>>;

    /// Run a statement and return the affected-row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Pool figures for `status`. Single-connection executors report one
    /// idle connection.
    fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            active: 0,
            idle: 1,
            waiting: 0,
            max: 1,
        }
    }

    /// Release the underlying connection(s).
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates executors for one dialect from a connection configuration.
#[async_trait]
pub trait SqlExecutorFactory: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    async fn create(&self, config: &DbConfig) -> Result<Arc<dyn SqlExecutor>>;
}

/// Process-wide executor factory registry.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: RwLock<HashMap<SqlDialect, Arc<dyn SqlExecutorFactory>>>,
}

static GLOBAL_EXECUTORS: OnceLock<ExecutorRegistry> = OnceLock::new();

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ExecutorRegistry {
        GLOBAL_EXECUTORS.get_or_init(ExecutorRegistry::new)
    }

    pub fn register(&self, factory: Arc<dyn SqlExecutorFactory>) {
        let dialect = factory.dialect();
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(dialect, factory);
    }

    pub fn get(&self, dialect: SqlDialect) -> Option<Arc<dyn SqlExecutorFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&dialect)
            .cloned()
    }

    /// Create an executor for the dialect, or explain how to plug one in.
    pub async fn create(
        &self,
        dialect: SqlDialect,
        config: &DbConfig,
    ) -> Result<Arc<dyn SqlExecutor>> {
        let factory = self.get(dialect).ok_or_else(|| {
            DbError::new(
                ErrorCode::ConnectionFailed,
                format!("No SQL driver is registered for {}.", dialect.backend()),
                format!(
                    "Register a SqlExecutorFactory for {} with ExecutorRegistry::global() before \
                     connecting.",
                    dialect.backend()
                ),
            )
        })?;
        factory.create(config).await
    }
}
