//! Built-in PostgreSQL executor on tokio-postgres.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use omnibase_core::{map_sql_error, Backend, DbConfig, DbError, Document, Result};
use omnibase_translate::SqlDialect;

use crate::executor::{SqlExecutor, SqlExecutorFactory};

/// Single-connection PostgreSQL executor.
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    pub async fn connect(uri: &str) -> Result<Self> {
        debug!("connecting to PostgreSQL");

        let (client, connection) = tokio_postgres::connect(uri, NoTls)
            .await
            .map_err(|e| map_pg_error(e, None))?;

        // The connection object drives the socket until the client drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client })
    }
}

fn map_pg_error(e: tokio_postgres::Error, collection: Option<&str>) -> DbError {
    let code = e.code().map(|state| state.code().to_string());
    map_sql_error(code.as_deref(), &e.to_string(), collection)
        .with_backend(Backend::Postgres)
        .with_source(e)
}

/// Convert JSON parameter values into concrete postgres types.
fn bind_params(values: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    values
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(b) => Box::new(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Box::new(i)
                    } else {
                        Box::new(n.as_f64().unwrap_or(f64::NAN))
                    }
                }
                Value::String(s) => Box::new(s.clone()),
                // Arrays and objects travel as jsonb.
                other => Box::new(other.clone()),
            }
        })
        .collect()
}

fn row_to_document(row: &Row) -> Document {
    let mut document = Document::new();
    for (index, column) in row.columns().iter().enumerate() {
        document.insert(column.name().to_string(), extract_value(row, index));
    }
    document
}

fn extract_value(row: &Row, index: usize) -> Value {
    let type_name = row.columns()[index].type_().name();
    match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" | "int4" => row
            .try_get::<_, Option<i32>>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "int8" => row
            .try_get::<_, Option<i64>>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "float4" => row
            .try_get::<_, Option<f32>>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "float8" | "numeric" => row
            .try_get::<_, Option<f64>>(index)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.and_utc().to_rfc3339()))
            .unwrap_or(Value::Null),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, Option<Value>>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    fn driver_name(&self) -> &'static str {
        "tokio-postgres"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Document>> {
        debug!(sql, "executing query");
        let bound = bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, None))?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql, "executing statement");
        let bound = bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, None))
    }
}

/// Factory wired into the process-wide registry by the router.
pub struct PgExecutorFactory;

#[async_trait]
impl SqlExecutorFactory for PgExecutorFactory {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn create(&self, config: &DbConfig) -> Result<Arc<dyn SqlExecutor>> {
        Ok(Arc::new(PgExecutor::connect(&config.uri).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_bind_by_json_type() {
        let bound = bind_params(&[json!(null), json!(true), json!(7), json!(1.5), json!("x")]);
        assert_eq!(bound.len(), 5);
    }
}
