//! Full statement assembly from translator fragments.

use serde_json::Value;

use omnibase_core::{
    DbError, ErrorCode, Document, Filter, Projection, QueryOptions, Result, SortOrder, Update,
};

use crate::dialect::{quote_ident, SqlDialect};
use crate::sql_filter::translate_filter;
use crate::sql_update::translate_update;

/// A complete statement with its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

fn column_list(options: &QueryOptions) -> String {
    match &options.projection {
        Some(Projection::Include(fields)) => fields
            .iter()
            .map(|f| quote_ident(f))
            .collect::<Vec<_>>()
            .join(", "),
        // Exclusion projections select everything; the adapter strips the
        // excluded fields after the fetch.
        _ => "*".to_string(),
    }
}

fn order_by(sort: &[(String, SortOrder)]) -> Option<String> {
    if sort.is_empty() {
        return None;
    }
    let parts: Vec<String> = sort
        .iter()
        .map(|(field, order)| format!("{} {}", quote_ident(field), order.sql_keyword()))
        .collect();
    Some(parts.join(", "))
}

/// Build a SELECT with dialect-correct pagination.
pub fn build_select(
    table: &str,
    filter: &Filter,
    options: &QueryOptions,
    dialect: SqlDialect,
) -> Result<SqlStatement> {
    let fragment = translate_filter(filter, dialect, 0)?;
    let columns = column_list(options);
    let sort = order_by(&options.sort);
    let skip = options.skip.filter(|skip| *skip > 0);
    let limit = options.limit;

    let mut sql = String::new();

    if dialect == SqlDialect::Mssql && skip.is_none() {
        if let Some(limit) = limit {
            sql.push_str(&format!("SELECT TOP({}) {}", limit, columns));
        } else {
            sql.push_str(&format!("SELECT {}", columns));
        }
    } else {
        sql.push_str(&format!("SELECT {}", columns));
    }

    sql.push_str(&format!(" FROM {}", quote_ident(table)));

    if !fragment.is_trivial() {
        sql.push_str(&format!(" WHERE {}", fragment.clause));
    }

    match dialect {
        SqlDialect::Mssql => {
            // OFFSET/FETCH requires an ORDER BY; a constant one is supplied
            // when the caller did not sort.
            match (skip, &sort) {
                (Some(_), None) => sql.push_str(" ORDER BY (SELECT NULL)"),
                (_, Some(sort)) => sql.push_str(&format!(" ORDER BY {}", sort)),
                (None, None) => {}
            }
            if let Some(skip) = skip {
                sql.push_str(&format!(" OFFSET {} ROWS", skip));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
            }
        }
        _ => {
            if let Some(sort) = &sort {
                sql.push_str(&format!(" ORDER BY {}", sort));
            }
            match (limit, skip) {
                (Some(limit), Some(skip)) => {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, skip))
                }
                (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
                (None, Some(skip)) => match dialect {
                    // These engines have no bare OFFSET.
                    SqlDialect::MySql => {
                        sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", skip))
                    }
                    SqlDialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", skip)),
                    _ => sql.push_str(&format!(" OFFSET {}", skip)),
                },
                (None, None) => {}
            }
        }
    }

    Ok(SqlStatement {
        sql,
        params: fragment.params,
    })
}

/// Build a single-row INSERT.
pub fn build_insert(table: &str, document: &Document, dialect: SqlDialect) -> Result<SqlStatement> {
    if document.is_empty() {
        return Err(empty_insert());
    }
    let columns: Vec<&String> = document.keys().collect();
    let column_sql: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len())
        .map(|index| dialect.placeholder(index))
        .collect();
    let params: Vec<Value> = document.values().cloned().collect();

    Ok(SqlStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_sql.join(", "),
            placeholders.join(", ")
        ),
        params,
    })
}

/// Build a batch INSERT: one statement, multiple value tuples, the column
/// list taken from the first row. Parameter indices increase globally.
pub fn build_insert_many(
    table: &str,
    documents: &[Document],
    dialect: SqlDialect,
) -> Result<SqlStatement> {
    let first = documents.first().ok_or_else(empty_insert)?;
    if first.is_empty() {
        return Err(empty_insert());
    }
    let columns: Vec<String> = first.keys().cloned().collect();
    let column_sql: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let mut params: Vec<Value> = Vec::with_capacity(columns.len() * documents.len());
    let mut tuples: Vec<String> = Vec::with_capacity(documents.len());
    for document in documents {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            params.push(document.get(column).cloned().unwrap_or(Value::Null));
            placeholders.push(dialect.placeholder(params.len()));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    Ok(SqlStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            column_sql.join(", "),
            tuples.join(", ")
        ),
        params,
    })
}

fn empty_insert() -> DbError {
    DbError::new(
        ErrorCode::QueryError,
        "Nothing to insert.".to_string(),
        "Provide at least one non-empty document.",
    )
}

/// Build a plural UPDATE. WHERE parameter indices start after the SET
/// values.
pub fn build_update(
    table: &str,
    filter: &Filter,
    update: &Update,
    dialect: SqlDialect,
) -> Result<SqlStatement> {
    let set = translate_update(update, dialect, 0)?;
    let predicate = translate_filter(filter, dialect, set.params.len())?;

    let mut sql = format!("UPDATE {} SET {}", quote_ident(table), set.clause);
    if !predicate.is_trivial() {
        sql.push_str(&format!(" WHERE {}", predicate.clause));
    }

    let mut params = set.params;
    params.extend(predicate.params);
    Ok(SqlStatement { sql, params })
}

/// Build an UPDATE affecting at most one row.
///
/// When the predicate is trivial no limiting is applied: the guardrail
/// layer has already demanded explicit consent, and with guardrails
/// disabled the statement is unbounded.
pub fn build_update_one(
    table: &str,
    filter: &Filter,
    update: &Update,
    dialect: SqlDialect,
) -> Result<SqlStatement> {
    let set = translate_update(update, dialect, 0)?;
    let predicate = translate_filter(filter, dialect, set.params.len())?;
    let table_sql = quote_ident(table);

    let mut params = set.params;
    let sql = if predicate.is_trivial() {
        format!("UPDATE {} SET {}", table_sql, set.clause)
    } else {
        params.extend(predicate.params);
        match dialect {
            SqlDialect::Postgres => format!(
                "UPDATE {table} SET {set} WHERE ctid = (SELECT ctid FROM {table} WHERE {pred} LIMIT 1)",
                table = table_sql,
                set = set.clause,
                pred = predicate.clause
            ),
            SqlDialect::Sqlite => format!(
                "UPDATE {table} SET {set} WHERE rowid = (SELECT rowid FROM {table} WHERE {pred} LIMIT 1)",
                table = table_sql,
                set = set.clause,
                pred = predicate.clause
            ),
            SqlDialect::MySql => format!(
                "UPDATE {} SET {} WHERE {} LIMIT 1",
                table_sql, set.clause, predicate.clause
            ),
            SqlDialect::Mssql => format!(
                "UPDATE TOP(1) {} SET {} WHERE {}",
                table_sql, set.clause, predicate.clause
            ),
        }
    };

    Ok(SqlStatement { sql, params })
}

/// Build a plural DELETE.
pub fn build_delete(table: &str, filter: &Filter, dialect: SqlDialect) -> Result<SqlStatement> {
    let predicate = translate_filter(filter, dialect, 0)?;
    let mut sql = format!("DELETE FROM {}", quote_ident(table));
    if !predicate.is_trivial() {
        sql.push_str(&format!(" WHERE {}", predicate.clause));
    }
    Ok(SqlStatement {
        sql,
        params: predicate.params,
    })
}

/// Build a DELETE affecting at most one row; same trivial-predicate rule
/// as [`build_update_one`].
pub fn build_delete_one(table: &str, filter: &Filter, dialect: SqlDialect) -> Result<SqlStatement> {
    let predicate = translate_filter(filter, dialect, 0)?;
    let table_sql = quote_ident(table);

    let sql = if predicate.is_trivial() {
        format!("DELETE FROM {}", table_sql)
    } else {
        match dialect {
            SqlDialect::Postgres => format!(
                "DELETE FROM {table} WHERE ctid = (SELECT ctid FROM {table} WHERE {pred} LIMIT 1)",
                table = table_sql,
                pred = predicate.clause
            ),
            SqlDialect::Sqlite => format!(
                "DELETE FROM {table} WHERE rowid = (SELECT rowid FROM {table} WHERE {pred} LIMIT 1)",
                table = table_sql,
                pred = predicate.clause
            ),
            SqlDialect::MySql => {
                format!("DELETE FROM {} WHERE {} LIMIT 1", table_sql, predicate.clause)
            }
            SqlDialect::Mssql => {
                format!("DELETE TOP(1) FROM {} WHERE {}", table_sql, predicate.clause)
            }
        }
    };

    Ok(SqlStatement {
        sql,
        params: predicate.params,
    })
}

/// Build a COUNT.
pub fn build_count(table: &str, filter: &Filter, dialect: SqlDialect) -> Result<SqlStatement> {
    let predicate = translate_filter(filter, dialect, 0)?;
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", quote_ident(table));
    if !predicate.is_trivial() {
        sql.push_str(&format!(" WHERE {}", predicate.clause));
    }
    Ok(SqlStatement {
        sql,
        params: predicate.params,
    })
}
