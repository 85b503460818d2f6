//! SQL dialect strategy: placeholder style, identifier quoting and the
//! few functions whose spelling differs per engine.

use omnibase_core::Backend;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Mssql,
    Sqlite,
}

impl SqlDialect {
    /// Dialect for a relational backend; `None` for non-SQL backends.
    pub fn for_backend(backend: Backend) -> Option<SqlDialect> {
        match backend {
            Backend::Postgres => Some(SqlDialect::Postgres),
            Backend::MySql => Some(SqlDialect::MySql),
            Backend::Mssql => Some(SqlDialect::Mssql),
            Backend::Sqlite => Some(SqlDialect::Sqlite),
            Backend::MongoDb | Backend::Elastic => None,
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            SqlDialect::Postgres => Backend::Postgres,
            SqlDialect::MySql => Backend::MySql,
            SqlDialect::Mssql => Backend::Mssql,
            SqlDialect::Sqlite => Backend::Sqlite,
        }
    }

    /// Positional placeholder for a 1-based parameter index.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::MySql | SqlDialect::Sqlite => "?".to_string(),
            SqlDialect::Mssql => format!("@p{}", index),
        }
    }

    /// Statement that opens an explicit transaction.
    pub fn begin_transaction_sql(&self) -> &'static str {
        match self {
            SqlDialect::Mssql => "BEGIN TRANSACTION",
            _ => "BEGIN",
        }
    }
}

/// Double-quote an identifier, escaping embedded double quotes.
///
/// MySQL is assumed to run with ANSI_QUOTES so every dialect shares one
/// quoting form.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_styles() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::MySql.placeholder(3), "?");
        assert_eq!(SqlDialect::Sqlite.placeholder(1), "?");
        assert_eq!(SqlDialect::Mssql.placeholder(2), "@p2");
    }

    #[test]
    fn identifiers_are_double_quoted_and_escaped() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn dialect_backend_round_trip() {
        for dialect in [
            SqlDialect::Postgres,
            SqlDialect::MySql,
            SqlDialect::Mssql,
            SqlDialect::Sqlite,
        ] {
            assert_eq!(SqlDialect::for_backend(dialect.backend()), Some(dialect));
        }
        assert_eq!(SqlDialect::for_backend(Backend::MongoDb), None);
    }
}
