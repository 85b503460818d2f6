//! Filter AST → parameterized SQL WHERE clause.
//!
//! The translation is a structural recursion over the filter sum. It is
//! position-oblivious: translating at parameter offset `k` yields the same
//! clause structure with every placeholder index shifted by `k`, so the
//! builder can splice fragments after SET clauses or into subqueries.

use serde_json::Value;

use omnibase_core::{DbError, ErrorCode, FieldCondition, FieldOp, Filter, FilterClause, Result};

use crate::dialect::{quote_ident, SqlDialect};

/// A clause plus its ordered parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub clause: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    /// True for the match-everything clause, which the builder omits from
    /// WHERE and the single-row rewrites leave unbounded.
    pub fn is_trivial(&self) -> bool {
        self.clause == "1=1"
    }
}

/// Translate a filter into a WHERE-clause body.
///
/// `offset` is the number of parameters already emitted before this
/// fragment; placeholder numbering continues densely after it.
pub fn translate_filter(
    filter: &Filter,
    dialect: SqlDialect,
    offset: usize,
) -> Result<SqlFragment> {
    let mut ctx = Ctx {
        dialect,
        offset,
        params: Vec::new(),
    };
    let clause = ctx.conjunction(filter)?;
    Ok(SqlFragment {
        clause,
        params: ctx.params,
    })
}

struct Ctx {
    dialect: SqlDialect,
    offset: usize,
    params: Vec<Value>,
}

impl Ctx {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.offset + self.params.len())
    }

    /// The implicit AND of a filter's clauses; `1=1` when empty.
    fn conjunction(&mut self, filter: &Filter) -> Result<String> {
        if filter.is_empty() {
            return Ok("1=1".to_string());
        }
        let parts = filter
            .clauses
            .iter()
            .map(|clause| self.clause(clause))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }

    fn clause(&mut self, clause: &FilterClause) -> Result<String> {
        match clause {
            FilterClause::And(subs) => {
                let parts = self.parenthesized(subs)?;
                Ok(format!("({})", parts.join(" AND ")))
            }
            FilterClause::Or(subs) => {
                let parts = self.parenthesized(subs)?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            FilterClause::Nor(subs) => {
                let parts = self.parenthesized(subs)?;
                Ok(format!("NOT ({})", parts.join(" OR ")))
            }
            FilterClause::Field { name, condition } => self.field(name, condition),
        }
    }

    fn parenthesized(&mut self, subs: &[Filter]) -> Result<Vec<String>> {
        subs.iter()
            .map(|sub| Ok(format!("({})", self.conjunction(sub)?)))
            .collect()
    }

    fn field(&mut self, name: &str, condition: &FieldCondition) -> Result<String> {
        let column = quote_ident(name);
        match condition {
            FieldCondition::Eq(value) => Ok(format!("{} = {}", column, self.bind(value.clone()))),
            FieldCondition::Null => Ok(format!("{} IS NULL", column)),
            FieldCondition::Ops(ops) => {
                let parts = ops
                    .iter()
                    .map(|op| self.operator(&column, op))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    fn operator(&mut self, column: &str, op: &FieldOp) -> Result<String> {
        match op {
            FieldOp::Eq(Value::Null) => Ok(format!("{} IS NULL", column)),
            FieldOp::Eq(value) => Ok(format!("{} = {}", column, self.bind(value.clone()))),
            FieldOp::Ne(Value::Null) => Ok(format!("{} IS NOT NULL", column)),
            FieldOp::Ne(value) => Ok(format!("{} <> {}", column, self.bind(value.clone()))),
            FieldOp::Gt(value) => Ok(format!("{} > {}", column, self.bind(value.clone()))),
            FieldOp::Gte(value) => Ok(format!("{} >= {}", column, self.bind(value.clone()))),
            FieldOp::Lt(value) => Ok(format!("{} < {}", column, self.bind(value.clone()))),
            FieldOp::Lte(value) => Ok(format!("{} <= {}", column, self.bind(value.clone()))),
            FieldOp::In(values) => {
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(v.clone())).collect();
                Ok(format!("{} IN ({})", column, placeholders.join(", ")))
            }
            FieldOp::Nin(values) => {
                if values.is_empty() {
                    return Ok("1=1".to_string());
                }
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(v.clone())).collect();
                Ok(format!("{} NOT IN ({})", column, placeholders.join(", ")))
            }
            FieldOp::Exists(true) => Ok(format!("{} IS NOT NULL", column)),
            FieldOp::Exists(false) => Ok(format!("{} IS NULL", column)),
            FieldOp::Regex { pattern, options } => self.regex(column, pattern, options.as_deref()),
            FieldOp::Not(ops) => {
                let parts = ops
                    .iter()
                    .map(|nested| self.operator(column, nested))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("NOT ({})", parts.join(" AND ")))
            }
            FieldOp::Size(size) => {
                let placeholder = self.bind(Value::from(*size));
                let length_expr = match self.dialect {
                    SqlDialect::Postgres => format!("jsonb_array_length({})", column),
                    SqlDialect::MySql => format!("JSON_LENGTH({})", column),
                    SqlDialect::Sqlite => format!("json_array_length({})", column),
                    SqlDialect::Mssql => {
                        format!("(SELECT COUNT(*) FROM OPENJSON({}))", column)
                    }
                };
                Ok(format!("{} = {}", length_expr, placeholder))
            }
        }
    }

    fn regex(&mut self, column: &str, pattern: &str, options: Option<&str>) -> Result<String> {
        let case_insensitive = match options {
            None | Some("") => false,
            Some(flags) if flags.chars().all(|c| c == 'i') => true,
            Some(flags) => {
                return Err(DbError::new(
                    ErrorCode::QueryError,
                    format!("Unsupported $options flags '{}'.", flags),
                    "Only the 'i' flag is supported; drop the other flags.",
                ))
            }
        };

        match self.dialect {
            SqlDialect::Postgres => {
                let operator = if case_insensitive { "~*" } else { "~" };
                Ok(format!(
                    "{} {} {}",
                    column,
                    operator,
                    self.bind(Value::String(pattern.to_string()))
                ))
            }
            SqlDialect::MySql => {
                if case_insensitive {
                    return Err(case_flag_unsupported("MySQL"));
                }
                Ok(format!(
                    "{} REGEXP {}",
                    column,
                    self.bind(Value::String(pattern.to_string()))
                ))
            }
            SqlDialect::Mssql | SqlDialect::Sqlite => {
                if case_insensitive {
                    return Err(case_flag_unsupported(match self.dialect {
                        SqlDialect::Mssql => "MSSQL",
                        _ => "SQLite",
                    }));
                }
                let like = regex_to_like(pattern);
                Ok(format!(
                    "{} LIKE {} ESCAPE '\\'",
                    column,
                    self.bind(Value::String(like))
                ))
            }
        }
    }
}

fn case_flag_unsupported(dialect: &str) -> DbError {
    DbError::new(
        ErrorCode::QueryError,
        format!("{} has no native case-insensitive regex operator.", dialect),
        "Drop the 'i' flag and match an explicit case, or query a normalized column.",
    )
}

/// Rewrite a simple regex into a LIKE pattern: anchors stripped (an
/// unanchored side gets a `%` wildcard), `.*` becomes `%`, `.` becomes
/// `_`, and literal `%` / `_` / `\` are escaped.
fn regex_to_like(pattern: &str) -> String {
    let (pattern, anchored_start) = match pattern.strip_prefix('^') {
        Some(rest) => (rest, true),
        None => (pattern, false),
    };
    let (pattern, anchored_end) = match pattern.strip_suffix('$') {
        Some(rest) => (rest, true),
        None => (pattern, false),
    };

    let mut like = String::with_capacity(pattern.len() + 2);
    if !anchored_start {
        like.push('%');
    }

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '.' if chars.peek() == Some(&'*') => {
                chars.next();
                like.push('%');
            }
            '.' => like.push('_'),
            '%' => like.push_str("\\%"),
            '_' => like.push_str("\\_"),
            '\\' => {
                // A regex escape: take the next char literally.
                if let Some(escaped) = chars.next() {
                    match escaped {
                        '%' => like.push_str("\\%"),
                        '_' => like.push_str("\\_"),
                        '\\' => like.push_str("\\\\"),
                        other => like.push(other),
                    }
                }
            }
            other => like.push(other),
        }
    }

    if !anchored_end {
        like.push('%');
    }
    like
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    #[test]
    fn empty_filter_is_always_true() {
        let frag = translate_filter(&Filter::empty(), SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "1=1");
        assert!(frag.params.is_empty());
        assert!(frag.is_trivial());
    }

    #[test]
    fn mixed_operator_bag_and_equality() {
        let filter = parse(json!({"age": {"$gte": 18, "$lt": 65}, "role": "admin"}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(
            frag.clause,
            "\"age\" >= $1 AND \"age\" < $2 AND \"role\" = $3"
        );
        assert_eq!(frag.params, vec![json!(18), json!(65), json!("admin")]);
    }

    #[test]
    fn translation_is_position_oblivious() {
        let filter = parse(json!({"age": {"$gte": 18, "$lt": 65}, "role": "admin"}));
        let base = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        let shifted = translate_filter(&filter, SqlDialect::Postgres, 5).unwrap();
        assert_eq!(
            shifted.clause,
            "\"age\" >= $6 AND \"age\" < $7 AND \"role\" = $8"
        );
        assert_eq!(base.params, shifted.params);
    }

    #[test]
    fn placeholder_count_matches_param_count() {
        let filter = parse(json!({
            "a": 1,
            "b": {"$in": [1, 2, 3]},
            "c": {"$exists": true},
            "$or": [{"d": null}, {"e": {"$ne": 9}}]
        }));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        let placeholder_count = frag.clause.matches('$').count();
        assert_eq!(placeholder_count, frag.params.len());
        // Dense numbering from 1.
        for index in 1..=frag.params.len() {
            assert!(frag.clause.contains(&format!("${}", index)));
        }
    }

    #[test]
    fn question_mark_dialects_share_param_order() {
        let filter = parse(json!({"age": {"$gte": 18}, "role": "admin"}));
        let frag = translate_filter(&filter, SqlDialect::MySql, 0).unwrap();
        assert_eq!(frag.clause, "\"age\" >= ? AND \"role\" = ?");
        assert_eq!(frag.params, vec![json!(18), json!("admin")]);

        let frag = translate_filter(&filter, SqlDialect::Mssql, 0).unwrap();
        assert_eq!(frag.clause, "\"age\" >= @p1 AND \"role\" = @p2");
    }

    #[test]
    fn null_handling() {
        let filter = parse(json!({"deleted_at": null}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"deleted_at\" IS NULL");
        assert!(frag.params.is_empty());

        let filter = parse(json!({"email": {"$ne": null}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"email\" IS NOT NULL");

        let filter = parse(json!({"email": {"$eq": null}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"email\" IS NULL");
    }

    #[test]
    fn empty_in_is_false_empty_nin_is_true() {
        let filter = parse(json!({"id": {"$in": []}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "1=0");
        assert!(frag.params.is_empty());

        let filter = parse(json!({"id": {"$nin": []}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "1=1");
        assert!(frag.params.is_empty());
    }

    #[test]
    fn in_and_nin_with_values() {
        let filter = parse(json!({"role": {"$in": ["admin", "mod"]}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"role\" IN ($1, $2)");

        let filter = parse(json!({"role": {"$nin": ["bot"]}}));
        let frag = translate_filter(&filter, SqlDialect::MySql, 0).unwrap();
        assert_eq!(frag.clause, "\"role\" NOT IN (?)");
    }

    #[test]
    fn exists_maps_to_null_checks() {
        let filter = parse(json!({"email": {"$exists": true}, "phone": {"$exists": false}}));
        let frag = translate_filter(&filter, SqlDialect::Sqlite, 0).unwrap();
        assert_eq!(
            frag.clause,
            "\"email\" IS NOT NULL AND \"phone\" IS NULL"
        );
    }

    #[test]
    fn logical_nodes_parenthesize_fully() {
        let filter = parse(json!({"$or": [{"role": "admin"}, {"role": "mod"}]}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "((\"role\" = $1) OR (\"role\" = $2))");

        let filter = parse(json!({"$and": [{"a": 1}, {"b": 2}]}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "((\"a\" = $1) AND (\"b\" = $2))");

        let filter = parse(json!({"$nor": [{"a": 1}, {"b": 2}]}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "NOT ((\"a\" = $1) OR (\"b\" = $2))");
    }

    #[test]
    fn not_wraps_nested_bag() {
        let filter = parse(json!({"age": {"$not": {"$gte": 65}}}));
        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "NOT (\"age\" >= $1)");
        assert_eq!(frag.params, vec![json!(65)]);
    }

    #[test]
    fn size_uses_dialect_json_length() {
        let filter = parse(json!({"tags": {"$size": 3}}));

        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "jsonb_array_length(\"tags\") = $1");

        let frag = translate_filter(&filter, SqlDialect::MySql, 0).unwrap();
        assert_eq!(frag.clause, "JSON_LENGTH(\"tags\") = ?");

        let frag = translate_filter(&filter, SqlDialect::Sqlite, 0).unwrap();
        assert_eq!(frag.clause, "json_array_length(\"tags\") = ?");

        let frag = translate_filter(&filter, SqlDialect::Mssql, 0).unwrap();
        assert_eq!(
            frag.clause,
            "(SELECT COUNT(*) FROM OPENJSON(\"tags\")) = @p1"
        );
    }

    #[test]
    fn regex_per_dialect() {
        let filter = parse(json!({"email": {"$regex": "^admin@"}}));

        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"email\" ~ $1");
        assert_eq!(frag.params, vec![json!("^admin@")]);

        let frag = translate_filter(&filter, SqlDialect::MySql, 0).unwrap();
        assert_eq!(frag.clause, "\"email\" REGEXP ?");

        let frag = translate_filter(&filter, SqlDialect::Sqlite, 0).unwrap();
        assert_eq!(frag.clause, "\"email\" LIKE ? ESCAPE '\\'");
        assert_eq!(frag.params, vec![json!("admin@%")]);
    }

    #[test]
    fn regex_case_insensitive_only_where_native() {
        let filter = parse(json!({"name": {"$regex": "^ann", "$options": "i"}}));

        let frag = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(frag.clause, "\"name\" ~* $1");

        assert!(translate_filter(&filter, SqlDialect::MySql, 0).is_err());
        assert!(translate_filter(&filter, SqlDialect::Sqlite, 0).is_err());
        assert!(translate_filter(&filter, SqlDialect::Mssql, 0).is_err());

        let filter = parse(json!({"name": {"$regex": "x", "$options": "im"}}));
        let err = translate_filter(&filter, SqlDialect::Postgres, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn like_rewriting() {
        assert_eq!(regex_to_like("^admin@"), "admin@%");
        assert_eq!(regex_to_like("gmail\\.com$"), "%gmail.com");
        assert_eq!(regex_to_like("^a.*z$"), "a%z");
        assert_eq!(regex_to_like("a.c"), "%a_c%");
        assert_eq!(regex_to_like("50%"), "%50\\%%");
        assert_eq!(regex_to_like("a_b"), "%a\\_b%");
    }
}
