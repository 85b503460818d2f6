//! Update AST → SQL SET clause body.

use serde_json::Value;

use omnibase_core::{DbError, ErrorCode, Result, Update};

use crate::dialect::{quote_ident, SqlDialect};
use crate::sql_filter::SqlFragment;

/// Translate an update into the body of a SET clause.
///
/// `$set` assigns, `$inc` adds to the current value, `$unset` assigns
/// NULL. `$push` / `$pull` have no relational rendering and are rejected.
pub fn translate_update(
    update: &Update,
    dialect: SqlDialect,
    offset: usize,
) -> Result<SqlFragment> {
    if !update.push.is_empty() || !update.pull.is_empty() {
        return Err(DbError::unsupported(
            "$push and $pull are not supported on relational backends.".to_string(),
            "Use $set with the full array value, or a document/search backend for array \
             mutation.",
        ));
    }

    let mut params: Vec<Value> = Vec::new();
    let mut clauses: Vec<String> = Vec::new();

    for (field, value) in &update.set {
        params.push(value.clone());
        clauses.push(format!(
            "{} = {}",
            quote_ident(field),
            dialect.placeholder(offset + params.len())
        ));
    }
    for (field, amount) in &update.inc {
        params.push(amount.clone());
        let column = quote_ident(field);
        clauses.push(format!(
            "{} = {} + {}",
            column,
            column,
            dialect.placeholder(offset + params.len())
        ));
    }
    for field in &update.unset {
        clauses.push(format!("{} = NULL", quote_ident(field)));
    }

    if clauses.is_empty() {
        return Err(DbError::new(
            ErrorCode::QueryError,
            "Update produced no SET clauses.".to_string(),
            "Provide at least one $set, $inc or $unset entry.",
        ));
    }

    Ok(SqlFragment {
        clause: clauses.join(", "),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Update {
        Update::parse(&value).unwrap()
    }

    #[test]
    fn set_inc_unset_render_in_order() {
        let update = parse(json!({
            "$set": {"name": "x", "role": "admin"},
            "$inc": {"logins": 1},
            "$unset": {"legacy": true}
        }));
        let frag = translate_update(&update, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(
            frag.clause,
            "\"name\" = $1, \"role\" = $2, \"logins\" = \"logins\" + $3, \"legacy\" = NULL"
        );
        assert_eq!(frag.params, vec![json!("x"), json!("admin"), json!(1)]);
    }

    #[test]
    fn offset_shifts_placeholders() {
        let update = parse(json!({"$set": {"name": "x"}}));
        let frag = translate_update(&update, SqlDialect::Mssql, 4).unwrap();
        assert_eq!(frag.clause, "\"name\" = @p5");
    }

    #[test]
    fn push_and_pull_are_rejected() {
        let update = parse(json!({"$push": {"tags": "new"}}));
        let err = translate_update(&update, SqlDialect::Postgres, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
    }

    #[test]
    fn unset_only_needs_no_params() {
        let update = parse(json!({"$unset": {"stale": true}}));
        let frag = translate_update(&update, SqlDialect::MySql, 0).unwrap();
        assert_eq!(frag.clause, "\"stale\" = NULL");
        assert!(frag.params.is_empty());
    }
}
