//! Filter AST: the document-style query algebra every backend call is
//! expressed in.
//!
//! A filter is a mapping whose keys are either field names (bound to an
//! equality value, `null`, or an operator bag) or one of the logical keys
//! `$and` / `$or` / `$nor` bound to an ordered sequence of sub-filters.
//! Multiple top-level entries combine conjunctively, as do multiple
//! operators within one bag.

use serde_json::Value;

use crate::error::{DbError, ErrorCode, Result};

/// Operators accepted inside a field's operator bag.
pub const SUPPORTED_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex", "$not",
    "$size",
];

/// A parsed filter: an implicit conjunction of clauses.
///
/// A filter with zero clauses means "match everything".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub clauses: Vec<FilterClause>,
}

/// One top-level entry of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field {
        name: String,
        condition: FieldCondition,
    },
}

/// What a field key is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    /// Direct equality with a literal value.
    Eq(Value),
    /// Literal `null`: the field is missing.
    Null,
    /// An operator bag; entries combine conjunctively.
    Ops(Vec<FieldOp>),
}

/// A single operator inside a bag.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex {
        pattern: String,
        options: Option<String>,
    },
    Not(Vec<FieldOp>),
    Size(i64),
}

impl Filter {
    /// The match-everything filter.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parse a JSON filter document.
    ///
    /// Logical keys are only valid at filter position; a stray `$`-key that
    /// is not logical raises `UNKNOWN_OPERATOR` with a hint to nest it
    /// under a field.
    pub fn parse(value: &Value) -> Result<Filter> {
        let map = value.as_object().ok_or_else(|| {
            DbError::new(
                ErrorCode::QueryError,
                "Filter must be a JSON object.".to_string(),
                "Pass {} to match everything or {\"field\": value} to filter.",
            )
        })?;

        let mut clauses = Vec::with_capacity(map.len());
        for (key, entry) in map {
            match key.as_str() {
                "$and" => clauses.push(FilterClause::And(parse_logical_array(key, entry)?)),
                "$or" => clauses.push(FilterClause::Or(parse_logical_array(key, entry)?)),
                "$nor" => clauses.push(FilterClause::Nor(parse_logical_array(key, entry)?)),
                k if k.starts_with('$') => {
                    return Err(DbError::new(
                        ErrorCode::UnknownOperator,
                        format!("Operator '{}' is not valid at filter position.", k),
                        format!(
                            "Nest it under a field, e.g. {{\"age\": {{\"{}\": ...}}}}; supported \
                             operators: {}.",
                            k,
                            SUPPORTED_OPERATORS.join(", ")
                        ),
                    ));
                }
                _ => clauses.push(FilterClause::Field {
                    name: key.clone(),
                    condition: parse_field_condition(key, entry)?,
                }),
            }
        }

        Ok(Filter { clauses })
    }

    /// Every field name mentioned anywhere in the filter, recursing into
    /// logical arrays. Used by the sanitizer's whitelist check.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_field_names(self, &mut names);
        names
    }

    /// Top-level equality pairs whose values are scalars (strings, numbers,
    /// booleans). These seed the INSERT half of an upsert.
    pub fn equality_pairs(&self) -> Vec<(&str, &Value)> {
        self.clauses
            .iter()
            .filter_map(|clause| match clause {
                FilterClause::Field {
                    name,
                    condition: FieldCondition::Eq(value),
                } if !value.is_object() && !value.is_array() && !value.is_null() => {
                    Some((name.as_str(), value))
                }
                _ => None,
            })
            .collect()
    }
}

fn collect_field_names<'a>(filter: &'a Filter, names: &mut Vec<&'a str>) {
    for clause in &filter.clauses {
        match clause {
            FilterClause::And(subs) | FilterClause::Or(subs) | FilterClause::Nor(subs) => {
                for sub in subs {
                    collect_field_names(sub, names);
                }
            }
            FilterClause::Field { name, .. } => names.push(name),
        }
    }
}

fn parse_logical_array(key: &str, value: &Value) -> Result<Vec<Filter>> {
    let array = value.as_array().ok_or_else(|| {
        DbError::new(
            ErrorCode::QueryError,
            format!("The value of '{}' must be an array of sub-filters.", key),
            format!("Write {{\"{}\": [{{...}}, {{...}}]}}.", key),
        )
    })?;

    if array.is_empty() {
        return Err(DbError::new(
            ErrorCode::QueryError,
            format!("The '{}' array must not be empty.", key),
            "Provide at least one sub-filter or drop the logical operator.",
        ));
    }

    array.iter().map(Filter::parse).collect()
}

fn parse_field_condition(field: &str, value: &Value) -> Result<FieldCondition> {
    if value.is_null() {
        return Ok(FieldCondition::Null);
    }

    // A sub-document whose first key starts with `$` is an operator bag;
    // any other sub-document is a literal equality value.
    if let Some(map) = value.as_object() {
        if let Some((first_key, _)) = map.iter().next() {
            if first_key.starts_with('$') {
                return Ok(FieldCondition::Ops(parse_operator_bag(field, map)?));
            }
        }
    }

    Ok(FieldCondition::Eq(value.clone()))
}

fn parse_operator_bag(
    field: &str,
    map: &serde_json::Map<String, Value>,
) -> Result<Vec<FieldOp>> {
    // $options modifies a sibling $regex and is consumed with it.
    let regex_options = match map.get("$options") {
        None => None,
        Some(Value::String(options)) => {
            if !map.contains_key("$regex") {
                return Err(DbError::new(
                    ErrorCode::QueryError,
                    format!("'$options' without '$regex' on field '{}'.", field),
                    "Pair $options with a $regex pattern or remove it.",
                ));
            }
            Some(options.clone())
        }
        Some(_) => {
            return Err(DbError::new(
                ErrorCode::QueryError,
                format!("'$options' on field '{}' must be a string.", field),
                "Use e.g. {\"$regex\": \"^ann\", \"$options\": \"i\"}.",
            ))
        }
    };

    let mut ops = Vec::with_capacity(map.len());
    for (op_key, op_value) in map {
        let op = match op_key.as_str() {
            "$eq" => FieldOp::Eq(op_value.clone()),
            "$ne" => FieldOp::Ne(op_value.clone()),
            "$gt" => FieldOp::Gt(op_value.clone()),
            "$gte" => FieldOp::Gte(op_value.clone()),
            "$lt" => FieldOp::Lt(op_value.clone()),
            "$lte" => FieldOp::Lte(op_value.clone()),
            "$in" => FieldOp::In(expect_array(field, op_key, op_value)?),
            "$nin" => FieldOp::Nin(expect_array(field, op_key, op_value)?),
            "$exists" => match op_value.as_bool() {
                Some(exists) => FieldOp::Exists(exists),
                None => {
                    return Err(DbError::new(
                        ErrorCode::QueryError,
                        format!("'$exists' on field '{}' must be a boolean.", field),
                        "Use {\"$exists\": true} or {\"$exists\": false}.",
                    ))
                }
            },
            "$regex" => match op_value.as_str() {
                Some(pattern) => FieldOp::Regex {
                    pattern: pattern.to_string(),
                    options: regex_options.clone(),
                },
                None => {
                    return Err(DbError::new(
                        ErrorCode::QueryError,
                        format!("'$regex' on field '{}' must be a string pattern.", field),
                        "Use {\"$regex\": \"^prefix\"}.",
                    ))
                }
            },
            "$options" => continue,
            "$not" => {
                let nested = op_value.as_object().filter(|m| {
                    !m.is_empty() && m.keys().all(|k| k.starts_with('$'))
                });
                match nested {
                    Some(nested) => FieldOp::Not(parse_operator_bag(field, nested)?),
                    None => {
                        return Err(DbError::new(
                            ErrorCode::QueryError,
                            format!("'$not' on field '{}' must wrap an operator bag.", field),
                            "Use e.g. {\"$not\": {\"$gte\": 10}}.",
                        ))
                    }
                }
            }
            "$size" => match op_value.as_i64() {
                Some(size) if size >= 0 => FieldOp::Size(size),
                _ => {
                    return Err(DbError::new(
                        ErrorCode::QueryError,
                        format!("'$size' on field '{}' must be a non-negative integer.", field),
                        "Use e.g. {\"$size\": 3}.",
                    ))
                }
            },
            unknown => {
                return Err(DbError::new(
                    ErrorCode::UnknownOperator,
                    format!("Unknown operator '{}' on field '{}'.", unknown, field),
                    format!("Supported operators: {}.", SUPPORTED_OPERATORS.join(", ")),
                ))
            }
        };
        ops.push(op);
    }

    Ok(ops)
}

fn expect_array(field: &str, op: &str, value: &Value) -> Result<Vec<Value>> {
    value.as_array().cloned().ok_or_else(|| {
        DbError::new(
            ErrorCode::QueryError,
            format!("'{}' on field '{}' must be an array.", op, field),
            format!("Use {{\"{}\": [v1, v2]}}.", op),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::parse(&json!({})).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn bare_field_is_implicit_eq() {
        let filter = Filter::parse(&json!({"status": "active"})).unwrap();
        assert_eq!(filter.clauses.len(), 1);
        match &filter.clauses[0] {
            FilterClause::Field { name, condition } => {
                assert_eq!(name, "status");
                assert_eq!(condition, &FieldCondition::Eq(json!("active")));
            }
            other => panic!("expected field clause, got {:?}", other),
        }
    }

    #[test]
    fn null_value_means_field_missing() {
        let filter = Filter::parse(&json!({"deleted_at": null})).unwrap();
        match &filter.clauses[0] {
            FilterClause::Field { condition, .. } => assert_eq!(condition, &FieldCondition::Null),
            other => panic!("expected field clause, got {:?}", other),
        }
    }

    #[test]
    fn operator_bag_keeps_order() {
        let filter = Filter::parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        match &filter.clauses[0] {
            FilterClause::Field {
                condition: FieldCondition::Ops(ops),
                ..
            } => {
                assert_eq!(ops.len(), 2);
                assert_eq!(ops[0], FieldOp::Gte(json!(18)));
                assert_eq!(ops[1], FieldOp::Lt(json!(65)));
            }
            other => panic!("expected operator bag, got {:?}", other),
        }
    }

    #[test]
    fn embedded_doc_without_dollar_keys_is_equality() {
        let filter = Filter::parse(&json!({"address": {"city": "Austin"}})).unwrap();
        match &filter.clauses[0] {
            FilterClause::Field { condition, .. } => {
                assert!(matches!(condition, FieldCondition::Eq(_)));
            }
            other => panic!("expected field clause, got {:?}", other),
        }
    }

    #[test]
    fn logical_operators_parse_recursively() {
        let filter = Filter::parse(&json!({
            "$or": [
                {"role": "admin"},
                {"$and": [{"score": {"$gt": 90}}, {"verified": true}]}
            ]
        }))
        .unwrap();
        match &filter.clauses[0] {
            FilterClause::Or(subs) => {
                assert_eq!(subs.len(), 2);
                assert!(matches!(subs[1].clauses[0], FilterClause::And(_)));
            }
            other => panic!("expected $or, got {:?}", other),
        }
    }

    #[test]
    fn nor_is_a_logical_key() {
        let filter = Filter::parse(&json!({"$nor": [{"a": 1}, {"b": 2}]})).unwrap();
        assert!(matches!(filter.clauses[0], FilterClause::Nor(_)));
    }

    #[test]
    fn stray_top_level_operator_suggests_nesting() {
        let err = Filter::parse(&json!({"$gte": 18})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("Nest it under a field"));
    }

    #[test]
    fn unknown_field_operator_lists_supported_set() {
        let err = Filter::parse(&json!({"age": {"$between": [1, 2]}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("$gte"));
        assert!(err.fix.contains("$size"));
    }

    #[test]
    fn regex_collects_sibling_options() {
        let filter = Filter::parse(&json!({"name": {"$regex": "^ann", "$options": "i"}})).unwrap();
        match &filter.clauses[0] {
            FilterClause::Field {
                condition: FieldCondition::Ops(ops),
                ..
            } => {
                assert_eq!(ops.len(), 1);
                assert_eq!(
                    ops[0],
                    FieldOp::Regex {
                        pattern: "^ann".into(),
                        options: Some("i".into())
                    }
                );
            }
            other => panic!("expected regex op, got {:?}", other),
        }
    }

    #[test]
    fn options_without_regex_is_rejected() {
        let err = Filter::parse(&json!({"name": {"$options": "i"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn not_wraps_a_nested_bag() {
        let filter = Filter::parse(&json!({"age": {"$not": {"$gte": 65}}})).unwrap();
        match &filter.clauses[0] {
            FilterClause::Field {
                condition: FieldCondition::Ops(ops),
                ..
            } => assert_eq!(ops[0], FieldOp::Not(vec![FieldOp::Gte(json!(65))])),
            other => panic!("expected $not, got {:?}", other),
        }
    }

    #[test]
    fn empty_logical_array_is_rejected() {
        let err = Filter::parse(&json!({"$and": []})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn field_names_recurse_into_logical_arrays() {
        let filter = Filter::parse(&json!({
            "status": "active",
            "$or": [{"role": "admin"}, {"level": {"$gte": 3}}]
        }))
        .unwrap();
        assert_eq!(filter.field_names(), vec!["status", "role", "level"]);
    }

    #[test]
    fn equality_pairs_skip_operator_bags_and_compounds() {
        let filter = Filter::parse(&json!({
            "email": "a@b.c",
            "age": {"$gte": 18},
            "tags": ["x"],
            "profile": {"nested": true},
            "active": true
        }))
        .unwrap();
        let pairs = filter.equality_pairs();
        assert_eq!(
            pairs,
            vec![
                ("email", &json!("a@b.c")),
                ("active", &json!(true)),
            ]
        );
    }
}
