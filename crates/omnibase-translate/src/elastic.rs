//! Filter AST → search-engine query DSL, update AST → mutation script.

use serde_json::{json, Map, Value};

use omnibase_core::{
    DbError, ErrorCode, FieldCondition, FieldOp, Filter, FilterClause, Projection, QueryOptions,
    Result, SortOrder, Update,
};

/// Translate a filter into a query DSL object.
///
/// An empty filter is `match_all`; multiple top-level entries collapse to
/// `bool.must`, but a single clause is returned unwrapped.
pub fn translate_filter(filter: &Filter) -> Result<Value> {
    if filter.is_empty() {
        return Ok(json!({"match_all": {}}));
    }

    let mut clauses = Vec::new();
    for clause in &filter.clauses {
        clauses.extend(translate_clause(clause)?);
    }
    Ok(combine_must(clauses))
}

fn combine_must(mut clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        clauses.pop().unwrap()
    } else {
        json!({"bool": {"must": clauses}})
    }
}

fn translate_clause(clause: &FilterClause) -> Result<Vec<Value>> {
    match clause {
        FilterClause::And(subs) => {
            let parts = subs.iter().map(translate_filter).collect::<Result<Vec<_>>>()?;
            Ok(vec![json!({"bool": {"must": parts}})])
        }
        FilterClause::Or(subs) => {
            let parts = subs.iter().map(translate_filter).collect::<Result<Vec<_>>>()?;
            Ok(vec![json!({
                "bool": {"should": parts, "minimum_should_match": 1}
            })])
        }
        FilterClause::Nor(subs) => {
            let parts = subs.iter().map(translate_filter).collect::<Result<Vec<_>>>()?;
            Ok(vec![json!({"bool": {"must_not": parts}})])
        }
        FilterClause::Field { name, condition } => translate_field(name, condition),
    }
}

fn translate_field(field: &str, condition: &FieldCondition) -> Result<Vec<Value>> {
    match condition {
        FieldCondition::Eq(value) => Ok(vec![json!({"term": {field: value}})]),
        // A literal null means the field is missing.
        FieldCondition::Null => Ok(vec![must_not(json!({"exists": {"field": field}}))]),
        FieldCondition::Ops(ops) => translate_ops(field, ops),
    }
}

/// Range operators on one field collapse into a single `range` object;
/// every other operator contributes its own clause.
fn translate_ops(field: &str, ops: &[FieldOp]) -> Result<Vec<Value>> {
    let mut range = Map::new();
    let mut clauses = Vec::new();

    for op in ops {
        match op {
            FieldOp::Gt(value) => {
                range.insert("gt".to_string(), value.clone());
            }
            FieldOp::Gte(value) => {
                range.insert("gte".to_string(), value.clone());
            }
            FieldOp::Lt(value) => {
                range.insert("lt".to_string(), value.clone());
            }
            FieldOp::Lte(value) => {
                range.insert("lte".to_string(), value.clone());
            }
            FieldOp::Eq(Value::Null) => clauses.push(must_not(json!({"exists": {"field": field}}))),
            FieldOp::Eq(value) => clauses.push(json!({"term": {field: value}})),
            FieldOp::Ne(Value::Null) => clauses.push(json!({"exists": {"field": field}})),
            FieldOp::Ne(value) => clauses.push(must_not(json!({"term": {field: value}}))),
            FieldOp::In(values) => clauses.push(json!({"terms": {field: values}})),
            FieldOp::Nin(values) => clauses.push(must_not(json!({"terms": {field: values}}))),
            FieldOp::Exists(true) => clauses.push(json!({"exists": {"field": field}})),
            FieldOp::Exists(false) => {
                clauses.push(must_not(json!({"exists": {"field": field}})))
            }
            FieldOp::Regex { pattern, options } => clauses.push(regex_clause(
                field,
                pattern,
                options.as_deref(),
            )?),
            FieldOp::Not(nested) => {
                let inner = combine_must(translate_ops(field, nested)?);
                clauses.push(must_not(inner));
            }
            FieldOp::Size(size) => clauses.push(json!({
                "script": {
                    "script": {
                        "source": format!("doc['{}'].size() == params.expected", field),
                        "params": {"expected": size}
                    }
                }
            })),
        }
    }

    if !range.is_empty() {
        clauses.insert(0, json!({"range": {field: Value::Object(range)}}));
    }
    Ok(clauses)
}

fn regex_clause(field: &str, pattern: &str, options: Option<&str>) -> Result<Value> {
    match options {
        None | Some("") => Ok(json!({"regexp": {field: pattern}})),
        Some(flags) if flags.chars().all(|c| c == 'i') => Ok(json!({
            "regexp": {field: {"value": pattern, "case_insensitive": true}}
        })),
        Some(flags) => Err(DbError::new(
            ErrorCode::QueryError,
            format!("Unsupported $options flags '{}'.", flags),
            "Only the 'i' flag is supported; drop the other flags.",
        )),
    }
}

fn must_not(clause: Value) -> Value {
    json!({"bool": {"must_not": clause}})
}

/// Translate an update into a mutation script object.
///
/// Each operator produces one statement against the document root, with a
/// parameter named after the operator and field so operators on the same
/// field never collide.
pub fn translate_update(update: &Update) -> Result<Value> {
    if update.is_empty() {
        return Err(DbError::new(
            ErrorCode::QueryError,
            "Update document is empty.".to_string(),
            "Provide at least one operator, e.g. {\"$set\": {\"name\": \"new\"}}.",
        ));
    }

    let mut statements: Vec<String> = Vec::new();
    let mut params = Map::new();

    for (field, value) in &update.set {
        let param = format!("set_{}", field);
        statements.push(format!("ctx._source.{} = params.{}", field, param));
        params.insert(param, value.clone());
    }
    for (field, amount) in &update.inc {
        let param = format!("inc_{}", field);
        statements.push(format!("ctx._source.{} += params.{}", field, param));
        params.insert(param, amount.clone());
    }
    for field in &update.unset {
        statements.push(format!("ctx._source.remove('{}')", field));
    }
    for (field, value) in &update.push {
        let param = format!("push_{}", field);
        statements.push(format!(
            "if (ctx._source.{field} == null) {{ ctx._source.{field} = [] }} ctx._source.{field}.add(params.{param})",
            field = field,
            param = param
        ));
        params.insert(param, value.clone());
    }
    for (field, value) in &update.pull {
        let param = format!("pull_{}", field);
        statements.push(format!(
            "if (ctx._source.{field} != null) {{ ctx._source.{field}.removeIf(item -> item == params.{param}) }}",
            field = field,
            param = param
        ));
        params.insert(param, value.clone());
    }

    Ok(json!({
        "script": {
            "source": statements.join("; "),
            "params": params,
            "lang": "painless"
        }
    }))
}

/// Translate a sort specification into the DSL's ordered sequence.
pub fn translate_sort(sort: &[(String, SortOrder)]) -> Value {
    Value::Array(
        sort.iter()
            .map(|(field, order)| json!({field.as_str(): {"order": order.elastic_keyword()}}))
            .collect(),
    )
}

/// Assemble a `_search` request body from a filter and options.
pub fn build_search_body(filter: &Filter, options: &QueryOptions) -> Result<Value> {
    let mut body = Map::new();
    body.insert("query".to_string(), translate_filter(filter)?);
    if !options.sort.is_empty() {
        body.insert("sort".to_string(), translate_sort(&options.sort));
    }
    if let Some(skip) = options.skip {
        body.insert("from".to_string(), json!(skip));
    }
    if let Some(limit) = options.limit {
        body.insert("size".to_string(), json!(limit));
    }
    if let Some(Projection::Include(fields)) = &options.projection {
        body.insert("_source".to_string(), json!(fields));
    }
    Ok(Value::Object(body))
}
