//! AST ↔ BSON conversion.
//!
//! The filter algebra is the document store's native vocabulary, so the
//! conversion is a faithful reconstruction of the original operator
//! shapes rather than a translation.

use bson::{doc, Bson};
use serde_json::Value;

use omnibase_core::{
    DbError, Document, ErrorCode, FieldCondition, FieldOp, Filter, FilterClause, Projection,
    QueryOptions, Result, SortOrder, Update,
};

pub fn value_to_bson(value: &Value) -> Result<Bson> {
    Bson::try_from(value.clone()).map_err(|e| {
        DbError::new(
            ErrorCode::QueryError,
            "Value cannot be represented as BSON.".to_string(),
            "Remove non-BSON values (e.g. non-finite numbers) from the document.",
        )
        .with_source(e)
    })
}

pub fn document_to_bson(document: &Document) -> Result<bson::Document> {
    let mut out = bson::Document::new();
    for (key, value) in document {
        out.insert(key.clone(), value_to_bson(value)?);
    }
    Ok(out)
}

pub fn bson_to_document(document: bson::Document) -> Document {
    match Value::from(Bson::Document(document)) {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Rebuild the native filter document from the parsed AST.
pub fn filter_to_bson(filter: &Filter) -> Result<bson::Document> {
    let mut out = bson::Document::new();
    for clause in &filter.clauses {
        match clause {
            FilterClause::And(subs) => {
                out.insert("$and", logical_array(subs)?);
            }
            FilterClause::Or(subs) => {
                out.insert("$or", logical_array(subs)?);
            }
            FilterClause::Nor(subs) => {
                out.insert("$nor", logical_array(subs)?);
            }
            FilterClause::Field { name, condition } => {
                out.insert(name.clone(), condition_to_bson(condition)?);
            }
        }
    }
    Ok(out)
}

fn logical_array(subs: &[Filter]) -> Result<Bson> {
    let documents = subs
        .iter()
        .map(|sub| Ok(Bson::Document(filter_to_bson(sub)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Bson::Array(documents))
}

fn condition_to_bson(condition: &FieldCondition) -> Result<Bson> {
    match condition {
        FieldCondition::Eq(value) => value_to_bson(value),
        FieldCondition::Null => Ok(Bson::Null),
        FieldCondition::Ops(ops) => Ok(Bson::Document(ops_to_bson(ops)?)),
    }
}

fn ops_to_bson(ops: &[FieldOp]) -> Result<bson::Document> {
    let mut bag = bson::Document::new();
    for op in ops {
        match op {
            FieldOp::Eq(value) => {
                bag.insert("$eq", value_to_bson(value)?);
            }
            FieldOp::Ne(value) => {
                bag.insert("$ne", value_to_bson(value)?);
            }
            FieldOp::Gt(value) => {
                bag.insert("$gt", value_to_bson(value)?);
            }
            FieldOp::Gte(value) => {
                bag.insert("$gte", value_to_bson(value)?);
            }
            FieldOp::Lt(value) => {
                bag.insert("$lt", value_to_bson(value)?);
            }
            FieldOp::Lte(value) => {
                bag.insert("$lte", value_to_bson(value)?);
            }
            FieldOp::In(values) => {
                bag.insert("$in", values_to_bson(values)?);
            }
            FieldOp::Nin(values) => {
                bag.insert("$nin", values_to_bson(values)?);
            }
            FieldOp::Exists(exists) => {
                bag.insert("$exists", *exists);
            }
            FieldOp::Regex { pattern, options } => {
                bag.insert("$regex", pattern.clone());
                if let Some(options) = options {
                    bag.insert("$options", options.clone());
                }
            }
            FieldOp::Not(nested) => {
                bag.insert("$not", ops_to_bson(nested)?);
            }
            FieldOp::Size(size) => {
                bag.insert("$size", *size);
            }
        }
    }
    Ok(bag)
}

fn values_to_bson(values: &[Value]) -> Result<Bson> {
    Ok(Bson::Array(
        values.iter().map(value_to_bson).collect::<Result<Vec<_>>>()?,
    ))
}

/// Rebuild the native update document.
pub fn update_to_bson(update: &Update) -> Result<bson::Document> {
    let mut out = bson::Document::new();

    if !update.set.is_empty() {
        out.insert("$set", pairs_to_bson(&update.set)?);
    }
    if !update.inc.is_empty() {
        out.insert("$inc", pairs_to_bson(&update.inc)?);
    }
    if !update.unset.is_empty() {
        let mut unset = bson::Document::new();
        for field in &update.unset {
            unset.insert(field.clone(), "");
        }
        out.insert("$unset", unset);
    }
    if !update.push.is_empty() {
        out.insert("$push", pairs_to_bson(&update.push)?);
    }
    if !update.pull.is_empty() {
        out.insert("$pull", pairs_to_bson(&update.pull)?);
    }

    Ok(out)
}

fn pairs_to_bson(pairs: &[(String, Value)]) -> Result<bson::Document> {
    let mut out = bson::Document::new();
    for (field, value) in pairs {
        out.insert(field.clone(), value_to_bson(value)?);
    }
    Ok(out)
}

pub fn sort_to_bson(sort: &[(String, SortOrder)]) -> bson::Document {
    let mut out = bson::Document::new();
    for (field, order) in sort {
        out.insert(
            field.clone(),
            match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            },
        );
    }
    out
}

pub fn projection_to_bson(options: &QueryOptions) -> Option<bson::Document> {
    let projection = options.projection.as_ref()?;
    let mut out = bson::Document::new();
    match projection {
        Projection::Include(fields) => {
            for field in fields {
                out.insert(field.clone(), 1);
            }
        }
        Projection::Exclude(fields) => {
            for field in fields {
                out.insert(field.clone(), 0);
            }
        }
    }
    Some(out)
}
