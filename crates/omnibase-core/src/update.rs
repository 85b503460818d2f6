//! Update AST: the document-style mutation vocabulary.

use serde_json::Value;

use crate::error::{DbError, ErrorCode, Result};
use crate::types::Document;

/// A parsed update. `$set` may coexist with every other operator; an
/// update with no operators at all is invalid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    pub set: Vec<(String, Value)>,
    pub inc: Vec<(String, Value)>,
    pub unset: Vec<String>,
    pub push: Vec<(String, Value)>,
    pub pull: Vec<(String, Value)>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.inc.is_empty()
            && self.unset.is_empty()
            && self.push.is_empty()
            && self.pull.is_empty()
    }

    /// Parse a JSON update document such as
    /// `{"$set": {"name": "x"}, "$inc": {"count": 1}}`.
    pub fn parse(value: &Value) -> Result<Update> {
        let map = value.as_object().ok_or_else(|| {
            DbError::new(
                ErrorCode::QueryError,
                "Update must be a JSON object of update operators.".to_string(),
                "Use e.g. {\"$set\": {\"name\": \"new\"}}.",
            )
        })?;

        let mut update = Update::default();
        for (key, entry) in map {
            match key.as_str() {
                "$set" => update.set = pairs_of(key, entry)?,
                "$inc" => {
                    let pairs = pairs_of(key, entry)?;
                    for (field, amount) in &pairs {
                        if !amount.is_number() {
                            return Err(DbError::new(
                                ErrorCode::QueryError,
                                format!("'$inc' on field '{}' must be a number.", field),
                                "Use e.g. {\"$inc\": {\"count\": 1}}.",
                            ));
                        }
                    }
                    update.inc = pairs;
                }
                "$unset" => {
                    update.unset = pairs_of(key, entry)?
                        .into_iter()
                        .map(|(field, _)| field)
                        .collect();
                }
                "$push" => update.push = pairs_of(key, entry)?,
                "$pull" => update.pull = pairs_of(key, entry)?,
                unknown => {
                    return Err(DbError::new(
                        ErrorCode::UnknownOperator,
                        format!("Unknown update operator '{}'.", unknown),
                        "Supported update operators: $set, $inc, $unset, $push, $pull.",
                    ))
                }
            }
        }

        if update.is_empty() {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "Update document is empty.".to_string(),
                "Provide at least one operator, e.g. {\"$set\": {\"name\": \"new\"}}.",
            ));
        }

        Ok(update)
    }

    /// The `$set` map as a document (used by upsert insertion).
    pub fn set_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        doc
    }
}

fn pairs_of(op: &str, value: &Value) -> Result<Vec<(String, Value)>> {
    let map = value.as_object().ok_or_else(|| {
        DbError::new(
            ErrorCode::QueryError,
            format!("The value of '{}' must be an object.", op),
            format!("Use {{\"{}\": {{\"field\": ...}}}}.", op),
        )
    })?;
    Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_operators() {
        let update = Update::parse(&json!({
            "$set": {"name": "x"},
            "$inc": {"count": 2},
            "$unset": {"legacy": true},
            "$push": {"tags": "new"},
            "$pull": {"tags": "old"}
        }))
        .unwrap();
        assert_eq!(update.set, vec![("name".to_string(), json!("x"))]);
        assert_eq!(update.inc, vec![("count".to_string(), json!(2))]);
        assert_eq!(update.unset, vec!["legacy".to_string()]);
        assert_eq!(update.push.len(), 1);
        assert_eq!(update.pull.len(), 1);
    }

    #[test]
    fn empty_update_is_invalid() {
        let err = Update::parse(&json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn non_numeric_inc_is_rejected() {
        let err = Update::parse(&json!({"$inc": {"count": "one"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn unknown_update_operator_is_rejected() {
        let err = Update::parse(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("$push"));
    }
}
