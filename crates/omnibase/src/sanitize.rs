//! Sanitization stage: field whitelists, reserved-name blocks, regex
//! complexity gating and caller-supplied value transforms.

use serde_json::Value;

use omnibase_core::{
    DbError, Document, ErrorCode, FieldOp, Filter, FilterClause, Result, SanitizeRule,
    FieldCondition,
};

/// Search-engine metadata fields callers may not filter on. Any other
/// leading-underscore name is rejected too; this list feeds the fix text.
pub const ELASTIC_RESERVED_FIELDS: &[&str] = &[
    "_id",
    "_index",
    "_source",
    "_score",
    "_type",
    "_routing",
    "_field_names",
    "_ignored",
    "_meta",
    "_seq_no",
    "_primary_term",
];

/// Substrings that betray a nested quantifier such as `(a+)+`.
const NESTED_QUANTIFIER_MARKERS: &[&str] = &["+)+", "+)*", "*)+", "*)*", "+){", "*){"];

const MAX_REGEX_LENGTH: usize = 1000;

/// Every non-`$` key in the filter must appear in the declared field set.
pub fn check_filter_fields(filter: &Filter, allowed: &[String], collection: &str) -> Result<()> {
    for name in filter.field_names() {
        if !allowed.iter().any(|field| field == name) {
            return Err(DbError::new(
                ErrorCode::QueryError,
                format!(
                    "Field '{}' is not declared for collection '{}'.",
                    name, collection
                ),
                format!("Valid fields: {}.", allowed.join(", ")),
            )
            .with_collection(collection));
        }
    }
    Ok(())
}

/// Reject filters touching the search engine's internal metadata fields.
pub fn check_reserved_fields(filter: &Filter) -> Result<()> {
    for name in filter.field_names() {
        if name.starts_with('_') {
            return Err(DbError::new(
                ErrorCode::QueryError,
                format!("Field '{}' is reserved by the search engine.", name),
                format!(
                    "Rename the field; reserved names include {}.",
                    ELASTIC_RESERVED_FIELDS.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

/// Index names must be concrete: no wildcards, commas or spaces, and no
/// leading `.` or `-`.
pub fn check_index_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.contains('*')
        || name.contains('?')
        || name.contains(',')
        || name.contains(' ')
        || name.starts_with('.')
        || name.starts_with('-');
    if invalid {
        return Err(DbError::new(
            ErrorCode::QueryError,
            format!("'{}' is not a valid index name.", name),
            "Use a concrete lowercase index name without wildcards, commas, spaces or a \
             leading '.'/'-'.",
        ));
    }
    Ok(())
}

/// Cheap static checks against catastrophic-backtracking shapes.
pub fn check_regex_complexity(filter: &Filter) -> Result<()> {
    for pattern in collect_regex_patterns(filter) {
        if pattern.len() > MAX_REGEX_LENGTH {
            return Err(DbError::new(
                ErrorCode::QueryError,
                format!(
                    "Regex pattern is {} characters long; the limit is {}.",
                    pattern.len(),
                    MAX_REGEX_LENGTH
                ),
                "Shorten the pattern or split the query.",
            ));
        }
        if NESTED_QUANTIFIER_MARKERS
            .iter()
            .any(|marker| pattern.contains(marker))
        {
            return Err(DbError::new(
                ErrorCode::QueryError,
                "Regex pattern contains a nested quantifier.".to_string(),
                "Rewrite shapes like (a+)+ as a+ to avoid catastrophic backtracking.",
            ));
        }
    }
    Ok(())
}

fn collect_regex_patterns(filter: &Filter) -> Vec<&str> {
    let mut patterns = Vec::new();
    for clause in &filter.clauses {
        match clause {
            FilterClause::And(subs) | FilterClause::Or(subs) | FilterClause::Nor(subs) => {
                for sub in subs {
                    patterns.extend(collect_regex_patterns(sub));
                }
            }
            FilterClause::Field { condition, .. } => {
                if let FieldCondition::Ops(ops) = condition {
                    collect_from_ops(ops, &mut patterns);
                }
            }
        }
    }
    patterns
}

fn collect_from_ops<'a>(ops: &'a [FieldOp], patterns: &mut Vec<&'a str>) {
    for op in ops {
        match op {
            FieldOp::Regex { pattern, .. } => patterns.push(pattern),
            FieldOp::Not(nested) => collect_from_ops(nested, patterns),
            _ => {}
        }
    }
}

/// Apply caller-supplied transforms in order to a fresh copy of the map.
/// The input is never mutated; an empty rule set short-circuits.
pub fn apply_sanitize_rules(document: &Document, rules: &[SanitizeRule]) -> Document {
    let mut sanitized = document.clone();
    if rules.is_empty() {
        return sanitized;
    }

    for rule in rules {
        for (field, value) in sanitized.iter_mut() {
            if rule.fields.matches(field) {
                *value = (rule.transform)(value);
            }
        }
    }
    sanitized
}

/// Apply sanitize rules to a raw filter value (an object); any other
/// value passes through untouched.
pub fn apply_rules_to_value(value: &Value, rules: &[SanitizeRule]) -> Value {
    match value.as_object() {
        Some(map) if !rules.is_empty() => Value::Object(apply_sanitize_rules(map, rules)),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnibase_core::FieldSelector;
    use serde_json::json;

    fn filter(value: Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    #[test]
    fn whitelist_accepts_declared_fields_recursively() {
        let allowed = vec!["role".to_string(), "age".to_string()];
        let f = filter(json!({"role": "admin", "$or": [{"age": {"$gte": 18}}]}));
        assert!(check_filter_fields(&f, &allowed, "users").is_ok());
    }

    #[test]
    fn whitelist_rejects_unknown_fields_with_the_valid_list() {
        let allowed = vec!["role".to_string(), "age".to_string()];
        let f = filter(json!({"$and": [{"nickname": "z"}]}));
        let err = check_filter_fields(&f, &allowed, "users").unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("role, age"));
    }

    #[test]
    fn underscore_fields_are_reserved() {
        let err = check_reserved_fields(&filter(json!({"_id": "x"}))).unwrap_err();
        assert!(err.fix.contains("_source"));
        assert!(check_reserved_fields(&filter(json!({"id": "x"}))).is_ok());
    }

    #[test]
    fn index_name_rules() {
        assert!(check_index_name("users").is_ok());
        assert!(check_index_name("users-2024").is_ok());
        assert!(check_index_name("users*").is_err());
        assert!(check_index_name("a,b").is_err());
        assert!(check_index_name("has space").is_err());
        assert!(check_index_name(".hidden").is_err());
        assert!(check_index_name("-dash").is_err());
        assert!(check_index_name("").is_err());
    }

    #[test]
    fn nested_quantifiers_are_blocked() {
        let err = check_regex_complexity(&filter(json!({"name": {"$regex": "(a+)+"}})))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);

        assert!(check_regex_complexity(&filter(json!({"name": {"$regex": "^a+b$"}}))).is_ok());
    }

    #[test]
    fn over_long_patterns_are_blocked() {
        let long = "a".repeat(1001);
        let err =
            check_regex_complexity(&filter(json!({"name": {"$regex": long}}))).unwrap_err();
        assert!(err.message.contains("1001"));
    }

    #[test]
    fn nested_regex_under_not_is_still_gated() {
        let f = filter(json!({"name": {"$not": {"$regex": "(x*)*"}}}));
        assert!(check_regex_complexity(&f).is_err());
    }

    #[test]
    fn rules_never_mutate_the_input() {
        let original = json!({"email": "  A@B.C  ", "age": 30})
            .as_object()
            .unwrap()
            .clone();
        let before = original.clone();

        let rules = vec![SanitizeRule::new(
            FieldSelector::One("email".into()),
            |v| match v.as_str() {
                Some(s) => json!(s.trim().to_lowercase()),
                None => v.clone(),
            },
        )];
        let sanitized = apply_sanitize_rules(&original, &rules);

        assert_eq!(original, before);
        assert_eq!(sanitized.get("email"), Some(&json!("a@b.c")));
        assert_eq!(sanitized.get("age"), Some(&json!(30)));
    }

    #[test]
    fn rules_apply_in_order() {
        let original = json!({"name": "x"}).as_object().unwrap().clone();
        let rules = vec![
            SanitizeRule::for_all(|v| json!(format!("{}1", v.as_str().unwrap_or_default()))),
            SanitizeRule::for_all(|v| json!(format!("{}2", v.as_str().unwrap_or_default()))),
        ];
        let sanitized = apply_sanitize_rules(&original, &rules);
        assert_eq!(sanitized.get("name"), Some(&json!("x12")));
    }

    #[test]
    fn empty_rule_set_short_circuits() {
        let original = json!({"a": 1}).as_object().unwrap().clone();
        let sanitized = apply_sanitize_rules(&original, &[]);
        assert_eq!(sanitized, original);
    }
}
