//! Driver-native error normalization.
//!
//! Three mappers (one per backend family) inspect opaque driver errors by
//! known code tokens or message substrings and produce the normalized
//! `DbError` with a remediation tuned to the code. The match tables are
//! kept as data so new driver quirks are one-line additions.

use crate::error::{DbError, ErrorCode};
use crate::types::Backend;

/// SQLSTATE / vendor codes across the four SQL dialects.
const SQL_CODE_TABLE: &[(&str, ErrorCode)] = &[
    // PostgreSQL SQLSTATE
    ("23505", ErrorCode::DuplicateKey),
    ("23502", ErrorCode::ValidationError),
    ("23503", ErrorCode::ValidationError),
    ("22P02", ErrorCode::ValidationError),
    ("42P01", ErrorCode::CollectionNotFound),
    ("42703", ErrorCode::SchemaMismatch),
    ("42601", ErrorCode::QueryError),
    ("28P01", ErrorCode::AuthenticationFailed),
    ("28000", ErrorCode::AuthenticationFailed),
    ("57014", ErrorCode::Timeout),
    ("53300", ErrorCode::PoolExhausted),
    ("08000", ErrorCode::ConnectionFailed),
    ("08001", ErrorCode::ConnectionFailed),
    ("08003", ErrorCode::ConnectionLost),
    ("08006", ErrorCode::ConnectionLost),
    // MySQL vendor codes
    ("1062", ErrorCode::DuplicateKey),
    ("1050", ErrorCode::DuplicateKey),
    ("1061", ErrorCode::DuplicateKey),
    ("1146", ErrorCode::CollectionNotFound),
    ("1054", ErrorCode::SchemaMismatch),
    ("1045", ErrorCode::AuthenticationFailed),
    ("1205", ErrorCode::Timeout),
    ("1040", ErrorCode::PoolExhausted),
    ("2006", ErrorCode::ConnectionLost),
    ("2013", ErrorCode::ConnectionLost),
    // MSSQL
    ("2627", ErrorCode::DuplicateKey),
    ("2601", ErrorCode::DuplicateKey),
    ("208", ErrorCode::CollectionNotFound),
    ("207", ErrorCode::SchemaMismatch),
    ("18456", ErrorCode::AuthenticationFailed),
];

const SQL_MESSAGE_TABLE: &[(&str, ErrorCode)] = &[
    ("unique constraint", ErrorCode::DuplicateKey),
    ("duplicate key", ErrorCode::DuplicateKey),
    ("unique violation", ErrorCode::DuplicateKey),
    ("already exists", ErrorCode::DuplicateKey),
    ("no such table", ErrorCode::CollectionNotFound),
    ("does not exist", ErrorCode::CollectionNotFound),
    ("no such column", ErrorCode::SchemaMismatch),
    ("unknown column", ErrorCode::SchemaMismatch),
    ("syntax error", ErrorCode::QueryError),
    ("password authentication failed", ErrorCode::AuthenticationFailed),
    ("access denied", ErrorCode::AuthenticationFailed),
    ("permission denied", ErrorCode::AuthenticationFailed),
    ("login failed", ErrorCode::AuthenticationFailed),
    ("database is locked", ErrorCode::Timeout),
    ("timed out", ErrorCode::Timeout),
    ("timeout", ErrorCode::Timeout),
    ("too many connections", ErrorCode::PoolExhausted),
    ("too many clients", ErrorCode::PoolExhausted),
    ("connection refused", ErrorCode::ConnectionFailed),
    ("connection reset", ErrorCode::ConnectionLost),
    ("broken pipe", ErrorCode::ConnectionLost),
    ("server closed the connection", ErrorCode::ConnectionLost),
];

const MONGO_CODE_TABLE: &[(&str, ErrorCode)] = &[
    ("11000", ErrorCode::DuplicateKey),
    ("11001", ErrorCode::DuplicateKey),
    ("26", ErrorCode::CollectionNotFound),
    ("13", ErrorCode::AuthenticationFailed),
    ("18", ErrorCode::AuthenticationFailed),
    ("50", ErrorCode::Timeout),
    ("121", ErrorCode::ValidationError),
];

const MONGO_MESSAGE_TABLE: &[(&str, ErrorCode)] = &[
    ("duplicate key", ErrorCode::DuplicateKey),
    ("ns not found", ErrorCode::CollectionNotFound),
    ("authentication failed", ErrorCode::AuthenticationFailed),
    ("not authorized", ErrorCode::AuthenticationFailed),
    ("operation exceeded time limit", ErrorCode::Timeout),
    ("timed out", ErrorCode::Timeout),
    ("connection pool", ErrorCode::PoolExhausted),
    ("connection refused", ErrorCode::ConnectionFailed),
    ("connection closed", ErrorCode::ConnectionLost),
    ("document failed validation", ErrorCode::ValidationError),
];

/// Elasticsearch error `type` tokens and HTTP statuses.
const ELASTIC_CODE_TABLE: &[(&str, ErrorCode)] = &[
    ("index_not_found_exception", ErrorCode::CollectionNotFound),
    ("resource_already_exists_exception", ErrorCode::DuplicateKey),
    ("version_conflict_engine_exception", ErrorCode::DuplicateKey),
    ("security_exception", ErrorCode::AuthenticationFailed),
    ("parsing_exception", ErrorCode::QueryError),
    ("search_phase_execution_exception", ErrorCode::QueryError),
    ("mapper_parsing_exception", ErrorCode::ValidationError),
    ("strict_dynamic_mapping_exception", ErrorCode::SchemaMismatch),
    ("circuit_breaking_exception", ErrorCode::PoolExhausted),
    ("es_rejected_execution_exception", ErrorCode::PoolExhausted),
    ("401", ErrorCode::AuthenticationFailed),
    ("403", ErrorCode::AuthenticationFailed),
    ("404", ErrorCode::CollectionNotFound),
    ("408", ErrorCode::Timeout),
    ("409", ErrorCode::DuplicateKey),
    ("429", ErrorCode::PoolExhausted),
    ("504", ErrorCode::Timeout),
];

const ELASTIC_MESSAGE_TABLE: &[(&str, ErrorCode)] = &[
    ("index_not_found", ErrorCode::CollectionNotFound),
    ("unable to authenticate", ErrorCode::AuthenticationFailed),
    ("missing authentication", ErrorCode::AuthenticationFailed),
    ("timed out", ErrorCode::Timeout),
    ("timeout", ErrorCode::Timeout),
    ("connection refused", ErrorCode::ConnectionFailed),
    ("connection reset", ErrorCode::ConnectionLost),
];

/// Remediation sentence tuned to a normalized code.
fn fix_for(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::ConnectionFailed => {
            "Verify the server is reachable and the connection URI is correct."
        }
        ErrorCode::ConnectionLost => {
            "Wait for the reconnect controller to restore the connection, then retry."
        }
        ErrorCode::AuthenticationFailed => {
            "Check the credentials embedded in the connection URI."
        }
        ErrorCode::Timeout => {
            "Narrow the query with a more selective filter or raise the driver timeout."
        }
        ErrorCode::PoolExhausted => {
            "Lower request concurrency or configure a larger pool (pool: \"high\")."
        }
        ErrorCode::DuplicateKey => {
            "Use update_one to modify the existing document, or check existence first."
        }
        ErrorCode::ValidationError => {
            "Run validate with the document to see which fields fail the declared schema."
        }
        ErrorCode::CollectionNotFound => {
            "Call ensure_collections to create declared collections, or check the name with describe."
        }
        ErrorCode::QueryError => "Preview the generated query with explain before executing.",
        ErrorCode::GuardrailBlocked => "Provide the confirmation token the guardrail asks for.",
        ErrorCode::UnknownOperator => "Use only the documented filter operators.",
        ErrorCode::SchemaMismatch => {
            "Compare the filter fields against the field list from describe."
        }
        ErrorCode::UnsupportedOperation => "Use the documented equivalent operation.",
        ErrorCode::InternalError => "Retry the operation and report the issue if it persists.",
    }
}

fn lookup(
    code: Option<&str>,
    message: &str,
    code_table: &[(&str, ErrorCode)],
    message_table: &[(&str, ErrorCode)],
) -> ErrorCode {
    if let Some(code) = code {
        if let Some((_, mapped)) = code_table.iter().find(|(token, _)| *token == code) {
            return *mapped;
        }
    }
    let lowered = message.to_ascii_lowercase();
    message_table
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, mapped)| *mapped)
        .unwrap_or(ErrorCode::QueryError)
}

fn normalized(
    code: ErrorCode,
    backend_family: &str,
    collection: Option<&str>,
) -> DbError {
    let message = match collection {
        Some(collection) => format!(
            "{} error ({}) on collection '{}'.",
            backend_family, code, collection
        ),
        None => format!("{} error ({}).", backend_family, code),
    };
    let mut err = DbError::new(code, message, fix_for(code));
    if let Some(collection) = collection {
        err = err.with_collection(collection);
    }
    err
}

/// Normalize a relational driver error from its SQLSTATE / vendor code
/// and message text.
pub fn map_sql_error(code: Option<&str>, message: &str, collection: Option<&str>) -> DbError {
    let mapped = lookup(code, message, SQL_CODE_TABLE, SQL_MESSAGE_TABLE);
    normalized(mapped, "SQL", collection)
}

/// Normalize a document-store driver error.
pub fn map_mongo_error(code: Option<&str>, message: &str, collection: Option<&str>) -> DbError {
    let mapped = lookup(code, message, MONGO_CODE_TABLE, MONGO_MESSAGE_TABLE);
    normalized(mapped, "Document store", collection).with_backend(Backend::MongoDb)
}

/// Normalize a search-engine error from its error `type` (or HTTP status)
/// and reason text.
pub fn map_elastic_error(code: Option<&str>, message: &str, collection: Option<&str>) -> DbError {
    let mapped = lookup(code, message, ELASTIC_CODE_TABLE, ELASTIC_MESSAGE_TABLE);
    normalized(mapped, "Search engine", collection).with_backend(Backend::Elastic)
}

/// Method names from other client libraries mapped to this API.
const FOREIGN_METHOD_TABLE: &[(&str, &str)] = &[
    ("find", "query_many"),
    ("findOne", "query_one"),
    ("findMany", "query_many"),
    ("findAll", "query_many"),
    ("insert", "insert_one"),
    ("insertOne", "insert_one"),
    ("insertMany", "insert_many"),
    ("create", "insert_one"),
    ("save", "insert_one"),
    ("updateOne", "update_one"),
    ("updateMany", "update_many"),
    ("replaceOne", "update_one"),
    ("deleteOne", "delete_one"),
    ("deleteMany", "delete_many"),
    ("remove", "delete_many"),
    ("bulkWrite", "batch"),
    ("aggregate", "query_many"),
    ("countDocuments", "count"),
    ("estimatedDocumentCount", "count"),
    ("distinct", "query_many"),
    ("select", "query_many"),
];

/// Self-correction for calls arriving with another client library's
/// method name.
pub fn suggest_for_foreign_method(name: &str) -> DbError {
    let fix = match FOREIGN_METHOD_TABLE
        .iter()
        .find(|(foreign, _)| *foreign == name)
    {
        Some((_, equivalent)) => format!("Use {} instead of {}.", equivalent, name),
        None => format!(
            "'{}' is not part of this API; see describe for the available operations.",
            name
        ),
    };
    DbError::new(
        ErrorCode::UnsupportedOperation,
        format!("Operation '{}' is not part of this API.", name),
        fix,
    )
}

/// `COLLECTION_NOT_FOUND` with a nearest-name suggestion from the
/// registered set at Levenshtein distance 3 or less.
pub fn unknown_collection(name: &str, registered: &[String]) -> DbError {
    let nearest = registered
        .iter()
        .map(|candidate| (levenshtein(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= 3)
        .min_by_key(|(distance, _)| *distance);

    let fix = match nearest {
        Some((_, suggestion)) => format!("Did you mean '{}'?", suggestion),
        None if registered.is_empty() => {
            "No collections are registered; call ensure_collections after registering schemas."
                .to_string()
        }
        None => format!("Registered collections: {}.", registered.join(", ")),
    };

    DbError::new(
        ErrorCode::CollectionNotFound,
        format!("Collection '{}' is not registered.", name),
        fix,
    )
    .with_collection(name)
}

/// Classic two-row edit distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_unique_violation_maps_to_duplicate_key() {
        let err = map_sql_error(Some("23505"), "unique violation", Some("users"));
        assert_eq!(err.code, ErrorCode::DuplicateKey);
        assert!(!err.retryable);
        assert!(err.fix.contains("update_one"));
        assert_eq!(err.collection.as_deref(), Some("users"));
    }

    #[test]
    fn missing_table_suggests_ensure_collections() {
        let err = map_sql_error(Some("42P01"), "relation \"users\" does not exist", None);
        assert_eq!(err.code, ErrorCode::CollectionNotFound);
        assert!(err.fix.contains("ensure_collections"));
    }

    #[test]
    fn message_substrings_back_up_unknown_codes() {
        let err = map_sql_error(None, "FATAL: too many clients already", None);
        assert_eq!(err.code, ErrorCode::PoolExhausted);
        assert!(err.retryable);

        let err = map_sql_error(Some("99999"), "connection refused", None);
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }

    #[test]
    fn unmatched_errors_fall_back_to_query_error() {
        let err = map_sql_error(None, "something inscrutable", None);
        assert_eq!(err.code, ErrorCode::QueryError);
    }

    #[test]
    fn mongo_duplicate_key_by_code() {
        let err = map_mongo_error(Some("11000"), "E11000 duplicate key error", Some("users"));
        assert_eq!(err.code, ErrorCode::DuplicateKey);
        assert_eq!(err.backend, Some(Backend::MongoDb));
    }

    #[test]
    fn elastic_index_not_found_by_type_token() {
        let err = map_elastic_error(
            Some("index_not_found_exception"),
            "no such index [users]",
            Some("users"),
        );
        assert_eq!(err.code, ErrorCode::CollectionNotFound);
        assert_eq!(err.backend, Some(Backend::Elastic));
    }

    #[test]
    fn foreign_method_names_get_equivalents() {
        let err = suggest_for_foreign_method("findOne");
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
        assert!(err.fix.contains("query_one"));

        let err = suggest_for_foreign_method("bulkWrite");
        assert!(err.fix.contains("batch"));

        let err = suggest_for_foreign_method("aggregate");
        assert!(err.fix.contains("query_many"));
    }

    #[test]
    fn nearby_collection_names_are_suggested() {
        let registered = vec!["users".to_string(), "orders".to_string()];
        let err = unknown_collection("user", &registered);
        assert_eq!(err.code, ErrorCode::CollectionNotFound);
        assert!(err.fix.contains("users"));

        // Distance > 3 from every registered name: no suggestion, list instead.
        let err = unknown_collection("invoices", &registered);
        assert!(err.fix.contains("Registered collections"));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("users", "users"), 0);
        assert_eq!(levenshtein("user", "users"), 1);
        assert_eq!(levenshtein("uesrs", "users"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
