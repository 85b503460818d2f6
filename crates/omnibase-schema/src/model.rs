//! Declared collection schemas and their derived artifacts.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use omnibase_core::Document;
use omnibase_translate::{quote_ident, SqlDialect};

/// Logical field types. The modifiers of the external schema library
/// (required, enumerated values, max length) live on [`FieldSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Uuid,
    Json,
    Array(Box<FieldKind>),
    Object(Vec<FieldSpec>),
}

impl FieldKind {
    /// Short name used in describe output and validation messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Uuid => "uuid",
            FieldKind::Json => "json",
            FieldKind::Array(_) => "array",
            FieldKind::Object(_) => "object",
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Enumerated values, when the field is restricted to a closed set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            allowed_values: Vec::new(),
            max_length: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_allowed_values(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.allowed_values = values.into_iter().collect();
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// One failed validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
    pub expected: String,
    pub received: String,
}

/// Declared schema of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// The whitelist the sanitizer checks filter fields against.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Dry-run a document against the declared fields. Returns every
    /// failure rather than stopping at the first.
    pub fn validate_document(&self, document: &Document) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        for field in &self.fields {
            match document.get(&field.name) {
                None | Some(Value::Null) if field.required => failures.push(ValidationFailure {
                    field: field.name.clone(),
                    message: format!("Required field '{}' is missing.", field.name),
                    expected: field.kind.name().to_string(),
                    received: "nothing".to_string(),
                }),
                None | Some(Value::Null) => {}
                Some(value) => check_value(&field.name, field, value, &mut failures),
            }
        }

        let declared: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        for key in document.keys() {
            if !declared.contains(&key.as_str()) {
                failures.push(ValidationFailure {
                    field: key.clone(),
                    message: format!("Field '{}' is not declared for '{}'.", key, self.name),
                    expected: format!("one of: {}", declared.join(", ")),
                    received: key.clone(),
                });
            }
        }

        failures
    }

    /// CREATE TABLE statement for a relational backend.
    pub fn ddl(&self, dialect: SqlDialect) -> String {
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|field| {
                let mut column = format!(
                    "{} {}",
                    quote_ident(&field.name),
                    column_type(field, dialect)
                );
                if field.required {
                    column.push_str(" NOT NULL");
                }
                column
            })
            .collect();
        let body = columns.join(", ");
        let table = quote_ident(&self.name);

        match dialect {
            // MSSQL has no CREATE TABLE IF NOT EXISTS.
            SqlDialect::Mssql => format!(
                "IF OBJECT_ID('{}', 'U') IS NULL CREATE TABLE {} ({})",
                self.name, table, body
            ),
            _ => format!("CREATE TABLE IF NOT EXISTS {} ({})", table, body),
        }
    }

    /// Search-engine index mapping.
    pub fn elastic_mapping(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), mapping_type(&field.kind, field));
        }
        json!({"mappings": {"properties": properties}})
    }

    /// A working starting-point filter composed from the first two
    /// fields: equality for strings and enums, `$gte: 0` for numbers,
    /// literal `true` for booleans.
    pub fn example_filter(&self) -> Value {
        let mut example = Map::new();
        for field in &self.fields {
            if example.len() == 2 {
                break;
            }
            let value = match &field.kind {
                FieldKind::String | FieldKind::Uuid => {
                    if let Some(first) = field.allowed_values.first() {
                        json!(first)
                    } else {
                        json!("example")
                    }
                }
                FieldKind::Integer | FieldKind::Float => json!({"$gte": 0}),
                FieldKind::Boolean => json!(true),
                _ => continue,
            };
            example.insert(field.name.clone(), value);
        }
        Value::Object(example)
    }
}

fn check_value(
    path: &str,
    field: &FieldSpec,
    value: &Value,
    failures: &mut Vec<ValidationFailure>,
) {
    let fail = |failures: &mut Vec<ValidationFailure>, message: String, expected: String| {
        failures.push(ValidationFailure {
            field: path.to_string(),
            message,
            expected,
            received: received_type(value).to_string(),
        });
    };

    match &field.kind {
        FieldKind::String => match value.as_str() {
            Some(text) => {
                if let Some(max) = field.max_length {
                    if text.chars().count() > max {
                        fail(
                            failures,
                            format!("Field '{}' exceeds the maximum length of {}.", path, max),
                            format!("string of at most {} characters", max),
                        );
                    }
                }
                if !field.allowed_values.is_empty()
                    && !field.allowed_values.iter().any(|allowed| allowed == text)
                {
                    fail(
                        failures,
                        format!("Field '{}' is not one of the allowed values.", path),
                        format!("one of: {}", field.allowed_values.join(", ")),
                    );
                }
            }
            None => fail(
                failures,
                format!("Field '{}' must be a string.", path),
                "string".to_string(),
            ),
        },
        FieldKind::Integer => {
            if value.as_i64().is_none() {
                fail(
                    failures,
                    format!("Field '{}' must be an integer.", path),
                    "integer".to_string(),
                );
            }
        }
        FieldKind::Float => {
            if !value.is_number() {
                fail(
                    failures,
                    format!("Field '{}' must be a number.", path),
                    "number".to_string(),
                );
            }
        }
        FieldKind::Boolean => {
            if !value.is_boolean() {
                fail(
                    failures,
                    format!("Field '{}' must be a boolean.", path),
                    "boolean".to_string(),
                );
            }
        }
        FieldKind::Timestamp => {
            let valid = match value {
                Value::String(text) => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
                Value::Number(_) => true,
                _ => false,
            };
            if !valid {
                fail(
                    failures,
                    format!("Field '{}' must be an RFC 3339 timestamp or epoch number.", path),
                    "timestamp".to_string(),
                );
            }
        }
        FieldKind::Uuid => {
            let valid = value
                .as_str()
                .map(|text| {
                    text.len() == 36
                        && text
                            .chars()
                            .all(|c| c.is_ascii_hexdigit() || c == '-')
                })
                .unwrap_or(false);
            if !valid {
                fail(
                    failures,
                    format!("Field '{}' must be a UUID string.", path),
                    "uuid".to_string(),
                );
            }
        }
        FieldKind::Json => {}
        FieldKind::Array(inner) => match value.as_array() {
            Some(items) => {
                let inner_spec = FieldSpec::new(path, (**inner).clone());
                for (index, item) in items.iter().enumerate() {
                    check_value(
                        &format!("{}[{}]", path, index),
                        &inner_spec,
                        item,
                        failures,
                    );
                }
            }
            None => fail(
                failures,
                format!("Field '{}' must be an array.", path),
                "array".to_string(),
            ),
        },
        FieldKind::Object(nested_fields) => match value.as_object() {
            Some(nested) => {
                for nested_field in nested_fields {
                    match nested.get(&nested_field.name) {
                        None | Some(Value::Null) if nested_field.required => {
                            failures.push(ValidationFailure {
                                field: format!("{}.{}", path, nested_field.name),
                                message: format!(
                                    "Required field '{}.{}' is missing.",
                                    path, nested_field.name
                                ),
                                expected: nested_field.kind.name().to_string(),
                                received: "nothing".to_string(),
                            })
                        }
                        None | Some(Value::Null) => {}
                        Some(nested_value) => check_value(
                            &format!("{}.{}", path, nested_field.name),
                            nested_field,
                            nested_value,
                            failures,
                        ),
                    }
                }
            }
            None => fail(
                failures,
                format!("Field '{}' must be an object.", path),
                "object".to_string(),
            ),
        },
    }
}

fn received_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn column_type(field: &FieldSpec, dialect: SqlDialect) -> String {
    match (&field.kind, dialect) {
        (FieldKind::String, SqlDialect::Mssql) => match field.max_length {
            Some(max) => format!("NVARCHAR({})", max),
            None => "NVARCHAR(MAX)".to_string(),
        },
        (FieldKind::String, _) => match field.max_length {
            Some(max) => format!("VARCHAR({})", max),
            None => "TEXT".to_string(),
        },
        (FieldKind::Integer, SqlDialect::Sqlite) => "INTEGER".to_string(),
        (FieldKind::Integer, _) => "BIGINT".to_string(),
        (FieldKind::Float, SqlDialect::Postgres) => "DOUBLE PRECISION".to_string(),
        (FieldKind::Float, SqlDialect::MySql) => "DOUBLE".to_string(),
        (FieldKind::Float, SqlDialect::Mssql) => "FLOAT".to_string(),
        (FieldKind::Float, SqlDialect::Sqlite) => "REAL".to_string(),
        (FieldKind::Boolean, SqlDialect::Mssql) => "BIT".to_string(),
        (FieldKind::Boolean, SqlDialect::Sqlite) => "INTEGER".to_string(),
        (FieldKind::Boolean, _) => "BOOLEAN".to_string(),
        (FieldKind::Timestamp, SqlDialect::Postgres) => "TIMESTAMPTZ".to_string(),
        (FieldKind::Timestamp, SqlDialect::MySql) => "DATETIME".to_string(),
        (FieldKind::Timestamp, SqlDialect::Mssql) => "DATETIME2".to_string(),
        (FieldKind::Timestamp, SqlDialect::Sqlite) => "TEXT".to_string(),
        (FieldKind::Uuid, SqlDialect::Postgres) => "UUID".to_string(),
        (FieldKind::Uuid, SqlDialect::MySql) => "CHAR(36)".to_string(),
        (FieldKind::Uuid, SqlDialect::Mssql) => "UNIQUEIDENTIFIER".to_string(),
        (FieldKind::Uuid, SqlDialect::Sqlite) => "TEXT".to_string(),
        (FieldKind::Json | FieldKind::Array(_) | FieldKind::Object(_), SqlDialect::Postgres) => {
            "JSONB".to_string()
        }
        (FieldKind::Json | FieldKind::Array(_) | FieldKind::Object(_), SqlDialect::MySql) => {
            "JSON".to_string()
        }
        (FieldKind::Json | FieldKind::Array(_) | FieldKind::Object(_), SqlDialect::Mssql) => {
            "NVARCHAR(MAX)".to_string()
        }
        (FieldKind::Json | FieldKind::Array(_) | FieldKind::Object(_), SqlDialect::Sqlite) => {
            "TEXT".to_string()
        }
    }
}

fn mapping_type(kind: &FieldKind, field: &FieldSpec) -> Value {
    match kind {
        FieldKind::String => {
            if field.allowed_values.is_empty() {
                json!({"type": "text"})
            } else {
                json!({"type": "keyword"})
            }
        }
        FieldKind::Integer => json!({"type": "long"}),
        FieldKind::Float => json!({"type": "double"}),
        FieldKind::Boolean => json!({"type": "boolean"}),
        FieldKind::Timestamp => json!({"type": "date"}),
        FieldKind::Uuid => json!({"type": "keyword"}),
        FieldKind::Json => json!({"type": "object"}),
        // The engine maps arrays implicitly by element type.
        FieldKind::Array(inner) => mapping_type(inner, field),
        FieldKind::Object(nested) => {
            let mut properties = Map::new();
            for nested_field in nested {
                properties.insert(
                    nested_field.name.clone(),
                    mapping_type(&nested_field.kind, nested_field),
                );
            }
            json!({"type": "object", "properties": properties})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> CollectionSchema {
        CollectionSchema::new("users")
            .field(
                FieldSpec::string("role")
                    .required()
                    .with_allowed_values(["admin".to_string(), "member".to_string()]),
            )
            .field(FieldSpec::integer("age"))
            .field(FieldSpec::string("email").required().with_max_length(255))
            .field(FieldSpec::boolean("active"))
    }

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn valid_document_passes() {
        let failures = users_schema().validate_document(&doc(json!({
            "role": "admin",
            "age": 30,
            "email": "a@b.c",
            "active": true
        })));
        assert!(failures.is_empty(), "{:?}", failures);
    }

    #[test]
    fn missing_required_and_wrong_types_are_reported() {
        let failures = users_schema().validate_document(&doc(json!({
            "role": "superuser",
            "age": "thirty"
        })));
        let fields: Vec<&str> = failures.iter().map(|f| f.field.as_str()).collect();
        assert!(fields.contains(&"role"), "{:?}", failures);
        assert!(fields.contains(&"age"));
        assert!(fields.contains(&"email"));
    }

    #[test]
    fn undeclared_fields_are_reported() {
        let failures = users_schema().validate_document(&doc(json!({
            "role": "admin",
            "email": "a@b.c",
            "nickname": "zed"
        })));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field, "nickname");
        assert!(failures[0].expected.contains("role"));
    }

    #[test]
    fn max_length_is_enforced() {
        let failures = users_schema().validate_document(&doc(json!({
            "role": "admin",
            "email": "x".repeat(300)
        })));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].expected.contains("255"));
    }

    #[test]
    fn ddl_per_dialect() {
        let schema = users_schema();
        assert_eq!(
            schema.ddl(SqlDialect::Postgres),
            "CREATE TABLE IF NOT EXISTS \"users\" (\"role\" TEXT NOT NULL, \"age\" BIGINT, \
             \"email\" VARCHAR(255) NOT NULL, \"active\" BOOLEAN)"
        );
        let mssql = schema.ddl(SqlDialect::Mssql);
        assert!(mssql.starts_with("IF OBJECT_ID('users', 'U') IS NULL CREATE TABLE"));
        assert!(mssql.contains("\"email\" NVARCHAR(255) NOT NULL"));
        assert!(mssql.contains("\"active\" BIT"));
    }

    #[test]
    fn elastic_mapping_types() {
        let mapping = users_schema().elastic_mapping();
        let properties = &mapping["mappings"]["properties"];
        assert_eq!(properties["role"], json!({"type": "keyword"}));
        assert_eq!(properties["email"], json!({"type": "text"}));
        assert_eq!(properties["age"], json!({"type": "long"}));
        assert_eq!(properties["active"], json!({"type": "boolean"}));
    }

    #[test]
    fn example_filter_uses_first_two_fields() {
        let example = users_schema().example_filter();
        assert_eq!(example, json!({"role": "admin", "age": {"$gte": 0}}));
    }

    #[test]
    fn example_filter_boolean_is_literal_true() {
        let schema = CollectionSchema::new("flags")
            .field(FieldSpec::boolean("enabled"))
            .field(FieldSpec::string("name"));
        assert_eq!(
            schema.example_filter(),
            json!({"enabled": true, "name": "example"})
        );
    }
}
