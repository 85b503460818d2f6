//! Connection configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Pool sizing presets.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolSize {
    High,
    #[default]
    Standard,
    Low,
}

impl PoolSize {
    /// Maximum connections the preset asks the driver for.
    pub fn max_connections(&self) -> u32 {
        match self {
            PoolSize::High => 20,
            PoolSize::Standard => 10,
            PoolSize::Low => 2,
        }
    }
}

/// Operation logging level.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    Off,
    #[default]
    On,
    Verbose,
}

impl LogMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, LogMode::Off)
    }
}

/// Automatic created_at / updated_at injection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampConfig {
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TimestampConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::enabled()
        }
    }

    /// Enabled with the default field pair.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }

    pub fn with_fields(created_at: impl Into<String>, updated_at: impl Into<String>) -> Self {
        Self {
            enabled: true,
            created_at: created_at.into(),
            updated_at: updated_at.into(),
        }
    }
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Reconnect controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Search-engine specific settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElasticConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_fingerprint: Option<String>,
    #[serde(default)]
    pub sniff_on_start: bool,
}

/// Which fields a sanitize rule applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSelector {
    /// Every field.
    All,
    One(String),
    Many(Vec<String>),
}

impl FieldSelector {
    pub fn matches(&self, field: &str) -> bool {
        match self {
            FieldSelector::All => true,
            FieldSelector::One(name) => name == field || name == "*",
            FieldSelector::Many(names) => names.iter().any(|name| name == field),
        }
    }
}

/// A caller-supplied value transform applied by the sanitizer.
#[derive(Clone)]
pub struct SanitizeRule {
    pub fields: FieldSelector,
    pub transform: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
}

impl SanitizeRule {
    pub fn new(
        fields: FieldSelector,
        transform: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            fields,
            transform: Arc::new(transform),
        }
    }

    /// A rule applied to every field.
    pub fn for_all(transform: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::new(FieldSelector::All, transform)
    }
}

impl fmt::Debug for SanitizeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizeRule")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Full connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub uri: String,
    pub pool: PoolSize,
    pub db_name: Option<String>,
    /// Free-form label used in logs.
    pub label: Option<String>,
    /// Validate writes against registered schemas.
    pub schema_validation: bool,
    pub sanitize: bool,
    pub sanitize_rules: Vec<SanitizeRule>,
    pub guardrails: bool,
    pub logging: LogMode,
    pub slow_query_ms: u64,
    pub timestamps: TimestampConfig,
    pub reconnect: ReconnectConfig,
    pub elastic: ElasticConfig,
}

impl DbConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            pool: PoolSize::default(),
            db_name: None,
            label: None,
            schema_validation: false,
            sanitize: true,
            sanitize_rules: Vec::new(),
            guardrails: true,
            logging: LogMode::default(),
            slow_query_ms: 1000,
            timestamps: TimestampConfig::default(),
            reconnect: ReconnectConfig::default(),
            elastic: ElasticConfig::default(),
        }
    }

    pub fn with_pool(mut self, pool: PoolSize) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.schema_validation = enabled;
        self
    }

    pub fn with_sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = enabled;
        self
    }

    pub fn with_sanitize_rule(mut self, rule: SanitizeRule) -> Self {
        self.sanitize_rules.push(rule);
        self
    }

    pub fn with_guardrails(mut self, enabled: bool) -> Self {
        self.guardrails = enabled;
        self
    }

    pub fn with_logging(mut self, mode: LogMode) -> Self {
        self.logging = mode;
        self
    }

    pub fn with_slow_query_ms(mut self, threshold: u64) -> Self {
        self.slow_query_ms = threshold;
        self
    }

    pub fn with_timestamps(mut self, timestamps: TimestampConfig) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_elastic(mut self, elastic: ElasticConfig) -> Self {
        self.elastic = elastic;
        self
    }
}
