//! Timestamp injection for inserts and updates.

use chrono::{DateTime, Utc};
use serde_json::Value;

use omnibase_core::{Document, TimestampConfig, Update};

/// Return a fresh document with the configured creation and update fields
/// set to `now` iff the caller has not already set them. A caller-provided
/// value is preserved even when it is JSON null. Disabled configuration is
/// the identity.
pub fn inject_insert_timestamps(
    document: &Document,
    config: &TimestampConfig,
    now: DateTime<Utc>,
) -> Document {
    let mut injected = document.clone();
    if !config.enabled {
        return injected;
    }

    let stamp = Value::String(now.to_rfc3339());
    if !injected.contains_key(&config.created_at) {
        injected.insert(config.created_at.clone(), stamp.clone());
    }
    if !injected.contains_key(&config.updated_at) {
        injected.insert(config.updated_at.clone(), stamp);
    }
    injected
}

/// Return a fresh update carrying the update-time field: added to an
/// existing `$set` iff absent, otherwise in a new `$set`. Updates never
/// touch the creation field.
pub fn inject_update_timestamps(
    update: &Update,
    config: &TimestampConfig,
    now: DateTime<Utc>,
) -> Update {
    let mut injected = update.clone();
    if !config.enabled {
        return injected;
    }

    let already_set = injected
        .set
        .iter()
        .any(|(field, _)| field == &config.updated_at);
    if !already_set {
        injected
            .set
            .push((config.updated_at.clone(), Value::String(now.to_rfc3339())));
    }
    injected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn now() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    fn enabled() -> TimestampConfig {
        TimestampConfig::enabled()
    }

    #[test]
    fn insert_sets_both_fields_when_absent() {
        let original = doc(json!({"name": "ann"}));
        let injected = inject_insert_timestamps(&original, &enabled(), now());

        assert_eq!(
            injected.get("created_at"),
            Some(&json!("2024-05-01T12:00:00+00:00"))
        );
        assert_eq!(
            injected.get("updated_at"),
            Some(&json!("2024-05-01T12:00:00+00:00"))
        );
        // Input untouched.
        assert_eq!(original, doc(json!({"name": "ann"})));
    }

    #[test]
    fn caller_provided_values_win_even_when_null() {
        let original = doc(json!({"name": "ann", "created_at": null}));
        let injected = inject_insert_timestamps(&original, &enabled(), now());

        assert_eq!(injected.get("created_at"), Some(&Value::Null));
        assert!(injected.get("updated_at").is_some());
    }

    #[test]
    fn disabled_injection_is_the_identity() {
        let original = doc(json!({"name": "ann"}));
        let injected = inject_insert_timestamps(&original, &TimestampConfig::disabled(), now());
        assert_eq!(injected, original);

        let update = Update::parse(&json!({"$inc": {"n": 1}})).unwrap();
        let injected = inject_update_timestamps(&update, &TimestampConfig::disabled(), now());
        assert_eq!(injected, update);
    }

    #[test]
    fn update_without_set_gains_one() {
        let update = Update::parse(&json!({"$inc": {"loginCount": 1}})).unwrap();
        let injected = inject_update_timestamps(&update, &enabled(), now());

        assert_eq!(injected.inc, update.inc);
        assert_eq!(
            injected.set,
            vec![(
                "updated_at".to_string(),
                json!("2024-05-01T12:00:00+00:00")
            )]
        );
        // Original unmodified.
        assert!(update.set.is_empty());
    }

    #[test]
    fn existing_updated_at_is_preserved() {
        let update =
            Update::parse(&json!({"$set": {"updated_at": "caller-chosen"}})).unwrap();
        let injected = inject_update_timestamps(&update, &enabled(), now());
        assert_eq!(
            injected.set,
            vec![("updated_at".to_string(), json!("caller-chosen"))]
        );
    }

    #[test]
    fn updates_never_add_created_at() {
        let update = Update::parse(&json!({"$set": {"name": "x"}})).unwrap();
        let injected = inject_update_timestamps(&update, &enabled(), now());
        assert!(!injected.set.iter().any(|(field, _)| field == "created_at"));
        assert!(injected.set.iter().any(|(field, _)| field == "updated_at"));
    }

    #[test]
    fn custom_field_pair_is_honored() {
        let config = TimestampConfig::with_fields("inserted", "touched");
        let injected = inject_insert_timestamps(&doc(json!({})), &config, now());
        assert!(injected.contains_key("inserted"));
        assert!(injected.contains_key("touched"));
    }
}
