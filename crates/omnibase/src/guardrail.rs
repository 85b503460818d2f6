//! Guardrails: hard preconditions on destructive or unbounded operations.

use tracing::warn;

use omnibase_core::{
    Confirm, DbError, DbEvent, ErrorCode, EventBus, Filter, Operation, QueryOptions, Result,
};

/// Evaluate the guardrail decision table before the adapter call.
///
/// A filter is "empty" iff it has zero keys. Blocking publishes a
/// `guardrail-blocked` event before raising, and the fix carries a
/// literal example invocation of the correct override.
pub fn check_guardrails(
    enabled: bool,
    operation: Operation,
    collection: &str,
    filter: &Filter,
    options: &QueryOptions,
    confirm: Option<Confirm>,
    events: &EventBus,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let reason = match operation {
        Operation::DeleteMany if filter.is_empty() && confirm != Some(Confirm::DeleteAll) => {
            Some((
                "delete_many with an empty filter requires explicit confirmation".to_string(),
                format!(
                    "To delete every document, pass the confirmation token: \
                     delete_many(\"{}\", {{}}, confirm: \"DELETE_ALL\").",
                    collection
                ),
            ))
        }
        Operation::UpdateMany if filter.is_empty() && confirm != Some(Confirm::UpdateAll) => {
            Some((
                "update_many with an empty filter requires explicit confirmation".to_string(),
                format!(
                    "To update every document, pass the confirmation token: \
                     update_many(\"{}\", {{}}, update, confirm: \"UPDATE_ALL\").",
                    collection
                ),
            ))
        }
        Operation::DeleteOne if filter.is_empty() => Some((
            "delete_one with an empty filter is ambiguous".to_string(),
            format!(
                "Target one document, e.g. delete_one(\"{}\", {{\"id\": 123}}); to remove \
                 everything use delete_many with DELETE_ALL.",
                collection
            ),
        )),
        Operation::QueryMany if options.limit.is_none() => Some((
            "query_many without a limit is unbounded".to_string(),
            format!(
                "Pass a limit, e.g. query_many(\"{}\", filter, {{\"limit\": 100}}).",
                collection
            ),
        )),
        _ => None,
    };

    let Some((reason, fix)) = reason else {
        return Ok(());
    };

    warn!(collection, operation = %operation, %reason, "guardrail blocked operation");
    events.publish(DbEvent::GuardrailBlocked {
        collection: collection.to_string(),
        operation: operation.to_string(),
        reason: reason.clone(),
    });

    Err(DbError::new(
        ErrorCode::GuardrailBlocked,
        format!("Operation blocked: {}.", reason),
        fix,
    )
    .with_collection(collection)
    .with_operation(operation))
}
