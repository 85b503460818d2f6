//! Ordered batch execution with one accumulated receipt.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use omnibase_core::{
    Backend, Confirm, DatabaseAdapter, ErrorCode, Operation, Result, WriteReceipt,
};

use crate::router::Pipeline;

/// One step of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchStep {
    InsertOne {
        collection: String,
        document: Value,
    },
    InsertMany {
        collection: String,
        documents: Vec<Value>,
    },
    UpdateOne {
        collection: String,
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
    UpdateMany {
        collection: String,
        filter: Value,
        update: Value,
        #[serde(default)]
        confirm: Option<Confirm>,
    },
    DeleteOne {
        collection: String,
        filter: Value,
    },
    DeleteMany {
        collection: String,
        filter: Value,
        #[serde(default)]
        confirm: Option<Confirm>,
    },
}

/// Execute the steps in order, under one transaction when the backend
/// supports it, and return a single receipt whose counts are the sums of
/// the per-step counts.
pub(crate) async fn run_batch(
    pipeline: &Pipeline,
    adapter: &dyn DatabaseAdapter,
    steps: Vec<BatchStep>,
) -> Result<WriteReceipt> {
    let backend = adapter.backend();
    let started = Instant::now();

    let mut receipt = match adapter.begin_transaction().await {
        Ok(scope) => {
            let result = execute_steps(pipeline, scope.as_ref(), steps, backend).await;
            match result {
                Ok(receipt) => {
                    scope.commit_transaction().await?;
                    receipt
                }
                Err(e) => {
                    if let Err(rollback) = scope.rollback_transaction().await {
                        tracing::warn!("batch rollback failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        }
        Err(e) if e.code == ErrorCode::UnsupportedOperation => {
            execute_steps(pipeline, adapter, steps, backend).await?
        }
        Err(e) => return Err(e),
    };

    receipt.duration_ms = started.elapsed().as_millis() as u64;
    Ok(receipt)
}

async fn execute_steps(
    pipeline: &Pipeline,
    adapter: &dyn DatabaseAdapter,
    steps: Vec<BatchStep>,
    backend: Backend,
) -> Result<WriteReceipt> {
    // The search engine has a bulk ingestion endpoint: contiguous inserts
    // to one index collapse into a single bulk call.
    let steps = if backend == Backend::Elastic {
        merge_contiguous_inserts(steps)
    } else {
        steps
    };

    let mut receipt = WriteReceipt::new(Operation::Batch, "batch", backend);
    for step in steps {
        let step_receipt = match step {
            BatchStep::InsertOne {
                collection,
                document,
            } => pipeline.insert_one(adapter, &collection, &document).await?,
            BatchStep::InsertMany {
                collection,
                documents,
            } => {
                pipeline
                    .insert_many(adapter, &collection, &documents)
                    .await?
            }
            BatchStep::UpdateOne {
                collection,
                filter,
                update,
                upsert,
            } => {
                pipeline
                    .update_one(adapter, &collection, &filter, &update, upsert)
                    .await?
            }
            BatchStep::UpdateMany {
                collection,
                filter,
                update,
                confirm,
            } => {
                pipeline
                    .update_many(adapter, &collection, &filter, &update, confirm)
                    .await?
            }
            BatchStep::DeleteOne { collection, filter } => {
                pipeline.delete_one(adapter, &collection, &filter).await?
            }
            BatchStep::DeleteMany {
                collection,
                filter,
                confirm,
            } => {
                pipeline
                    .delete_many(adapter, &collection, &filter, confirm)
                    .await?
            }
        };

        receipt.matched_count += step_receipt.matched_count;
        receipt.modified_count += step_receipt.modified_count;
        receipt.inserted_count += step_receipt.inserted_count;
        receipt.deleted_count += step_receipt.deleted_count;
        receipt.success = receipt.success && step_receipt.success;
    }

    Ok(receipt)
}

fn merge_contiguous_inserts(steps: Vec<BatchStep>) -> Vec<BatchStep> {
    let mut merged: Vec<BatchStep> = Vec::with_capacity(steps.len());
    for step in steps {
        let documents = match step {
            BatchStep::InsertOne {
                collection,
                document,
            } => Some((collection, vec![document])),
            BatchStep::InsertMany {
                collection,
                documents,
            } => Some((collection, documents)),
            other => {
                merged.push(other);
                None
            }
        };

        if let Some((collection, mut documents)) = documents {
            match merged.last_mut() {
                Some(BatchStep::InsertMany {
                    collection: last_collection,
                    documents: last_documents,
                }) if *last_collection == collection => {
                    last_documents.append(&mut documents);
                }
                _ => merged.push(BatchStep::InsertMany {
                    collection,
                    documents,
                }),
            }
        }
    }
    merged
}
