//! Receipt observer: turns every write receipt into events and logs.

use tracing::{debug, info, warn};

use omnibase_core::{DbEvent, EventBus, LogMode, WriteReceipt};

/// Watches every receipt: publishes `operation`, and `slow-query` when the
/// duration crosses the configured threshold.
#[derive(Debug, Clone)]
pub struct OperationLogger {
    events: EventBus,
    mode: LogMode,
    slow_query_ms: u64,
}

impl OperationLogger {
    pub fn new(events: EventBus, mode: LogMode, slow_query_ms: u64) -> Self {
        Self {
            events,
            mode,
            slow_query_ms,
        }
    }

    pub fn observe(&self, receipt: &WriteReceipt) {
        if self.mode.enabled() {
            match self.mode {
                LogMode::Verbose => info!(
                    collection = %receipt.collection,
                    operation = %receipt.operation,
                    matched = receipt.matched_count,
                    modified = receipt.modified_count,
                    inserted = receipt.inserted_count,
                    deleted = receipt.deleted_count,
                    duration_ms = receipt.duration_ms,
                    "operation completed"
                ),
                _ => debug!(
                    collection = %receipt.collection,
                    operation = %receipt.operation,
                    duration_ms = receipt.duration_ms,
                    "operation completed"
                ),
            }
        }

        self.events.publish(DbEvent::Operation {
            receipt: receipt.clone(),
        });

        if receipt.duration_ms >= self.slow_query_ms {
            warn!(
                collection = %receipt.collection,
                operation = %receipt.operation,
                duration_ms = receipt.duration_ms,
                threshold_ms = self.slow_query_ms,
                "slow query"
            );
            self.events.publish(DbEvent::SlowQuery {
                collection: receipt.collection.clone(),
                operation: receipt.operation.to_string(),
                duration_ms: receipt.duration_ms,
                threshold_ms: self.slow_query_ms,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnibase_core::{Backend, Operation};

    fn receipt(duration_ms: u64) -> WriteReceipt {
        WriteReceipt::new(Operation::UpdateMany, "users", Backend::Postgres)
            .with_modified(3)
            .with_duration_ms(duration_ms)
    }

    #[tokio::test]
    async fn every_receipt_publishes_an_operation_event() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let logger = OperationLogger::new(events, LogMode::On, 1000);

        logger.observe(&receipt(5));

        match rx.recv().await.unwrap() {
            DbEvent::Operation { receipt } => assert_eq!(receipt.modified_count, 3),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn crossing_the_threshold_adds_a_slow_query_event() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let logger = OperationLogger::new(events, LogMode::On, 1000);

        logger.observe(&receipt(1000));

        assert!(matches!(rx.recv().await.unwrap(), DbEvent::Operation { .. }));
        match rx.recv().await.unwrap() {
            DbEvent::SlowQuery {
                duration_ms,
                threshold_ms,
                ..
            } => {
                assert_eq!(duration_ms, 1000);
                assert_eq!(threshold_ms, 1000);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
