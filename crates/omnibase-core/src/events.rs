//! Typed event bus.
//!
//! A thin wrapper over a broadcast channel. Publishing is synchronous and
//! best-effort: with no live subscriber the event is dropped, and a slow
//! subscriber lags instead of stalling the publisher. Ordering is FIFO per
//! publisher.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{Backend, ConnectionStatus, WriteReceipt};

/// Everything the layer reports about itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DbEvent {
    Connected {
        backend: Backend,
        redacted_uri: String,
    },
    Disconnected {
        backend: Backend,
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    Reconnected {
        attempts: u32,
        downtime_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
    Operation {
        receipt: WriteReceipt,
    },
    SlowQuery {
        collection: String,
        operation: String,
        duration_ms: u64,
        threshold_ms: u64,
    },
    PoolStatus {
        status: ConnectionStatus,
    },
    GuardrailBlocked {
        collection: String,
        operation: String,
        reason: String,
    },
    Shutdown {
        exit_code: i32,
    },
}

/// Shared publish/subscribe handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DbEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Never blocks; an event with no subscribers is
    /// silently dropped.
    pub fn publish(&self, event: DbEvent) {
        trace!(?event, "publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DbEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
