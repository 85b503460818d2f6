//! Reconnect controller: exponential backoff with jitter, bounded
//! attempts, lifecycle events.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use omnibase_core::{
    Backend, DbError, DbEvent, ErrorCode, EventBus, ReconnectConfig, ReconnectStatus, Result,
};

pub struct ReconnectController {
    config: ReconnectConfig,
    events: EventBus,
    attempts: AtomicU32,
    last_disconnect: Mutex<Option<DateTime<Utc>>>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            attempts: AtomicU32::new(0),
            last_disconnect: Mutex::new(None),
        }
    }

    /// Raw backoff delay for a 1-based attempt:
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn compute_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(exponent as i32);
        delay.min(self.config.max_delay_ms as f64) as u64
    }

    /// Apply ±25% uniform jitter.
    fn jittered(&self, delay_ms: u64) -> u64 {
        let spread = delay_ms / 4;
        if spread == 0 {
            return delay_ms;
        }
        let low = delay_ms - spread;
        let high = delay_ms + spread;
        rand::thread_rng().gen_range(low..=high)
    }

    pub fn status(&self) -> ReconnectStatus {
        ReconnectStatus {
            enabled: self.config.enabled,
            attempts: self.attempts.load(Ordering::Relaxed),
            last_disconnect: *self
                .last_disconnect
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    /// Run the reconnect loop after a disconnect. Emits `disconnected`
    /// first, then `reconnecting` per attempt, and either `reconnected`
    /// with the total downtime or a terminal `CONNECTION_LOST` error.
    pub async fn run<F, Fut>(&self, backend: Backend, reason: &str, connect: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self.config.enabled {
            return Err(terminal_error(backend));
        }

        {
            let mut last = self
                .last_disconnect
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *last = Some(Utc::now());
        }
        self.events.publish(DbEvent::Disconnected {
            backend,
            reason: reason.to_string(),
        });

        let downtime_start = Instant::now();
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.config.max_attempts {
                warn!(backend = %backend, "reconnect attempts exhausted");
                self.events.publish(DbEvent::Error {
                    code: ErrorCode::ConnectionLost.to_string(),
                    message: format!(
                        "Gave up reconnecting to {} after {} attempts.",
                        backend, self.config.max_attempts
                    ),
                });
                return Err(terminal_error(backend));
            }

            let delay_ms = self.jittered(self.compute_delay_ms(attempt));
            self.events.publish(DbEvent::Reconnecting {
                attempt,
                max_attempts: self.config.max_attempts,
                delay_ms,
            });
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            match connect().await {
                Ok(()) => {
                    let downtime_ms = downtime_start.elapsed().as_millis() as u64;
                    info!(backend = %backend, attempt, downtime_ms, "reconnected");
                    self.events.publish(DbEvent::Reconnected {
                        attempts: attempt,
                        downtime_ms,
                    });
                    self.attempts.store(0, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    warn!(backend = %backend, attempt, "reconnect attempt failed: {}", e);
                }
            }
        }
    }
}

fn terminal_error(backend: Backend) -> DbError {
    DbError::new(
        ErrorCode::ConnectionLost,
        format!("Connection to {} was lost and not recovered.", backend),
        "Check the server, then reconnect with a fresh Database::connect call.",
    )
    .with_backend(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn controller(config: ReconnectConfig) -> ReconnectController {
        ReconnectController::new(config, EventBus::default())
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let c = controller(ReconnectConfig::default());
        assert_eq!(c.compute_delay_ms(1), 1000);
        assert_eq!(c.compute_delay_ms(2), 2000);
        assert_eq!(c.compute_delay_ms(3), 4000);
        assert_eq!(c.compute_delay_ms(5), 16000);
        // 1000 * 2^5 = 32000 caps at 30000.
        assert_eq!(c.compute_delay_ms(6), 30000);
        assert_eq!(c.compute_delay_ms(10), 30000);
    }

    #[test]
    fn jitter_stays_within_quarter_spread() {
        let c = controller(ReconnectConfig::default());
        for _ in 0..100 {
            let jittered = c.jittered(1000);
            assert!((750..=1250).contains(&jittered), "{}", jittered);
        }
    }

    #[tokio::test]
    async fn reconnects_and_emits_lifecycle_events() {
        let config = ReconnectConfig {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        };
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let controller = ReconnectController::new(config, events);

        // Fail twice, then succeed.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_connect = Arc::clone(&calls);
        controller
            .run(Backend::Postgres, "socket closed", move || {
                let calls = Arc::clone(&calls_in_connect);
                async move {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(DbError::new(
                            ErrorCode::ConnectionFailed,
                            "still down.".to_string(),
                            "wait.",
                        ))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), DbEvent::Disconnected { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DbEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DbEvent::Reconnecting { attempt: 2, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DbEvent::Reconnecting { attempt: 3, .. }
        ));
        match rx.recv().await.unwrap() {
            DbEvent::Reconnected { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected event {:?}", other),
        }

        // Attempts reset after success.
        assert_eq!(controller.status().attempts, 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_connection_lost() {
        let config = ReconnectConfig {
            enabled: true,
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        };
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let controller = ReconnectController::new(config, events);

        let err = controller
            .run(Backend::MySql, "socket closed", || async {
                Err(DbError::new(
                    ErrorCode::ConnectionFailed,
                    "still down.".to_string(),
                    "wait.",
                ))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionLost);
        assert!(err.retryable);

        // disconnected, 2x reconnecting, then the terminal error event.
        assert!(matches!(rx.recv().await.unwrap(), DbEvent::Disconnected { .. }));
        assert!(matches!(rx.recv().await.unwrap(), DbEvent::Reconnecting { .. }));
        assert!(matches!(rx.recv().await.unwrap(), DbEvent::Reconnecting { .. }));
        match rx.recv().await.unwrap() {
            DbEvent::Error { code, .. } => assert_eq!(code, "CONNECTION_LOST"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
