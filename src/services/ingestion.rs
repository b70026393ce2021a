//! Ingestion loop: drives consumer -> decode -> validate -> store -> cache.
//!
//! Messages are handled one at a time in delivery order. A message that fails
//! any step is dropped and the loop moves on; only cancellation or a closed
//! consumer ends it.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::lifecycle::phase::{Phase, PhaseCell};
use crate::ports::{ConsumerError, MessageConsumer};
use crate::services::order_service::OrderService;

pub const DEFAULT_READ_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Persisted and cached.
    Stored { order_uid: String },
    /// Persisted; the cache write failed.
    StoredNotCached { order_uid: String },
    /// Malformed or invalid; never persisted.
    Rejected,
    /// The store write failed; the message is dropped.
    StoreFailed { order_uid: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub persisted: u64,
    pub rejected: u64,
    pub store_failures: u64,
    pub cache_failures: u64,
    pub read_errors: u64,
}

impl IngestionStats {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Stored { .. } => self.persisted += 1,
            MessageOutcome::StoredNotCached { .. } => {
                self.persisted += 1;
                self.cache_failures += 1;
            }
            MessageOutcome::Rejected => self.rejected += 1,
            MessageOutcome::StoreFailed { .. } => self.store_failures += 1,
        }
    }
}

pub struct IngestionLoop {
    service: Arc<OrderService>,
    consumer: Arc<dyn MessageConsumer>,
    read_error_backoff: Duration,
    phase: Arc<PhaseCell>,
}

impl IngestionLoop {
    pub fn new(service: Arc<OrderService>, consumer: Arc<dyn MessageConsumer>) -> Self {
        Self {
            service,
            consumer,
            read_error_backoff: DEFAULT_READ_ERROR_BACKOFF,
            phase: Arc::new(PhaseCell::new()),
        }
    }

    pub fn with_read_error_backoff(mut self, backoff: Duration) -> Self {
        self.read_error_backoff = backoff;
        self
    }

    /// Shared view of the loop's phase, usable after `run` took ownership.
    pub fn phase(&self) -> Arc<PhaseCell> {
        self.phase.clone()
    }

    /// Runs until `shutdown` is cancelled or the consumer reports it is closed.
    /// A message already being processed when cancellation arrives is finished
    /// before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) -> IngestionStats {
        info!("Ingestion loop started");
        let mut stats = IngestionStats::default();

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.phase.advance_to(Phase::Draining);
                    info!("Shutdown requested, stopping ingestion loop");
                    break;
                }
                read = self.consumer.read_message() => read,
            };

            match read {
                Ok(raw) => {
                    let outcome = self.process_message(&raw).await;
                    stats.record(&outcome);
                }
                Err(ConsumerError::Timeout) => continue,
                Err(ConsumerError::Closed) => {
                    info!("Consumer closed, stopping ingestion loop");
                    break;
                }
                Err(e) => {
                    stats.read_errors += 1;
                    error!(error = %e, backoff_ms = self.read_error_backoff.as_millis() as u64, "Error reading message");
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            self.phase.advance_to(Phase::Draining);
                            info!("Shutdown requested during backoff, stopping ingestion loop");
                            break;
                        }
                        _ = tokio::time::sleep(self.read_error_backoff) => {}
                    }
                }
            }
        }

        self.phase.advance_to(Phase::Stopped);
        info!(
            persisted = stats.persisted,
            rejected = stats.rejected,
            store_failures = stats.store_failures,
            cache_failures = stats.cache_failures,
            read_errors = stats.read_errors,
            "Ingestion loop stopped"
        );
        stats
    }

    /// Handles one raw message end to end.
    pub async fn process_message(&self, raw: &[u8]) -> MessageOutcome {
        let order = match self.service.decode(raw) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Dropping undecodable message");
                return MessageOutcome::Rejected;
            }
        };

        if let Err(e) = self.service.validate(&order) {
            warn!(order_uid = %order.order_uid, error = %e, "Dropping invalid order");
            return MessageOutcome::Rejected;
        }
        debug!(order_uid = %order.order_uid, "Order decoded and validated");

        if let Err(e) = self.service.save_order(&order).await {
            error!(order_uid = %order.order_uid, error = %e, "Error saving order, message dropped");
            return MessageOutcome::StoreFailed {
                order_uid: order.order_uid,
            };
        }
        debug!(order_uid = %order.order_uid, "Order saved");

        if let Err(e) = self.service.set_order(&order).await {
            warn!(order_uid = %order.order_uid, error = %e, "Order saved but not cached");
            return MessageOutcome::StoredNotCached {
                order_uid: order.order_uid,
            };
        }

        info!(order_uid = %order.order_uid, "Successfully processed order");
        MessageOutcome::Stored {
            order_uid: order.order_uid,
        }
    }
}
