// Job consumer for NATS JetStream: bounded worker pool with ack / redeliver / dead-letter

use crate::errors::{FailureKind, JobError, QueueError};
use crate::queue::publisher::JobEnvelope;
use crate::retry::RetryStrategy;
use crate::telemetry;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{AckKind, Message};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, instrument, warn};

/// Job consumer trait for consuming jobs from the queue
#[async_trait::async_trait]
pub trait JobConsumer: Send + Sync {
    /// Start consuming jobs from the queue
    /// Returns when shutdown is requested and in-flight jobs have finished
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown
    fn shutdown(&self);
}

/// Callback that executes one delivered job
pub type JobHandler = Arc<
    dyn Fn(JobEnvelope) -> futures::future::BoxFuture<'static, Result<(), JobError>>
        + Send
        + Sync,
>;

/// What the stream is told about a finished delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Redeliver(Duration),
    DeadLetter,
}

/// Decide the fate of a delivery from its outcome and how many times it has been delivered
pub fn disposition(
    result: &Result<(), JobError>,
    delivered: i64,
    max_deliver: i64,
    backoff: &dyn RetryStrategy,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(err) if err.kind() == FailureKind::InvalidPayload => Disposition::DeadLetter,
        Err(_) if delivered >= max_deliver => Disposition::DeadLetter,
        Err(_) => Disposition::Redeliver(backoff.next_delay(delivered.max(1) as u32)),
    }
}

/// NATS-based job consumer implementation
pub struct NatsJobConsumer {
    consumer: PullConsumer,
    handler: JobHandler,
    permits: Arc<Semaphore>,
    concurrency: u32,
    max_deliver: i64,
    backoff: Arc<dyn RetryStrategy>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl NatsJobConsumer {
    pub fn new(
        consumer: PullConsumer,
        handler: JobHandler,
        concurrency: u32,
        max_deliver: i64,
        backoff: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            consumer,
            handler,
            permits: Arc::new(Semaphore::new(concurrency as usize)),
            concurrency,
            max_deliver,
            backoff,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Run one delivery to completion and report the outcome to the stream
    #[instrument(skip_all, fields(stream_sequence, delivered))]
    async fn process_message(
        message: Message,
        handler: JobHandler,
        max_deliver: i64,
        backoff: Arc<dyn RetryStrategy>,
    ) -> Result<(), QueueError> {
        let (stream_sequence, delivered) = {
            let info = message.info().map_err(|e| {
                QueueError::ConsumeFailed(format!("Failed to get message info: {}", e))
            })?;
            (info.stream_sequence, info.delivered)
        };
        tracing::Span::current()
            .record("stream_sequence", stream_sequence)
            .record("delivered", delivered);

        let result = match serde_json::from_slice::<JobEnvelope>(&message.payload) {
            Ok(envelope) => {
                info!(
                    job_id = %envelope.job_id,
                    job_name = envelope.job_name(),
                    "Processing job"
                );
                (handler)(envelope).await
            }
            Err(e) => {
                error!(error = %e, "Failed to deserialize job envelope");
                Err(JobError::InvalidPayload(e.to_string()))
            }
        };

        let ack = match disposition(&result, delivered, max_deliver, backoff.as_ref()) {
            Disposition::Ack => message.ack().await,
            Disposition::Redeliver(delay) => {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    "Job failed, scheduling redelivery"
                );
                message.ack_with(AckKind::Nak(Some(delay))).await
            }
            Disposition::DeadLetter => {
                error!(
                    max_deliver = max_deliver,
                    "Job failed permanently, moving to dead letter"
                );
                telemetry::record_job_dead_lettered();
                message.ack_with(AckKind::Term).await
            }
        };

        ack.map_err(|e| QueueError::AckFailed(format!("Failed to acknowledge message: {}", e)))
    }
}

#[async_trait::async_trait]
impl JobConsumer for NatsJobConsumer {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), QueueError> {
        info!(concurrency = self.concurrency, "Starting job consumer");

        let mut messages = self.consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        info!("Consumer started, waiting for messages");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            // Only pull a message once a worker slot is free
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => permit.map_err(|e| {
                    QueueError::ConsumeFailed(format!("Worker pool closed: {}", e))
                })?,
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
            };

            tokio::select! {
                message_result = messages.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            let handler = Arc::clone(&self.handler);
                            let backoff = Arc::clone(&self.backoff);
                            let max_deliver = self.max_deliver;
                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::process_message(message, handler, max_deliver, backoff).await
                                {
                                    error!(error = %e, "Failed to process message");
                                }
                                drop(permit);
                            });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
                // Timeout to check shutdown flag periodically
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    continue;
                }
            }
        }

        info!("Waiting for in-flight jobs to finish");
        let _drained = self
            .permits
            .acquire_many(self.concurrency)
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Worker pool closed: {}", e)))?;

        info!("Consumer stopped gracefully");
        Ok(())
    }

    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}
