// Worker job consumer: binds the job processor to the JetStream consumer

use super::processor::JobProcessor;
use crate::config::Settings;
use crate::errors::QueueError;
use crate::queue::{JobConsumer, NatsClient, NatsJobConsumer};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use std::sync::Arc;
use tracing::{info, instrument};

/// Worker job consumer that processes jobs from the queues this worker serves
pub struct WorkerJobConsumer {
    consumer: NatsJobConsumer,
}

impl WorkerJobConsumer {
    /// Create the durable consumer for `worker.queues` and attach the processor
    #[instrument(skip_all, fields(queues = ?settings.worker.queues))]
    pub async fn new(
        nats_client: &NatsClient,
        processor: Arc<JobProcessor>,
        settings: &Settings,
    ) -> Result<Self, QueueError> {
        info!("Creating worker job consumer");

        let pull_consumer = nats_client
            .get_or_create_consumer(&settings.worker.queues)
            .await?;
        let backoff: Arc<dyn RetryStrategy> =
            Arc::new(ExponentialBackoff::from_jobs_config(&settings.jobs));

        let consumer = NatsJobConsumer::new(
            pull_consumer,
            processor.handler(),
            settings.worker.concurrency,
            settings.nats.max_deliver,
            backoff,
        );

        Ok(Self { consumer })
    }

    /// Consume until shutdown is requested and in-flight jobs have finished
    pub async fn start(&self) -> Result<(), QueueError> {
        info!("Starting worker job consumer");
        self.consumer.start().await
    }

    /// Request graceful shutdown
    pub fn shutdown(&self) {
        info!("Requesting worker shutdown");
        self.consumer.shutdown();
    }
}
