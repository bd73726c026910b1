// NATS JetStream client for the durable job queue

use crate::config::NatsConfig;
use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::{pull, AckPolicy, PullConsumer},
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS JetStream client
#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Wrap an existing connection, e.g. one shared with the message bus
    pub fn from_client(client: async_nats::Client, config: NatsConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            config,
        }
    }

    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        Ok(Self::from_client(client, config))
    }

    /// Subject a logical queue is published on
    pub fn queue_subject(&self, queue: &str) -> String {
        format!("{}.{}", self.config.subject_prefix, queue)
    }

    /// Initialize the job stream with work-queue retention
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.subject_prefix)],
            retention: RetentionPolicy::WorkQueue, // Messages deleted after acknowledgment
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(
            stream_name = %self.config.stream_name,
            "Stream initialized successfully"
        );

        Ok(stream)
    }

    /// Create or get the durable pull consumer filtered to `queues`
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(&self, queues: &[String]) -> Result<PullConsumer, QueueError> {
        let durable_name = durable_name(&self.config.consumer_name, queues);
        info!(durable_name = %durable_name, "Creating consumer");

        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(format!("Stream not found: {}", e)))?;

        let consumer_config = pull::Config {
            durable_name: Some(durable_name.clone()),
            ack_policy: AckPolicy::Explicit,
            max_deliver: self.config.max_deliver,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            filter_subjects: queues.iter().map(|q| self.queue_subject(q)).collect(),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&durable_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(durable_name = %durable_name, queues = ?queues, "Consumer ready");

        Ok(consumer)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

/// Durable consumer name for a set of logical queues.
///
/// Workers serving the same queues share one durable and split its messages; a worker with a
/// process-local queue gets a durable of its own.
pub fn durable_name(consumer_name: &str, queues: &[String]) -> String {
    let mut queues: Vec<&str> = queues.iter().map(String::as_str).collect();
    queues.sort_unstable();
    queues.dedup();
    let suffix: String = queues
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!("{}-{}", consumer_name, suffix)
}
