// Job submission to the durable queue backend

use crate::context::RequestId;
use crate::errors::QueueError;
use crate::jobs::JobPayload;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Message format for a job in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    /// Concrete queue name, resolved at submission time
    pub queue: String,
    /// Request id ambient when the job was enqueued
    pub request_id: Option<RequestId>,
    pub payload: JobPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(payload: JobPayload, queue: impl Into<String>, request_id: Option<RequestId>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            queue: queue.into(),
            request_id,
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn job_name(&self) -> &'static str {
        self.payload.job_name()
    }
}

/// Durable, at-least-once execution backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Hand the envelope to the backend. Returns the backend's sequence number for the
    /// accepted message; an error means the job was not accepted.
    async fn submit(&self, envelope: &JobEnvelope) -> Result<u64, QueueError>;
}

/// JetStream-backed queue
pub struct NatsQueueBackend {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsQueueBackend {
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// Override how long to wait for the stream's publish acknowledgment
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

#[async_trait]
impl QueueBackend for NatsQueueBackend {
    #[instrument(skip(self, envelope), fields(
        job_id = %envelope.job_id,
        job_name = envelope.job_name(),
        queue = %envelope.queue
    ))]
    async fn submit(&self, envelope: &JobEnvelope) -> Result<u64, QueueError> {
        let payload = serde_json::to_vec(envelope).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize job envelope: {}", e))
        })?;

        let subject = self.client.queue_subject(&envelope.queue);

        // Nats-Msg-Id lets the stream drop duplicate submissions of the same job
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", envelope.job_id.to_string().as_str());
        headers.insert("Job-Name", envelope.job_name());

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(ack)) => {
                info!(
                    subject = %subject,
                    sequence = ack.sequence,
                    "Job accepted by queue"
                );
                Ok(ack.sequence)
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_request_id_and_queue() {
        let envelope = JobEnvelope::new(
            JobPayload::AppUsageEventsCleanup {
                cutoff_age_in_days: 7,
            },
            "cc-generic",
            Some(RequestId::new("req-1")),
        );

        assert_eq!(envelope.queue, "cc-generic");
        assert_eq!(envelope.job_name(), "app_usage_events_cleanup");

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["payload"]["type"], "app_usage_events_cleanup");
    }

    #[test]
    fn test_envelopes_get_distinct_job_ids() {
        let payload = JobPayload::AppUsageEventsCleanup {
            cutoff_age_in_days: 7,
        };
        let a = JobEnvelope::new(payload.clone(), "cc-generic", None);
        let b = JobEnvelope::new(payload, "cc-generic", None);
        assert_ne!(a.job_id, b.job_id);
    }
}
