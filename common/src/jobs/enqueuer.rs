// Job submission: queue resolution and request-id capture

use super::JobPayload;
use crate::config::WorkerConfig;
use crate::context::current_request_id;
use crate::errors::QueueError;
use crate::queue::{JobEnvelope, QueueBackend};
use crate::telemetry;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Queue shared by every worker
pub const GENERIC_QUEUE: &str = "cc-generic";

/// Where a job should run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueueSelector {
    #[default]
    Generic,
    /// The queue owned by the submitting process
    Local,
    Named(String),
}

impl QueueSelector {
    pub fn resolve(&self, identity: &ProcessIdentity) -> String {
        match self {
            QueueSelector::Generic => GENERIC_QUEUE.to_string(),
            QueueSelector::Local => identity.local_queue(),
            QueueSelector::Named(name) => name.clone(),
        }
    }
}

/// Name and index of the running process, used to derive its local queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub name: String,
    pub index: u32,
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn local_queue(&self) -> String {
        format!("cc-{}-{}", self.name, self.index)
    }
}

impl From<&WorkerConfig> for ProcessIdentity {
    fn from(config: &WorkerConfig) -> Self {
        Self::new(config.name.clone(), config.index)
    }
}

/// Receipt for an accepted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub job_id: Uuid,
    pub queue: String,
    pub sequence: u64,
}

/// Submits jobs to the queue backend, stamping them with the ambient request id
#[derive(Clone)]
pub struct Enqueuer {
    backend: Arc<dyn QueueBackend>,
    identity: ProcessIdentity,
}

impl Enqueuer {
    pub fn new(backend: Arc<dyn QueueBackend>, identity: ProcessIdentity) -> Self {
        Self { backend, identity }
    }

    /// Submit a job. A rejected submission is returned to the caller; nothing is retried here.
    #[instrument(skip(self, payload), fields(job_name = payload.job_name()))]
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        selector: &QueueSelector,
    ) -> Result<QueueHandle, QueueError> {
        let queue = selector.resolve(&self.identity);
        let envelope = JobEnvelope::new(payload, queue, current_request_id());

        match self.backend.submit(&envelope).await {
            Ok(sequence) => {
                telemetry::record_job_enqueued(&envelope.queue, envelope.job_name());
                info!(
                    job_id = %envelope.job_id,
                    queue = %envelope.queue,
                    request_id = envelope.request_id.as_ref().map(|id| id.as_str()),
                    "Job enqueued"
                );
                Ok(QueueHandle {
                    job_id: envelope.job_id,
                    queue: envelope.queue,
                    sequence,
                })
            }
            Err(e) => {
                error!(queue = %envelope.queue, error = %e, "Failed to enqueue job");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{run_with_context, RequestId};
    use crate::queue::publisher::MockQueueBackend;
    use std::sync::Mutex;

    fn cleanup() -> JobPayload {
        JobPayload::AppUsageEventsCleanup {
            cutoff_age_in_days: 31,
        }
    }

    fn capturing_backend(sequence: u64) -> (MockQueueBackend, Arc<Mutex<Vec<JobEnvelope>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let mut backend = MockQueueBackend::new();
        backend.expect_submit().returning(move |envelope| {
            sink.lock().unwrap().push(envelope.clone());
            Ok(sequence)
        });
        (backend, captured)
    }

    #[test]
    fn test_queue_resolution() {
        let identity = ProcessIdentity::new("api", 2);
        assert_eq!(QueueSelector::Generic.resolve(&identity), "cc-generic");
        assert_eq!(QueueSelector::Local.resolve(&identity), "cc-api-2");
        assert_eq!(
            QueueSelector::Named("cc-staging".to_string()).resolve(&identity),
            "cc-staging"
        );
    }

    #[tokio::test]
    async fn test_enqueue_captures_ambient_request_id() {
        let (backend, captured) = capturing_backend(42);
        let enqueuer = Enqueuer::new(Arc::new(backend), ProcessIdentity::new("api", 0));

        let handle = run_with_context(Some(RequestId::new("req-1")), async {
            enqueuer.enqueue(cleanup(), &QueueSelector::Local).await
        })
        .await
        .unwrap();

        assert_eq!(handle.queue, "cc-api-0");
        assert_eq!(handle.sequence, 42);

        let envelopes = captured.lock().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].job_id, handle.job_id);
        assert_eq!(envelopes[0].request_id, Some(RequestId::new("req-1")));
    }

    #[tokio::test]
    async fn test_enqueue_without_ambient_request_id() {
        let (backend, captured) = capturing_backend(1);
        let enqueuer = Enqueuer::new(Arc::new(backend), ProcessIdentity::new("api", 0));

        enqueuer
            .enqueue(cleanup(), &QueueSelector::Generic)
            .await
            .unwrap();

        assert_eq!(captured.lock().unwrap()[0].request_id, None);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_reported_and_not_retried() {
        let mut backend = MockQueueBackend::new();
        backend
            .expect_submit()
            .times(1)
            .returning(|_| Err(QueueError::PublishFailed("no responders".to_string())));
        let enqueuer = Enqueuer::new(Arc::new(backend), ProcessIdentity::new("api", 0));

        let err = enqueuer
            .enqueue(cleanup(), &QueueSelector::Generic)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PublishFailed(_)));
    }
}
