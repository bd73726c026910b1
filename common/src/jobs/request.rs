// Context-carrying decorator: binds the originating request id around the wrapped job

use super::{FailurePolicy, Job};
use crate::context::{run_with_context, RequestId};
use crate::errors::JobError;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs the inner job with its request id as the ambient request id
pub struct RequestJob {
    inner: Arc<dyn Job>,
    request_id: Option<RequestId>,
}

impl RequestJob {
    pub fn new(inner: Arc<dyn Job>, request_id: Option<RequestId>) -> Self {
        Self { inner, request_id }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }
}

#[async_trait]
impl Job for RequestJob {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy()
    }

    async fn perform(&self) -> Result<(), JobError> {
        run_with_context(self.request_id.clone(), self.inner.perform()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::current_request_id;
    use std::sync::Mutex;

    struct RecordingJob {
        seen: Mutex<Option<RequestId>>,
        fail: bool,
    }

    #[async_trait]
    impl Job for RecordingJob {
        fn name(&self) -> &str {
            "recording"
        }

        async fn perform(&self) -> Result<(), JobError> {
            *self.seen.lock().unwrap() = current_request_id();
            if self.fail {
                return Err(anyhow::anyhow!("runtime test exception").into());
            }
            Ok(())
        }
    }

    fn recording(fail: bool) -> Arc<RecordingJob> {
        Arc::new(RecordingJob {
            seen: Mutex::new(None),
            fail,
        })
    }

    #[tokio::test]
    async fn test_sets_request_id_during_wrapped_perform() {
        let inner = recording(false);
        let job = RequestJob::new(inner.clone(), Some(RequestId::new("abc123")));

        job.perform().await.unwrap();

        assert_eq!(*inner.seen.lock().unwrap(), Some(RequestId::new("abc123")));
    }

    #[tokio::test]
    async fn test_restores_original_request_id_after_perform() {
        let original = RequestId::generate();
        let job = RequestJob::new(recording(false), Some(RequestId::new("abc123")));

        run_with_context(Some(original.clone()), async {
            job.perform().await.unwrap();
            assert_eq!(current_request_id(), Some(original.clone()));
        })
        .await;
    }

    #[tokio::test]
    async fn test_restores_original_request_id_after_failure() {
        let original = RequestId::generate();
        let job = RequestJob::new(recording(true), Some(RequestId::new("abc123")));

        run_with_context(Some(original.clone()), async {
            let err = job.perform().await.unwrap_err();
            assert_eq!(err.to_string(), "runtime test exception");
            assert_eq!(current_request_id(), Some(original.clone()));
        })
        .await;
    }

    #[test]
    fn test_delegates_name_and_policy() {
        let job = RequestJob::new(recording(false), None);
        assert_eq!(job.name(), "recording");
        assert_eq!(job.failure_policy(), FailurePolicy::Fatal);
        assert!(job.request_id().is_none());
    }
}
