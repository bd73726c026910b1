// Decorator composition: Timeout → ExceptionCatching → Request → job (outermost first)

use super::{ExceptionCatchingJob, FailurePolicy, Job, RequestJob, TimeoutBehavior, TimeoutJob};
use crate::context::RequestId;
use crate::errors::JobError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Instrument};

/// A job wrapped in the full decorator chain.
///
/// The deadline bounds the whole execution, including context binding. The `job` span carries
/// the request id so failures recorded by the outer layers are attributed to the originating
/// request even though the ambient binding is innermost.
pub struct JobChain {
    outer: TimeoutJob,
    request_id: Option<RequestId>,
}

impl JobChain {
    pub fn new(
        job: Arc<dyn Job>,
        request_id: Option<RequestId>,
        max_run_time: Duration,
        behavior: TimeoutBehavior,
    ) -> Self {
        let request_job = Arc::new(RequestJob::new(job, request_id.clone()));
        let exception_catching = Arc::new(ExceptionCatchingJob::new(request_job));
        let outer = TimeoutJob::new(exception_catching, max_run_time, behavior);
        Self { outer, request_id }
    }

    pub fn max_run_time(&self) -> Duration {
        self.outer.max_run_time()
    }
}

#[async_trait]
impl Job for JobChain {
    fn name(&self) -> &str {
        self.outer.name()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.outer.failure_policy()
    }

    async fn perform(&self) -> Result<(), JobError> {
        let span = info_span!(
            "job",
            job_name = %self.name(),
            request_id = self.request_id.as_ref().map(RequestId::as_str),
        );
        self.outer.perform().instrument(span).await
    }
}
