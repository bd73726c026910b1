// Deadline decorator
//
// Timeouts are cooperative. With `TimeoutBehavior::Cancel` the wrapped future is dropped at the
// deadline, so the body stops at its next await point; code between await points still runs to
// completion. With `TimeoutBehavior::Detach` the body keeps running on its own task and only the
// caller stops waiting, so late side effects must be tolerable.

use super::{FailurePolicy, Job};
use crate::errors::JobError;
use crate::telemetry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutBehavior {
    #[default]
    Cancel,
    Detach,
}

pub struct TimeoutJob {
    inner: Arc<dyn Job>,
    max_run_time: Duration,
    behavior: TimeoutBehavior,
}

impl TimeoutJob {
    pub fn new(inner: Arc<dyn Job>, max_run_time: Duration, behavior: TimeoutBehavior) -> Self {
        Self {
            inner,
            max_run_time,
            behavior,
        }
    }

    pub fn max_run_time(&self) -> Duration {
        self.max_run_time
    }

    async fn run_cancelling(&self) -> Option<Result<(), JobError>> {
        tokio::time::timeout(self.max_run_time, self.inner.perform())
            .await
            .ok()
    }

    async fn run_detached(&self) -> Option<Result<(), JobError>> {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.perform().await }.in_current_span());

        match tokio::time::timeout(self.max_run_time, handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(join_error)) => Some(Err(JobError::Panicked {
                job_name: self.name().to_string(),
                message: join_error.to_string(),
            })),
            // Dropping the JoinHandle detaches the task; it is not aborted
            Err(_) => None,
        }
    }
}

#[async_trait]
impl Job for TimeoutJob {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy()
    }

    async fn perform(&self) -> Result<(), JobError> {
        let outcome = match self.behavior {
            TimeoutBehavior::Cancel => self.run_cancelling().await,
            TimeoutBehavior::Detach => self.run_detached().await,
        };

        match outcome {
            Some(result) => result,
            None => {
                let err = JobError::Timeout {
                    job_name: self.name().to_string(),
                    after: self.max_run_time,
                };
                error!(
                    job_name = %self.name(),
                    failure_kind = %err.kind(),
                    max_run_time_secs = self.max_run_time.as_secs_f64(),
                    behavior = ?self.behavior,
                    "Job exceeded its maximum run time"
                );
                telemetry::record_job_failure(self.name(), err.kind().as_str());
                Err(err)
            }
        }
    }
}
