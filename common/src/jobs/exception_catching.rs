// Crash-containment decorator: records every failure of the wrapped job, then re-raises it
// unless the job declares itself best-effort

use super::{FailurePolicy, Job};
use crate::errors::JobError;
use crate::telemetry;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

pub struct ExceptionCatchingJob {
    inner: Arc<dyn Job>,
}

impl ExceptionCatchingJob {
    pub fn new(inner: Arc<dyn Job>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Job for ExceptionCatchingJob {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy()
    }

    async fn perform(&self) -> Result<(), JobError> {
        let outcome = AssertUnwindSafe(self.inner.perform()).catch_unwind().await;

        let err = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err,
            Err(panic) => JobError::Panicked {
                job_name: self.name().to_string(),
                message: panic_message(panic.as_ref()),
            },
        };

        let kind = err.kind();
        error!(
            job_name = %self.name(),
            failure_kind = %kind,
            error = %err,
            details = ?err,
            "Job failed"
        );
        telemetry::record_job_failure(self.name(), kind.as_str());

        match self.failure_policy() {
            FailurePolicy::Fatal => Err(err),
            FailurePolicy::BestEffort => {
                warn!(
                    job_name = %self.name(),
                    failure_kind = %kind,
                    "Best-effort job failure absorbed"
                );
                Ok(())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
