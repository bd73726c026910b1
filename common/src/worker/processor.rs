// Executes one delivered job through the full decorator chain

use crate::config::JobsConfig;
use crate::errors::JobError;
use crate::jobs::{Job, JobChain, JobFactory, TimeoutBehavior};
use crate::queue::{JobEnvelope, JobHandler};
use crate::telemetry;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub struct JobProcessor {
    factory: Arc<dyn JobFactory>,
    jobs: JobsConfig,
}

impl JobProcessor {
    pub fn new(factory: Arc<dyn JobFactory>, jobs: JobsConfig) -> Self {
        Self { factory, jobs }
    }

    fn timeout_behavior(&self) -> TimeoutBehavior {
        if self.jobs.detach_on_timeout {
            TimeoutBehavior::Detach
        } else {
            TimeoutBehavior::Cancel
        }
    }

    /// Build the job for `envelope`, wrap it, and run it under its configured deadline
    #[instrument(skip_all, fields(job_id = %envelope.job_id, queue = %envelope.queue))]
    pub async fn process(&self, envelope: JobEnvelope) -> Result<(), JobError> {
        let job = self.factory.build(envelope.payload);
        let job_name = job.name().to_string();
        let chain = JobChain::new(
            job,
            envelope.request_id,
            self.jobs.timeout_for(&job_name),
            self.timeout_behavior(),
        );

        let started = Instant::now();
        let result = chain.perform().await;
        let elapsed = started.elapsed();
        telemetry::record_job_duration(&job_name, elapsed.as_secs_f64());

        match &result {
            Ok(()) => {
                telemetry::record_job_success(&job_name);
                info!(
                    job_name = %job_name,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
            }
            Err(e) => warn!(
                job_name = %job_name,
                failure_kind = %e.kind(),
                duration_ms = elapsed.as_millis() as u64,
                "Job execution failed"
            ),
        }

        result
    }

    /// Consumer callback that feeds deliveries into this processor
    pub fn handler(self: Arc<Self>) -> JobHandler {
        Arc::new(move |envelope: JobEnvelope| {
            let processor = Arc::clone(&self);
            async move { processor.process(envelope).await }.boxed()
        })
    }
}
