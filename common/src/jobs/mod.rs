// Background job pipeline: job contract, decorator chain, and submission

pub mod chain;
pub mod enqueuer;
pub mod exception_catching;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod timeout;

use crate::errors::JobError;
use crate::staging::App;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use chain::JobChain;
pub use enqueuer::{Enqueuer, ProcessIdentity, QueueHandle, QueueSelector};
pub use exception_catching::ExceptionCatchingJob;
pub use registry::{JobFactory, JobRegistry};
pub use request::RequestJob;
pub use timeout::{TimeoutBehavior, TimeoutJob};

/// What the crash-containment layer does with a failure once it has been recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Re-raise so the queue backend's retry and dead-letter policy sees the failure
    #[default]
    Fatal,
    /// Log and swallow; used by sweeps where one bad record must not abort the batch
    BestEffort,
}

/// An executable unit of background work
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used for telemetry and for looking up per-job configuration
    fn name(&self) -> &str;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn perform(&self) -> Result<(), JobError>;
}

/// Serializable form of a job as it travels through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    StageApp { app: App },
    AppUsageEventsCleanup { cutoff_age_in_days: u32 },
}

impl JobPayload {
    pub fn job_name(&self) -> &'static str {
        match self {
            JobPayload::StageApp { .. } => runtime::stage_app::JOB_NAME,
            JobPayload::AppUsageEventsCleanup { .. } => runtime::usage_events_cleanup::JOB_NAME,
        }
    }
}
