// Turns queued payloads back into runnable jobs

use super::runtime::{StageAppJob, UsageEventRepository, UsageEventsCleanup};
use super::{Job, JobPayload};
use crate::staging::Stager;
use std::sync::Arc;

/// Builds the executable job for a payload
pub trait JobFactory: Send + Sync {
    fn build(&self, payload: JobPayload) -> Arc<dyn Job>;
}

/// Factory wired with the collaborators the leaf jobs need
pub struct JobRegistry {
    stager: Arc<Stager>,
    usage_events: Arc<dyn UsageEventRepository>,
}

impl JobRegistry {
    pub fn new(stager: Arc<Stager>, usage_events: Arc<dyn UsageEventRepository>) -> Self {
        Self {
            stager,
            usage_events,
        }
    }
}

impl JobFactory for JobRegistry {
    fn build(&self, payload: JobPayload) -> Arc<dyn Job> {
        match payload {
            JobPayload::StageApp { app } => {
                Arc::new(StageAppJob::new(app, Arc::clone(&self.stager)))
            }
            JobPayload::AppUsageEventsCleanup { cutoff_age_in_days } => Arc::new(
                UsageEventsCleanup::new(cutoff_age_in_days, Arc::clone(&self.usage_events)),
            ),
        }
    }
}
