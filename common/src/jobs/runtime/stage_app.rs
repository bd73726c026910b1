// Dispatches staging for an app snapshot

use crate::errors::JobError;
use crate::jobs::Job;
use crate::staging::{App, Stager};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const JOB_NAME: &str = "stage_app";

/// Completes once the staging request is on the bus; the reply is handled by the reactor
pub struct StageAppJob {
    app: App,
    stager: Arc<Stager>,
}

impl StageAppJob {
    pub fn new(app: App, stager: Arc<Stager>) -> Self {
        Self { app, stager }
    }
}

#[async_trait]
impl Job for StageAppJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn perform(&self) -> Result<(), JobError> {
        let dispatched = self.stager.stage(&self.app, None).await?;
        info!(
            app_guid = %dispatched.app_guid,
            task_id = %dispatched.token.task_id,
            "Staging dispatched"
        );
        Ok(())
    }
}
