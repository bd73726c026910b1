// Staging replies and how they collapse into outcomes

use crate::bus::BusReply;
use serde::{Deserialize, Serialize};

/// Error text used when no reply arrived, or the stager itself gave up
pub const TIMEOUT_ERROR: &str = "Request to stage timed out";

/// Reply published by the stager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingResponse {
    #[serde(default)]
    pub detected_buildpack: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timeout: Option<bool>,
    #[serde(default)]
    pub task_log: Option<String>,
}

impl StagingResponse {
    pub fn timed_out(&self) -> bool {
        self.timeout.unwrap_or(false)
    }

    /// An error wins over a timeout flag; neither means success
    pub fn into_outcome(self) -> StagingOutcome {
        let timed_out = self.timed_out();
        match self.error {
            Some(error) => StagingOutcome::Failed {
                error,
                log: self.task_log,
            },
            None if timed_out => StagingOutcome::TimedOut { log: self.task_log },
            None => StagingOutcome::Succeeded {
                detected_buildpack: self.detected_buildpack,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingOutcome {
    Succeeded { detected_buildpack: Option<String> },
    Failed { error: String, log: Option<String> },
    TimedOut { log: Option<String> },
}

impl StagingOutcome {
    /// Interpret a bus reply. An unreadable body counts as a failed staging.
    pub fn from_reply(reply: &BusReply) -> Self {
        match reply {
            BusReply::TimedOut => StagingOutcome::TimedOut { log: None },
            BusReply::Message(body) => match serde_json::from_slice::<StagingResponse>(body) {
                Ok(response) => response.into_outcome(),
                Err(e) => StagingOutcome::Failed {
                    error: format!("Invalid staging response: {}", e),
                    log: None,
                },
            },
        }
    }

    /// Message for the app's log stream, absent on success
    pub fn failure_message(&self) -> Option<String> {
        let (error, log) = match self {
            StagingOutcome::Succeeded { .. } => return None,
            StagingOutcome::Failed { error, log } => (error.as_str(), log),
            StagingOutcome::TimedOut { log } => (TIMEOUT_ERROR, log),
        };
        Some(format!(
            "Failed to stage application:\n{}\n{}",
            error,
            log.as_deref().unwrap_or_default()
        ))
    }
}
