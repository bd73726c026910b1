// Error handling framework for the job pipeline and staging dispatch

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a job failure, used for diagnostics and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The job exceeded its deadline
    Timeout,
    /// The job body panicked
    Panic,
    /// The job body returned an error
    Failure,
    /// The queued payload could not be turned into a job
    InvalidPayload,
    /// A remote dispatch could not be published
    Dispatch,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Panic => "panic",
            FailureKind::Failure => "failure",
            FailureKind::InvalidPayload => "invalid_payload",
            FailureKind::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job '{job_name}' timed out after {after:?}")]
    Timeout { job_name: String, after: Duration },

    #[error("Job '{job_name}' panicked: {message}")]
    Panicked { job_name: String, message: String },

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Staging dispatch failed: {0}")]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Timeout { .. } => FailureKind::Timeout,
            JobError::Panicked { .. } => FailureKind::Panic,
            JobError::InvalidPayload(_) => FailureKind::InvalidPayload,
            JobError::Staging(_) => FailureKind::Dispatch,
            JobError::Failed(_) => FailureKind::Failure,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Message bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to publish on '{subject}': {reason}")]
    PublishFailed { subject: String, reason: String },

    #[error("Failed to subscribe to reply inbox: {0}")]
    SubscribeFailed(String),

    #[error("Reply reactor is no longer running")]
    ReactorClosed,
}

/// Staging dispatch errors
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("Failed to build staging request: {0}")]
    RequestBuild(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationFailed(err.to_string())
    }
}
