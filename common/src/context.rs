// Request-id propagation across asynchronous job execution
//
// The ambient request id lives in a tokio task-local slot. Binding is only possible through
// `run_with_context`, which scopes the value to one future: the previous value is back in place
// whenever that future completes, returns an error, or unwinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_REQUEST_ID: Option<RequestId>;
}

/// Correlation identifier of the external request that originated a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random request id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Request id bound to the current task, if any
pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID
        .try_with(|request_id| request_id.clone())
        .ok()
        .flatten()
}

/// Run `work` with `request_id` as the ambient request id.
///
/// Binding `None` is allowed and hides any outer binding for the duration of `work`.
/// The output of `work` is returned untouched; this layer never inspects or swallows errors.
pub async fn run_with_context<F>(request_id: Option<RequestId>, work: F) -> F::Output
where
    F: Future,
{
    CURRENT_REQUEST_ID.scope(request_id, work).await
}
