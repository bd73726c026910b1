// In-memory message bus for tests and local runs

use super::{BusReply, MessageBus, PendingReply};
use crate::errors::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A request waiting for somebody to answer it
#[derive(Debug)]
pub struct InFlightRequest {
    pub subject: String,
    pub payload: Bytes,
    reply_tx: oneshot::Sender<Bytes>,
}

impl InFlightRequest {
    /// Answer the request. Returns false when the requester already stopped waiting.
    pub fn respond(self, payload: impl Into<Bytes>) -> bool {
        self.reply_tx.send(payload.into()).is_ok()
    }
}

#[derive(Debug, Default)]
struct State {
    published: Vec<(String, Bytes)>,
    requests: Vec<InFlightRequest>,
    unavailable: bool,
}

/// In-process bus. Publishes are recorded; requests are parked until a test answers them.
///
/// - No network
/// - A dropped `InFlightRequest` is never answered, so its requester times out
#[derive(Debug, Default)]
pub struct InMemoryBus {
    state: Mutex<State>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every publish and request fail, as if the connection were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Payloads published (not requested) on `subject`, oldest first
    pub fn published(&self, subject: &str) -> Vec<Bytes> {
        self.state()
            .published
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Remove and return the outstanding requests sent on `subject`, oldest first
    pub fn take_requests(&self, subject: &str) -> Vec<InFlightRequest> {
        let mut state = self.state();
        let (taken, kept) = std::mem::take(&mut state.requests)
            .into_iter()
            .partition(|request| request.subject == subject);
        state.requests = kept;
        taken
    }

    fn check_available(&self, subject: &str) -> Result<(), BusError> {
        if self.state().unavailable {
            return Err(BusError::PublishFailed {
                subject: subject.to_string(),
                reason: "bus unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.check_available(subject)?;
        self.state().published.push((subject.to_string(), payload));
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<PendingReply, BusError> {
        self.check_available(subject)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.state().requests.push(InFlightRequest {
            subject: subject.to_string(),
            payload,
            reply_tx,
        });

        let deadline = Instant::now() + timeout;
        Ok(PendingReply::new(async move {
            match tokio::time::timeout_at(deadline, reply_rx).await {
                Ok(Ok(payload)) => BusReply::Message(payload),
                Ok(Err(_)) => {
                    // Nobody will answer; the requester still waits out its window
                    tokio::time::sleep_until(deadline).await;
                    BusReply::TimedOut
                }
                Err(_) => BusReply::TimedOut,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_recorded_per_subject() {
        let bus = InMemoryBus::new();
        bus.publish("logs.app.a", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("logs.app.b", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(bus.published("logs.app.a"), vec![Bytes::from_static(b"one")]);
        assert!(bus.published("logs.app.c").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_answered_before_deadline() {
        let bus = InMemoryBus::new();
        let pending = bus
            .request("rpc", Bytes::from_static(b"ping"), Duration::from_secs(5))
            .await
            .unwrap();

        let request = bus.take_requests("rpc").remove(0);
        assert_eq!(request.payload, Bytes::from_static(b"ping"));
        assert!(request.respond(Bytes::from_static(b"pong")));

        assert_eq!(pending.await, BusReply::Message(Bytes::from_static(b"pong")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_times_out_at_deadline() {
        let bus = InMemoryBus::new();
        let start = Instant::now();
        let pending = bus
            .request("rpc", Bytes::new(), Duration::from_secs(60))
            .await
            .unwrap();

        drop(bus.take_requests("rpc"));

        assert_eq!(pending.await, BusReply::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_unavailable_bus_rejects_requests() {
        let bus = InMemoryBus::new();
        bus.set_unavailable(true);

        let result = bus.request("rpc", Bytes::new(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BusError::PublishFailed { .. })));
        assert!(bus.take_requests("rpc").is_empty());
    }
}
