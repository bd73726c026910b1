// Message bus abstraction: publish and single-reply requests
//
// A request resolves exactly once, either with the first correlated reply or with a synthetic
// `BusReply::TimedOut` when the caller's wait window elapses. Nothing is delivered after that.

pub mod memory;
pub mod nats;
pub mod reactor;

use crate::errors::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

pub use memory::{InFlightRequest, InMemoryBus};
pub use nats::NatsMessageBus;
pub use reactor::{Reactor, ReplyHandler};

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusReply {
    Message(Bytes),
    TimedOut,
}

impl BusReply {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusReply::TimedOut)
    }
}

/// Single-fire future for the reply to one request
pub struct PendingReply {
    inner: BoxFuture<'static, BusReply>,
}

impl PendingReply {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = BusReply> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// A reply that is already known, e.g. a timeout decided before the request left
    pub fn ready(reply: BusReply) -> Self {
        Self::new(futures::future::ready(reply))
    }
}

impl Future for PendingReply {
    type Output = BusReply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").finish_non_exhaustive()
    }
}

/// Asynchronous publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish `payload` on `subject` with a private reply address.
    ///
    /// Returns once the request has been handed to the transport; the reply is awaited through
    /// the returned `PendingReply`, which resolves to `TimedOut` after `timeout`.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<PendingReply, BusError>;
}
