// Reply reactor: one event loop that waits on every outstanding request and runs its handler
//
// Handlers run inline on the loop task, one at a time, so they must stay short. Anything
// expensive is handed to the worker pool by the handler itself.

use super::{BusReply, MessageBus, PendingReply};
use crate::errors::BusError;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Invoked once with the reply (or the synthetic timeout) of one request
pub type ReplyHandler = Box<dyn FnOnce(BusReply) -> BoxFuture<'static, ()> + Send>;

struct Registration {
    subject: String,
    reply: PendingReply,
    handler: ReplyHandler,
}

/// Handle to the reply event loop. Cheap to clone.
#[derive(Clone)]
pub struct Reactor {
    tx: mpsc::UnboundedSender<Registration>,
}

impl Reactor {
    /// Start the event loop. It exits once every handle is dropped and all registered
    /// handlers have run.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx));
        (Self { tx }, handle)
    }

    /// Hand a pending reply and its handler to the loop
    pub fn register(
        &self,
        subject: impl Into<String>,
        reply: PendingReply,
        handler: ReplyHandler,
    ) -> Result<(), BusError> {
        self.tx
            .send(Registration {
                subject: subject.into(),
                reply,
                handler,
            })
            .map_err(|_| BusError::ReactorClosed)
    }

    /// Publish a request and register `handler` for its reply. Returns as soon as the request is
    /// on the bus.
    pub async fn request(
        &self,
        bus: &dyn MessageBus,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
        handler: ReplyHandler,
    ) -> Result<(), BusError> {
        let reply = bus.request(subject, payload, timeout).await?;
        self.register(subject, reply, handler)
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Registration>) {
    let mut pending = FuturesUnordered::new();
    let mut accepting = true;

    info!("Reply reactor started");

    loop {
        tokio::select! {
            registration = rx.recv(), if accepting => match registration {
                Some(Registration { subject, reply, handler }) => {
                    pending.push(async move { (subject, reply.await, handler) });
                }
                None => accepting = false,
            },
            Some((subject, reply, handler)) = pending.next(), if !pending.is_empty() => {
                debug!(
                    subject = %subject,
                    timed_out = reply.is_timeout(),
                    "Dispatching reply to handler"
                );
                if AssertUnwindSafe(handler(reply)).catch_unwind().await.is_err() {
                    error!(subject = %subject, "Reply handler panicked");
                }
            },
            else => break,
        }
    }

    info!("Reply reactor stopped");
}
