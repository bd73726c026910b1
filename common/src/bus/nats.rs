// NATS core message bus: plain publish plus inbox-based requests

use super::{BusReply, MessageBus, PendingReply};
use crate::errors::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Message bus over a NATS core connection
#[derive(Clone)]
pub struct NatsMessageBus {
    client: async_nats::Client,
}

impl NatsMessageBus {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageBus for NatsMessageBus {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::PublishFailed {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<PendingReply, BusError> {
        // Subscribe before publishing so a fast reply cannot be missed
        let inbox = self.client.new_inbox();
        let mut subscription = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        self.client
            .publish_with_reply(subject.to_string(), inbox.clone(), payload)
            .await
            .map_err(|e| BusError::PublishFailed {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        debug!(inbox = %inbox, "Request published");

        // Dropping the subscription after the first reply or the deadline unsubscribes the inbox
        let deadline = tokio::time::Instant::now() + timeout;
        Ok(PendingReply::new(async move {
            loop {
                match tokio::time::timeout_at(deadline, subscription.next()).await {
                    // Server status notices (e.g. no responders) are not replies
                    Ok(Some(message)) if message.status.is_some() => {
                        debug!(status = ?message.status, "Ignoring status message on inbox");
                    }
                    Ok(Some(message)) => return BusReply::Message(message.payload),
                    Ok(None) | Err(_) => return BusReply::TimedOut,
                }
            }
        }))
    }
}
