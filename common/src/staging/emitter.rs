// App log stream: diagnostic events users see for their app

use crate::bus::MessageBus;
use crate::errors::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

#[async_trait]
pub trait AppLogEmitter: Send + Sync {
    async fn emit_error(&self, app_guid: &str, message: &str) -> Result<(), BusError>;
}

/// Publishes log events on `logs.app.{app_guid}`
#[derive(Clone)]
pub struct BusLogEmitter {
    bus: Arc<dyn MessageBus>,
}

impl BusLogEmitter {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub fn subject(app_guid: &str) -> String {
        format!("logs.app.{}", app_guid)
    }
}

#[async_trait]
impl AppLogEmitter for BusLogEmitter {
    async fn emit_error(&self, app_guid: &str, message: &str) -> Result<(), BusError> {
        let event = json!({
            "app_guid": app_guid,
            "source_type": "STG",
            "message_type": "ERR",
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.bus
            .publish(&Self::subject(app_guid), Bytes::from(event.to_string()))
            .await
    }
}
