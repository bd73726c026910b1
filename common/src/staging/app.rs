// Staging target as seen by the dispatcher

use super::buildpack::BuildpackSelection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Snapshot of an application, taken when its staging job is enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub guid: String,
    pub name: String,
    pub memory_mb: u32,
    pub disk_quota_mb: u32,
    pub file_descriptors: u32,
    pub stack: String,
    #[serde(default)]
    pub buildpack: BuildpackSelection,
    /// User-defined environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub vcap_application: Value,
    #[serde(default)]
    pub vcap_services: Value,
    #[serde(default)]
    pub database_uri: Option<String>,
}

impl App {
    /// App with platform defaults for resources and stack
    pub fn new(guid: impl Into<String>, name: impl Into<String>) -> Self {
        let guid = guid.into();
        let name = name.into();
        let vcap_application = json!({
            "application_id": guid,
            "application_name": name,
            "limits": { "mem": 1024, "disk": 1024, "fds": 16384 },
        });

        Self {
            guid,
            name,
            memory_mb: 1024,
            disk_quota_mb: 1024,
            file_descriptors: 16384,
            stack: "cflinuxfs2".to_string(),
            buildpack: BuildpackSelection::Detect,
            environment: BTreeMap::new(),
            vcap_application,
            vcap_services: json!({}),
            database_uri: None,
        }
    }

    pub fn with_buildpack(mut self, buildpack: BuildpackSelection) -> Self {
        self.buildpack = buildpack;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}
