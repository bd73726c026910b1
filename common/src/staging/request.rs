// Wire format of a staging request

use super::app::App;
use super::blobstore::BlobstoreUrlGenerator;
use super::buildpack::BuildpackDescriptor;
use crate::errors::StagingError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,
    pub value: String,
}

impl EnvironmentVariable {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Payload published to the stager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRequest {
    pub app_id: String,
    pub task_id: String,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub file_descriptors: u32,
    pub environment: Vec<EnvironmentVariable>,
    pub stack: String,
    pub build_artifacts_cache_download_uri: String,
    pub app_bits_download_uri: String,
    pub buildpacks: Vec<BuildpackDescriptor>,
}

impl StagingRequest {
    pub fn new(
        app: &App,
        task_id: impl Into<String>,
        urls: &dyn BlobstoreUrlGenerator,
        buildpacks: Vec<BuildpackDescriptor>,
    ) -> Self {
        Self {
            app_id: app.guid.clone(),
            task_id: task_id.into(),
            memory_mb: app.memory_mb,
            disk_mb: app.disk_quota_mb,
            file_descriptors: app.file_descriptors,
            environment: staging_environment(app),
            stack: app.stack.clone(),
            build_artifacts_cache_download_uri: urls.buildpack_cache_download_url(app),
            app_bits_download_uri: urls.app_package_download_url(app),
            buildpacks,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, StagingError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| StagingError::RequestBuild(e.to_string()))
    }
}

fn json_or_empty_object(value: &Value) -> String {
    match value {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Derived system variables followed by the app's own. A user entry replaces a derived entry
/// with the same key and takes its place at the end of the list.
pub fn staging_environment(app: &App) -> Vec<EnvironmentVariable> {
    let mut env = vec![
        EnvironmentVariable::new("VCAP_APPLICATION", json_or_empty_object(&app.vcap_application)),
        EnvironmentVariable::new("VCAP_SERVICES", json_or_empty_object(&app.vcap_services)),
    ];
    if let Some(database_uri) = &app.database_uri {
        env.push(EnvironmentVariable::new("DATABASE_URL", database_uri.as_str()));
    }
    env.push(EnvironmentVariable::new(
        "MEMORY_LIMIT",
        format!("{}m", app.memory_mb),
    ));

    env.retain(|var| !app.environment.contains_key(&var.key));
    env.extend(
        app.environment
            .iter()
            .map(|(key, value)| EnvironmentVariable::new(key.as_str(), value.as_str())),
    );
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::blobstore::BlobstoreUrls;

    fn keys(env: &[EnvironmentVariable]) -> Vec<&str> {
        env.iter().map(|v| v.key.as_str()).collect()
    }

    #[test]
    fn test_derived_variables_come_first() {
        let app = App::new("app-1", "dora").with_env("FOO", "bar");
        let env = staging_environment(&app);

        assert_eq!(
            keys(&env),
            vec!["VCAP_APPLICATION", "VCAP_SERVICES", "MEMORY_LIMIT", "FOO"]
        );
        assert_eq!(env[2].value, "1024m");
        assert_eq!(env[1].value, "{}");
    }

    #[test]
    fn test_database_url_only_when_present() {
        let mut app = App::new("app-1", "dora");
        app.database_uri = Some("postgres://db/app".to_string());
        let env = staging_environment(&app);

        assert_eq!(
            keys(&env),
            vec!["VCAP_APPLICATION", "VCAP_SERVICES", "DATABASE_URL", "MEMORY_LIMIT"]
        );
        assert_eq!(env[2].value, "postgres://db/app");
    }

    #[test]
    fn test_user_entry_overrides_derived_entry() {
        let app = App::new("app-1", "dora").with_env("MEMORY_LIMIT", "2g");
        let env = staging_environment(&app);

        let memory: Vec<_> = env.iter().filter(|v| v.key == "MEMORY_LIMIT").collect();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].value, "2g");
        assert_eq!(env.last().map(|v| v.key.as_str()), Some("MEMORY_LIMIT"));
    }

    #[test]
    fn test_request_fields() {
        let mut app = App::new("app-1", "dora");
        app.memory_mb = 256;
        app.disk_quota_mb = 2048;
        app.file_descriptors = 100;
        let urls = BlobstoreUrls::new("http://blobstore");

        let request = StagingRequest::new(&app, "task-1", &urls, Vec::new());
        let json: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();

        assert_eq!(json["app_id"], "app-1");
        assert_eq!(json["task_id"], "task-1");
        assert_eq!(json["memory_mb"], 256);
        assert_eq!(json["disk_mb"], 2048);
        assert_eq!(json["file_descriptors"], 100);
        assert_eq!(json["stack"], "cflinuxfs2");
        assert_eq!(json["app_bits_download_uri"], "http://blobstore/staging/apps/app-1");
        assert_eq!(
            json["build_artifacts_cache_download_uri"],
            "http://blobstore/staging/buildpack_cache/app-1/download"
        );
        assert_eq!(json["environment"][0]["key"], "VCAP_APPLICATION");
    }
}
