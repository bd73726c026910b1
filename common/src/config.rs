// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub nats: NatsConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub jobs: JobsConfig,
    pub staging: StagingConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    pub subject_prefix: String,
    pub consumer_name: String,
    pub max_age_seconds: u64,
    pub max_messages: i64,
    pub max_deliver: i64,
    pub ack_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

/// Process identity and pool size of a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub index: u32,
    pub concurrency: u32,
    /// Logical queue names this worker consumes, e.g. `cc-generic`
    pub queues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub global_timeout_seconds: u64,
    /// Per-job overrides keyed by job name
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    /// Let a timed-out body keep running in the background instead of dropping it
    #[serde(default)]
    pub detach_on_timeout: bool,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_jitter_factor: f64,
}

impl JobsConfig {
    /// Maximum run time for a job, falling back to the global timeout
    pub fn timeout_for(&self, job_name: &str) -> Duration {
        let secs = self
            .timeouts
            .get(job_name)
            .copied()
            .unwrap_or(self.global_timeout_seconds);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    pub timeout_seconds: u64,
    pub subject: String,
    pub blobstore_base_url: String,
}

impl StagingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.stream_name.is_empty() {
            return Err("NATS stream_name cannot be empty".to_string());
        }
        if self.nats.max_deliver <= 0 {
            return Err("NATS max_deliver must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.worker.concurrency == 0 {
            return Err("Worker concurrency must be greater than 0".to_string());
        }
        if self.worker.queues.is_empty() {
            return Err("Worker must consume at least one queue".to_string());
        }

        if self.jobs.global_timeout_seconds == 0 {
            return Err("Jobs global_timeout_seconds must be greater than 0".to_string());
        }
        if let Some((name, _)) = self.jobs.timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(format!("Timeout for job '{}' must be greater than 0", name));
        }

        // A job still running when its ack window closes would be redelivered to another worker
        let longest_job = self
            .jobs
            .timeouts
            .values()
            .copied()
            .chain(std::iter::once(self.jobs.global_timeout_seconds))
            .max()
            .unwrap_or(self.jobs.global_timeout_seconds);
        if self.nats.ack_wait_seconds <= longest_job {
            return Err(format!(
                "NATS ack_wait_seconds ({}) must exceed the longest job timeout ({})",
                self.nats.ack_wait_seconds, longest_job
            ));
        }

        if self.staging.timeout_seconds == 0 {
            return Err("Staging timeout_seconds must be greater than 0".to_string());
        }
        if self.staging.subject.is_empty() {
            return Err("Staging subject cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                stream_name: "JOBS".to_string(),
                subject_prefix: "jobs".to_string(),
                consumer_name: "job-workers".to_string(),
                max_age_seconds: 86400, // 24 hours
                max_messages: 1_000_000,
                max_deliver: 10,
                ack_wait_seconds: 4 * 60 * 60 + 600,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/cloud_controller".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            worker: WorkerConfig {
                name: "api".to_string(),
                index: 0,
                concurrency: 10,
                queues: vec!["cc-generic".to_string()],
            },
            jobs: JobsConfig {
                global_timeout_seconds: 4 * 60 * 60,
                timeouts: HashMap::new(),
                detach_on_timeout: false,
                retry_base_delay_secs: 5,
                retry_max_delay_secs: 1800,
                retry_jitter_factor: 0.1,
            },
            staging: StagingConfig {
                timeout_seconds: 120,
                subject: "diego.staging.start".to_string(),
                blobstore_base_url: "http://blobstore.service.internal".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_nats_url() {
        let mut settings = Settings::default();
        settings.nats.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_concurrency() {
        let mut settings = Settings::default();
        settings.worker.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_job_timeout_override() {
        let mut settings = Settings::default();
        settings
            .jobs
            .timeouts
            .insert("blobstore_upload".to_string(), 0);
        let err = settings.validate().unwrap_err();
        assert!(err.contains("blobstore_upload"));
    }

    #[test]
    fn test_validation_requires_ack_wait_longer_than_jobs() {
        let mut settings = Settings::default();
        settings.jobs.timeouts.insert("stage_app".to_string(), settings.nats.ack_wait_seconds);
        let err = settings.validate().unwrap_err();
        assert!(err.contains("ack_wait_seconds"));
    }

    #[test]
    fn test_timeout_for_uses_override_then_global() {
        let mut jobs = Settings::default().jobs;
        jobs.global_timeout_seconds = 600;
        jobs.timeouts
            .insert("app_usage_events_cleanup".to_string(), 30);

        assert_eq!(
            jobs.timeout_for("app_usage_events_cleanup"),
            Duration::from_secs(30)
        );
        assert_eq!(jobs.timeout_for("stage_app"), Duration::from_secs(600));
    }

    #[test]
    fn test_load_from_missing_directory_falls_back_to_defaults() {
        let settings = Settings::load_from_path("/nonexistent/config/dir").unwrap();
        assert_eq!(settings.staging.subject, "diego.staging.start");
        assert_eq!(settings.worker.queues, vec!["cc-generic".to_string()]);
    }

    #[test]
    fn test_shipped_config_file_matches_settings() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../config");
        let settings = Settings::load_from_path(dir).unwrap();

        assert!(settings.validate().is_ok());
        assert_eq!(settings.jobs.timeout_for("stage_app"), Duration::from_secs(300));
        assert_eq!(
            settings.jobs.timeout_for("app_usage_events_cleanup"),
            Duration::from_secs(3600)
        );
    }
}
