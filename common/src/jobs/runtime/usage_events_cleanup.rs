// Best-effort sweep of old app usage events

use crate::db::DbPool;
use crate::errors::{DatabaseError, JobError};
use crate::jobs::{FailurePolicy, Job};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

pub const JOB_NAME: &str = "app_usage_events_cleanup";

#[async_trait]
pub trait UsageEventRepository: Send + Sync {
    /// Delete events created strictly before `cutoff`; returns how many were removed
    async fn delete_events_created_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, DatabaseError>;
}

pub struct PostgresUsageEventRepository {
    pool: DbPool,
}

impl PostgresUsageEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageEventRepository for PostgresUsageEventRepository {
    #[instrument(skip(self))]
    async fn delete_events_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM app_usage_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct UsageEventsCleanup {
    cutoff_age_in_days: u32,
    repository: Arc<dyn UsageEventRepository>,
}

impl UsageEventsCleanup {
    pub fn new(cutoff_age_in_days: u32, repository: Arc<dyn UsageEventRepository>) -> Self {
        Self {
            cutoff_age_in_days,
            repository,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.cutoff_age_in_days))
    }
}

#[async_trait]
impl Job for UsageEventsCleanup {
    fn name(&self) -> &str {
        JOB_NAME
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn perform(&self) -> Result<(), JobError> {
        let cutoff = self.cutoff(Utc::now());
        let deleted = self
            .repository
            .delete_events_created_before(cutoff)
            .await
            .context("Failed to delete expired app usage events")?;

        info!(
            deleted,
            cutoff = %cutoff,
            cutoff_age_in_days = self.cutoff_age_in_days,
            "Cleaned up app usage events"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::ExceptionCatchingJob;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRepository {
        cutoffs: Mutex<Vec<DateTime<Utc>>>,
        fail: bool,
    }

    #[async_trait]
    impl UsageEventRepository for FakeRepository {
        async fn delete_events_created_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, DatabaseError> {
            if self.fail {
                return Err(DatabaseError::QueryFailed("relation is locked".to_string()));
            }
            self.cutoffs.lock().unwrap().push(cutoff);
            Ok(3)
        }
    }

    #[test]
    fn test_cutoff_is_age_in_days_before_now() {
        let job = UsageEventsCleanup::new(31, Arc::new(FakeRepository::default()));
        let now = Utc::now();
        assert_eq!(job.cutoff(now), now - Duration::days(31));
    }

    #[tokio::test]
    async fn test_deletes_events_before_cutoff() {
        let repository = Arc::new(FakeRepository::default());
        let job = UsageEventsCleanup::new(7, repository.clone());

        let before = Utc::now();
        job.perform().await.unwrap();

        let cutoffs = repository.cutoffs.lock().unwrap();
        assert_eq!(cutoffs.len(), 1);
        assert!(cutoffs[0] <= before - Duration::days(6));
    }

    #[tokio::test]
    async fn test_failure_is_absorbed_by_containment() {
        let repository = Arc::new(FakeRepository {
            fail: true,
            ..Default::default()
        });
        let job = Arc::new(UsageEventsCleanup::new(7, repository));

        assert!(job.perform().await.is_err());
        assert!(ExceptionCatchingJob::new(job).perform().await.is_ok());
    }
}
