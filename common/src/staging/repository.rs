// Persisted staging state of an app: current token, detected buildpack, package state

use crate::db::DbPool;
use crate::errors::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Correlates a staging dispatch with its reply.
///
/// `sequence` grows by one per dispatch for the same app; `task_id` is what travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StagingToken {
    pub sequence: u64,
    pub task_id: Uuid,
}

impl fmt::Display for StagingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.task_id, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    Pending,
    Staged,
    Failed,
}

impl PackageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageState::Pending => "PENDING",
            PackageState::Staged => "STAGED",
            PackageState::Failed => "FAILED",
        }
    }
}

/// Staging fields of one app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStagingState {
    pub staging_token: Option<StagingToken>,
    pub detected_buildpack: Option<String>,
    pub package_state: PackageState,
}

impl Default for AppStagingState {
    fn default() -> Self {
        Self {
            staging_token: None,
            detected_buildpack: None,
            package_state: PackageState::Pending,
        }
    }
}

/// Reads and writes the staging fields of apps
#[async_trait]
pub trait AppRepository: Send + Sync {
    /// Make `task_id` the app's current staging task, superseding any earlier one
    async fn assign_staging_token(
        &self,
        app_guid: &str,
        task_id: Uuid,
    ) -> Result<StagingToken, DatabaseError>;

    /// Current token as stored right now. Never cached.
    async fn current_staging_token(
        &self,
        app_guid: &str,
    ) -> Result<Option<StagingToken>, DatabaseError>;

    /// Record a successful staging, but only while `token` is still the app's current token.
    ///
    /// Returns false, without writing, when the token was superseded or the app is gone.
    async fn record_detected_buildpack(
        &self,
        app_guid: &str,
        token: &StagingToken,
        detected_buildpack: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Mark the app failed to stage, guarded by `token` like `record_detected_buildpack`
    async fn mark_failed_to_stage(
        &self,
        app_guid: &str,
        token: &StagingToken,
    ) -> Result<bool, DatabaseError>;
}

/// In-process repository for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryAppRepository {
    apps: Mutex<HashMap<String, AppStagingState>>,
    unavailable: Mutex<bool>,
}

impl InMemoryAppRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_app(&self, app_guid: impl Into<String>) {
        self.apps().insert(app_guid.into(), AppStagingState::default());
    }

    pub fn state(&self, app_guid: &str) -> Option<AppStagingState> {
        self.apps().get(app_guid).cloned()
    }

    /// Make every call fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        *self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = unavailable;
    }

    fn apps(&self) -> MutexGuard<'_, HashMap<String, AppStagingState>> {
        self.apps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if *self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(DatabaseError::ConnectionFailed(
                "repository unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn with_app<T>(
        &self,
        app_guid: &str,
        f: impl FnOnce(&mut AppStagingState) -> T,
    ) -> Result<T, DatabaseError> {
        self.check_available()?;
        self.apps()
            .get_mut(app_guid)
            .map(f)
            .ok_or_else(|| DatabaseError::NotFound(format!("App not found: {}", app_guid)))
    }

    /// Apply `f` only if `token` is current. Check and write happen under one lock.
    fn with_current_token(
        &self,
        app_guid: &str,
        token: &StagingToken,
        f: impl FnOnce(&mut AppStagingState),
    ) -> Result<bool, DatabaseError> {
        self.check_available()?;
        match self.apps().get_mut(app_guid) {
            Some(state) if state.staging_token == Some(*token) => {
                f(state);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AppRepository for InMemoryAppRepository {
    async fn assign_staging_token(
        &self,
        app_guid: &str,
        task_id: Uuid,
    ) -> Result<StagingToken, DatabaseError> {
        self.with_app(app_guid, |state| {
            let sequence = state.staging_token.map_or(1, |t| t.sequence + 1);
            let token = StagingToken { sequence, task_id };
            state.staging_token = Some(token);
            state.package_state = PackageState::Pending;
            token
        })
    }

    async fn current_staging_token(
        &self,
        app_guid: &str,
    ) -> Result<Option<StagingToken>, DatabaseError> {
        self.with_app(app_guid, |state| state.staging_token)
    }

    async fn record_detected_buildpack(
        &self,
        app_guid: &str,
        token: &StagingToken,
        detected_buildpack: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        self.with_current_token(app_guid, token, |state| {
            state.detected_buildpack = detected_buildpack.map(str::to_string);
            state.package_state = PackageState::Staged;
        })
    }

    async fn mark_failed_to_stage(
        &self,
        app_guid: &str,
        token: &StagingToken,
    ) -> Result<bool, DatabaseError> {
        self.with_current_token(app_guid, token, |state| {
            state.package_state = PackageState::Failed;
        })
    }
}

/// Repository over the `apps` table. Only the staging columns are touched.
pub struct PostgresAppRepository {
    pool: DbPool,
}

impl PostgresAppRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppRepository for PostgresAppRepository {
    #[instrument(skip(self))]
    async fn assign_staging_token(
        &self,
        app_guid: &str,
        task_id: Uuid,
    ) -> Result<StagingToken, DatabaseError> {
        let row = sqlx::query(
            r#"
            UPDATE apps
            SET staging_task_id = $2,
                staging_task_sequence = COALESCE(staging_task_sequence, 0) + 1,
                package_state = $3,
                updated_at = NOW()
            WHERE guid = $1
            RETURNING staging_task_sequence
            "#,
        )
        .bind(app_guid)
        .bind(task_id)
        .bind(PackageState::Pending.as_str())
        .fetch_optional(self.pool.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("App not found: {}", app_guid)))?;

        let sequence: i64 = row.try_get("staging_task_sequence")?;
        debug!(sequence, "Staging token assigned");

        Ok(StagingToken {
            sequence: sequence as u64,
            task_id,
        })
    }

    #[instrument(skip(self))]
    async fn current_staging_token(
        &self,
        app_guid: &str,
    ) -> Result<Option<StagingToken>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT staging_task_id, staging_task_sequence
            FROM apps
            WHERE guid = $1
            "#,
        )
        .bind(app_guid)
        .fetch_optional(self.pool.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("App not found: {}", app_guid)))?;

        let task_id: Option<Uuid> = row.try_get("staging_task_id")?;
        let sequence: Option<i64> = row.try_get("staging_task_sequence")?;

        Ok(task_id.map(|task_id| StagingToken {
            sequence: sequence.unwrap_or_default() as u64,
            task_id,
        }))
    }

    #[instrument(skip(self))]
    async fn record_detected_buildpack(
        &self,
        app_guid: &str,
        token: &StagingToken,
        detected_buildpack: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE apps
            SET detected_buildpack = $2,
                package_state = $3,
                updated_at = NOW()
            WHERE guid = $1
              AND staging_task_id = $4
              AND staging_task_sequence = $5
            "#,
        )
        .bind(app_guid)
        .bind(detected_buildpack)
        .bind(PackageState::Staged.as_str())
        .bind(token.task_id)
        .bind(token.sequence as i64)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_failed_to_stage(
        &self,
        app_guid: &str,
        token: &StagingToken,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE apps
            SET package_state = $2,
                updated_at = NOW()
            WHERE guid = $1
              AND staging_task_id = $3
              AND staging_task_sequence = $4
            "#,
        )
        .bind(app_guid)
        .bind(PackageState::Failed.as_str())
        .bind(token.task_id)
        .bind(token.sequence as i64)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
