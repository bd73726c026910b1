// Buildpack selection and resolution into staging request descriptors

use super::blobstore::BlobstoreUrlGenerator;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::instrument;

/// A buildpack managed by platform administrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminBuildpack {
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub position: i32,
}

/// Which buildpack an app asked for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildpackSelection {
    /// Nothing requested; every enabled admin buildpack gets a chance to detect
    #[default]
    Detect,
    /// A buildpack given by reference, not managed by administrators
    Custom { url: String },
    Admin(AdminBuildpack),
}

/// Buildpack entry in a staging request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackDescriptor {
    pub key: String,
    pub url: String,
}

/// Source of administered buildpacks
#[async_trait]
pub trait BuildpackCatalog: Send + Sync {
    /// All admin buildpacks, enabled or not, in priority order
    async fn list_admin_buildpacks(&self) -> Result<Vec<AdminBuildpack>, DatabaseError>;
}

/// Fixed catalog, for tests and single-node setups
#[derive(Debug, Clone, Default)]
pub struct StaticBuildpackCatalog {
    buildpacks: Vec<AdminBuildpack>,
}

impl StaticBuildpackCatalog {
    pub fn new(mut buildpacks: Vec<AdminBuildpack>) -> Self {
        buildpacks.sort_by_key(|b| b.position);
        Self { buildpacks }
    }
}

#[async_trait]
impl BuildpackCatalog for StaticBuildpackCatalog {
    async fn list_admin_buildpacks(&self) -> Result<Vec<AdminBuildpack>, DatabaseError> {
        Ok(self.buildpacks.clone())
    }
}

/// Catalog backed by the `buildpacks` table
pub struct PostgresBuildpackCatalog {
    pool: DbPool,
}

impl PostgresBuildpackCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildpackCatalog for PostgresBuildpackCatalog {
    #[instrument(skip(self))]
    async fn list_admin_buildpacks(&self) -> Result<Vec<AdminBuildpack>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT key, name, enabled, position
            FROM buildpacks
            ORDER BY position ASC
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AdminBuildpack {
                    key: row.try_get("key")?,
                    name: row.try_get("name")?,
                    enabled: row.try_get("enabled")?,
                    position: row.try_get("position")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(DatabaseError::from)
    }
}

/// Only plain HTTP(S) archives can be fetched directly; git repositories fall back to detection
fn is_downloadable(url: &str) -> bool {
    url.starts_with("http") && !url.ends_with(".git")
}

fn custom_descriptor(url: &str) -> BuildpackDescriptor {
    BuildpackDescriptor {
        key: "custom".to_string(),
        url: url.to_string(),
    }
}

fn admin_descriptor(
    buildpack: &AdminBuildpack,
    urls: &dyn BlobstoreUrlGenerator,
) -> BuildpackDescriptor {
    BuildpackDescriptor {
        key: buildpack.key.clone(),
        url: urls.admin_buildpack_download_url(buildpack),
    }
}

async fn detection_descriptors(
    catalog: &dyn BuildpackCatalog,
    urls: &dyn BlobstoreUrlGenerator,
) -> Result<Vec<BuildpackDescriptor>, DatabaseError> {
    Ok(catalog
        .list_admin_buildpacks()
        .await?
        .iter()
        .filter(|b| b.enabled)
        .map(|b| admin_descriptor(b, urls))
        .collect())
}

/// Buildpacks to offer the stager, in priority order:
/// a downloadable custom URL, then an explicit admin buildpack, then every enabled admin buildpack.
pub async fn resolve_buildpacks(
    selection: &BuildpackSelection,
    catalog: &dyn BuildpackCatalog,
    urls: &dyn BlobstoreUrlGenerator,
) -> Result<Vec<BuildpackDescriptor>, DatabaseError> {
    match selection {
        BuildpackSelection::Custom { url } if is_downloadable(url) => {
            Ok(vec![custom_descriptor(url)])
        }
        BuildpackSelection::Admin(buildpack) => Ok(vec![admin_descriptor(buildpack, urls)]),
        BuildpackSelection::Custom { .. } | BuildpackSelection::Detect => {
            detection_descriptors(catalog, urls).await
        }
    }
}
