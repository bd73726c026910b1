// Download locations for staging inputs

use super::app::App;
use super::buildpack::AdminBuildpack;

/// Maps an app or buildpack to the URL the stager downloads it from
pub trait BlobstoreUrlGenerator: Send + Sync {
    fn app_package_download_url(&self, app: &App) -> String;
    fn buildpack_cache_download_url(&self, app: &App) -> String;
    fn admin_buildpack_download_url(&self, buildpack: &AdminBuildpack) -> String;
}

/// URLs served by the internal blobstore endpoint
#[derive(Debug, Clone)]
pub struct BlobstoreUrls {
    base_url: String,
}

impl BlobstoreUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }
}

impl BlobstoreUrlGenerator for BlobstoreUrls {
    fn app_package_download_url(&self, app: &App) -> String {
        format!("{}/staging/apps/{}", self.base_url, app.guid)
    }

    fn buildpack_cache_download_url(&self, app: &App) -> String {
        format!("{}/staging/buildpack_cache/{}/download", self.base_url, app.guid)
    }

    fn admin_buildpack_download_url(&self, buildpack: &AdminBuildpack) -> String {
        format!("{}/v2/buildpacks/{}/download", self.base_url, buildpack.key)
    }
}
