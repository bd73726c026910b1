// Remote staging: request building, dispatch over the message bus, and reply reconciliation

pub mod app;
pub mod blobstore;
pub mod buildpack;
pub mod emitter;
pub mod repository;
pub mod request;
pub mod response;
pub mod task;

pub use app::App;
pub use blobstore::{BlobstoreUrlGenerator, BlobstoreUrls};
pub use buildpack::{
    resolve_buildpacks, AdminBuildpack, BuildpackCatalog, BuildpackDescriptor, BuildpackSelection,
    PostgresBuildpackCatalog, StaticBuildpackCatalog,
};
pub use emitter::{AppLogEmitter, BusLogEmitter};
pub use repository::{
    AppRepository, AppStagingState, InMemoryAppRepository, PackageState, PostgresAppRepository,
    StagingToken,
};
pub use request::{EnvironmentVariable, StagingRequest};
pub use response::{StagingOutcome, StagingResponse, TIMEOUT_ERROR};
pub use task::{CompletionCallback, DispatchedStaging, Resolution, Stager, StagingCompletion};
