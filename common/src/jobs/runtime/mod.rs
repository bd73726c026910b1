// Leaf jobs that ride the pipeline

pub mod stage_app;
pub mod usage_events_cleanup;

pub use stage_app::StageAppJob;
pub use usage_events_cleanup::{
    PostgresUsageEventRepository, UsageEventRepository, UsageEventsCleanup,
};
