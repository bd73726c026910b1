// Common library: background job pipeline, staging dispatch, and their transports

pub mod bus;
pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod queue;
pub mod retry;
pub mod staging;
pub mod telemetry;
pub mod worker;
