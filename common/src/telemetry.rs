// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "stager-jobs";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - The current span list, so `job` spans attach job_name and request_id to every entry
/// - Log levels from configuration or `RUST_LOG`
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider, flushing remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter and describe the job and staging metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("job_enqueued_total", "Total number of jobs accepted by the queue");
    describe_counter!(
        "job_success_total",
        "Total number of successful job executions"
    );
    describe_counter!(
        "job_failed_total",
        "Total number of failed job executions, by failure kind"
    );
    describe_counter!(
        "job_dead_lettered_total",
        "Total number of deliveries terminated after exhausting redelivery"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Duration of job executions in seconds"
    );
    describe_counter!(
        "staging_dispatched_total",
        "Total number of staging requests sent"
    );
    describe_counter!(
        "staging_resolved_total",
        "Total number of staging requests resolved, by outcome"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_job_enqueued(queue: &str, job_name: &str) {
    counter!(
        "job_enqueued_total",
        "queue" => queue.to_string(),
        "job_name" => job_name.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_job_success(job_name: &str) {
    counter!("job_success_total", "job_name" => job_name.to_string()).increment(1);
}

/// `reason` is a failure kind label: timeout, panic, failure, ...
#[inline]
pub fn record_job_failure(job_name: &str, reason: &str) {
    counter!(
        "job_failed_total",
        "job_name" => job_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_job_duration(job_name: &str, duration_seconds: f64) {
    histogram!(
        "job_duration_seconds",
        "job_name" => job_name.to_string()
    )
    .record(duration_seconds);
}

#[inline]
pub fn record_job_dead_lettered() {
    counter!("job_dead_lettered_total").increment(1);
}

#[inline]
pub fn record_staging_dispatched() {
    counter!("staging_dispatched_total").increment(1);
}

/// `outcome` is one of staged, failed, timed_out, superseded, unresolved
#[inline]
pub fn record_staging_resolved(outcome: &str) {
    counter!("staging_resolved_total", "outcome" => outcome.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_valid_level() {
        // Either succeeds or a subscriber is already installed in this process
        let result = init_logging("info", None);
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_metrics_recording_without_exporter() {
        record_job_enqueued("cc-generic", "stage_app");
        record_job_success("stage_app");
        record_job_failure("stage_app", "timeout");
        record_job_duration("stage_app", 1.5);
        record_job_dead_lettered();
        record_staging_dispatched();
        record_staging_resolved("staged");
    }
}
