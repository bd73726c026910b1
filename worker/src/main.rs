// Worker binary entry point: consumes jobs and handles staging replies

use anyhow::Result;
use common::bus::{MessageBus, NatsMessageBus, Reactor};
use common::config::Settings;
use common::db::DbPool;
use common::jobs::runtime::PostgresUsageEventRepository;
use common::jobs::JobRegistry;
use common::queue::NatsClient;
use common::staging::{
    BlobstoreUrls, BusLogEmitter, PostgresAppRepository, PostgresBuildpackCatalog, Stager,
};
use common::telemetry;
use common::worker::{JobProcessor, WorkerJobConsumer};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        worker = %settings.worker.name,
        index = settings.worker.index,
        queues = ?settings.worker.queues,
        "Starting worker"
    );

    // One connection serves both the durable queue and the message bus
    let nats_client = NatsClient::connect(settings.nats.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!("NATS initialization error: {}", e)
    })?;
    nats_client.initialize_stream().await?;

    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!("Database initialization error: {}", e)
    })?;

    let bus: Arc<dyn MessageBus> = Arc::new(NatsMessageBus::new(nats_client.client().clone()));
    let (reactor, reactor_handle) = Reactor::spawn();

    let stager = Arc::new(Stager::new(
        Arc::clone(&bus),
        reactor,
        Arc::new(PostgresAppRepository::new(db_pool.clone())),
        Arc::new(PostgresBuildpackCatalog::new(db_pool.clone())),
        Arc::new(BlobstoreUrls::new(settings.staging.blobstore_base_url.clone())),
        Arc::new(BusLogEmitter::new(Arc::clone(&bus))),
        &settings.staging,
    ));

    let registry = Arc::new(JobRegistry::new(
        Arc::clone(&stager),
        Arc::new(PostgresUsageEventRepository::new(db_pool.clone())),
    ));
    let processor = Arc::new(JobProcessor::new(registry, settings.jobs.clone()));

    let worker_consumer = Arc::new(
        WorkerJobConsumer::new(&nats_client, processor, &settings)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create worker consumer");
                anyhow::anyhow!("Worker consumer creation error: {}", e)
            })?,
    );

    let consumer = Arc::clone(&worker_consumer);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = consumer.start().await {
            error!(error = %e, "Worker consumer error");
        }
    });

    info!("Worker is running. Press Ctrl+C to shutdown gracefully");

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    worker_consumer.shutdown();
    info!("Waiting for in-flight jobs to finish");
    let _ = worker_handle.await;

    // Outstanding staging replies still get their handler, at the latest when they time out
    drop(stager);
    drop(worker_consumer);
    info!("Waiting for outstanding staging replies");
    if tokio::time::timeout(settings.staging.timeout(), reactor_handle)
        .await
        .is_err()
    {
        error!("Staging replies still outstanding at shutdown");
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();

    info!("Worker shutdown complete");
    Ok(())
}
