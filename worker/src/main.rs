// Worker binary: consumes publish requests off the work queue and drives
// each through the publication orchestrator.

use anyhow::Result;
use common::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager};
use common::config::Settings;
use common::credentials::EnvCredentialResolver;
use common::db::repositories::{ListRepository, PublicationRepository};
use common::db::{DbPool, RedisPool};
use common::lock::RedisListLock;
use common::models::Platform;
use common::orchestrator::{OrchestratorConfig, PublicationOrchestrator};
use common::publisher::{InstagramPublisher, PublisherRegistry};
use common::queue::{NatsClient, NatsPublishConsumer, NatsStatusPublisher, PublishConsumer, PublishHandler};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting publish worker");

    let db_pool = DbPool::new(&settings.database).await?;
    let redis_pool = RedisPool::new(&settings.redis).await?;

    let nats_client = NatsClient::new(settings.nats.clone()).await?;
    nats_client.initialize_stream().await?;
    info!("Work queue stream ready");

    let lists = Arc::new(ListRepository::new(db_pool.clone()));
    let publications = Arc::new(PublicationRepository::new(db_pool));
    let lock = Arc::new(RedisListLock::new(redis_pool));
    let credentials = Arc::new(EnvCredentialResolver::new());

    let ig = &settings.platforms.instagram;
    let breakers = CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: ig.breaker_failure_threshold,
        cooldown: Duration::from_secs(ig.breaker_cooldown_seconds),
        success_threshold: 1,
    });

    let instagram = InstagramPublisher::new(ig, breakers.for_platform(Platform::Instagram).await)
        .map_err(|e| anyhow::anyhow!("Instagram publisher setup failed: {}", e))?;
    let registry = Arc::new(PublisherRegistry::new().register(Arc::new(instagram)));
    info!("Platform publishers registered");

    let status = Arc::new(NatsStatusPublisher::new(nats_client.client().clone()));

    let orchestrator = Arc::new(PublicationOrchestrator::new(
        OrchestratorConfig {
            lock_ttl: Duration::from_secs(settings.worker.lock_ttl_seconds),
        },
        lists,
        publications,
        lock,
        credentials,
        registry,
        status,
    ));

    let handler: PublishHandler = Arc::new(move |event| {
        let orchestrator = Arc::clone(&orchestrator);
        Box::pin(async move {
            orchestrator
                .on_publish_requested(&event)
                .await
                .map_err(anyhow::Error::from)
        })
    });

    let consumer = Arc::new(NatsPublishConsumer::new(&nats_client, handler).await?);

    let consumer_for_run = Arc::clone(&consumer);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = consumer_for_run.start().await {
            error!(error = %e, "Consumer failed");
        }
    });

    info!("Worker is running");

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    consumer.shutdown();

    info!("Waiting for in-flight publishes to finish");
    let _ = worker_handle.await;

    telemetry::shutdown_tracer();
    info!("Worker shutdown complete");
    Ok(())
}
