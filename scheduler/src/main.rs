// Scheduler binary: runs the trigger evaluation loop and dispatches fired
// schedule specs to the publish work queue.

use anyhow::Result;
use common::config::Settings;
use common::db::{DbPool, RedisPool};
use common::db::repositories::ListRepository;
use common::queue::{NatsClient, NatsTriggerDispatcher};
use common::telemetry;
use common::trigger::{
    RedisWatermarkStore, TriggerEngine, TriggerEngineConfig, TriggerEvaluator, TriggerLoop,
};
use std::sync::Arc;
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

    info!("Starting trigger scheduler");

    let db_pool = DbPool::new(&settings.database).await?;
    let redis_pool = RedisPool::new(&settings.redis).await?;

    let nats_client = NatsClient::new(settings.nats.clone()).await?;
    nats_client.initialize_stream().await?;
    info!("Work queue stream ready");

    let timezone = settings
        .reference_timezone()
        .map_err(|e| anyhow::anyhow!(e))?;

    let watermarks = Arc::new(RedisWatermarkStore::new(redis_pool));
    let evaluator = TriggerEvaluator::new(timezone, watermarks);

    let lists = Arc::new(ListRepository::new(db_pool));
    let dispatcher = Arc::new(NatsTriggerDispatcher::new(nats_client));

    let engine = Arc::new(TriggerEngine::new(
        TriggerEngineConfig {
            tick_interval_seconds: settings.trigger.tick_interval_seconds,
        },
        evaluator,
        lists,
        dispatcher,
    ));

    let engine_for_shutdown = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during engine shutdown");
        }
    });

    info!(
        tick_interval_seconds = settings.trigger.tick_interval_seconds,
        reference_timezone = %settings.trigger.reference_timezone,
        "Trigger evaluation loop starting"
    );

    if let Err(e) = engine.start().await {
        error!(error = %e, "Trigger engine failed");
        return Err(e.into());
    }

    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}
