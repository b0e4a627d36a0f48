// Notifier binary: bridges status-changed events from the bus to live
// per-user SSE streams.

mod sse;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use common::config::Settings;
use common::models::StatusChanged;
use common::notifier::{StatusNotifier, SubscriberRegistry};
use common::queue::nats::STATUS_SUBJECT_WILDCARD;
use common::telemetry;
use futures::StreamExt;
use sse::{health_handler, user_events_handler, AppState};
use std::sync::Arc;
use tracing::{error, info, warn};

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

    info!("Starting status notifier");

    let registry = Arc::new(SubscriberRegistry::new(settings.notifier.channel_capacity));
    let notifier = Arc::new(StatusNotifier::new(Arc::clone(&registry)));

    // Status events ride core NATS, not JetStream: live updates are
    // best effort and a missed one is reconciled by a pull query.
    let nats = async_nats::connect(&settings.nats.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to NATS: {}", e))?;

    let mut subscription = nats
        .subscribe(STATUS_SUBJECT_WILDCARD)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to subscribe to status events: {}", e))?;

    info!(subject = STATUS_SUBJECT_WILDCARD, "Subscribed to status events");

    let fan_out = tokio::spawn(async move {
        while let Some(message) = subscription.next().await {
            match serde_json::from_slice::<StatusChanged>(&message.payload) {
                Ok(event) => notifier.on_status_changed(event).await,
                Err(e) => {
                    warn!(subject = %message.subject, error = %e, "Dropping malformed status event");
                }
            }
        }
        info!("Status subscription ended");
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/users/:user_id/events", get(user_events_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState { registry });

    let addr = format!("{}:{}", settings.notifier.host, settings.notifier.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Notifier listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    fan_out.abort();
    telemetry::shutdown_tracer();
    info!("Notifier stopped");
    Ok(())
}
