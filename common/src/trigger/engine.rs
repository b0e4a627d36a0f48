// Trigger engine: periodic evaluation loop that turns matching schedule
// specs into publish-requested events on the queue.

use crate::errors::TriggerError;
use crate::models::{PublishRequested, ScheduleSpec};
use crate::orchestrator::store::ListStore;
use crate::queue::TriggerDispatcher;
use crate::trigger::evaluator::{minute_bucket, TriggerEvaluator};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct TriggerEngineConfig {
    /// How often to evaluate schedule specs (in seconds).
    pub tick_interval_seconds: u64,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
        }
    }
}

#[async_trait]
pub trait TriggerLoop: Send + Sync {
    /// Start the evaluation loop. Runs until a shutdown signal arrives.
    async fn start(&self) -> Result<(), TriggerError>;

    /// Stop the loop gracefully.
    async fn stop(&self) -> Result<(), TriggerError>;

    /// Evaluate a single tick. Returns the number of specs dispatched.
    async fn evaluate_tick(&self) -> Result<usize, TriggerError>;
}

pub struct TriggerEngine {
    config: TriggerEngineConfig,
    evaluator: TriggerEvaluator,
    lists: Arc<dyn ListStore>,
    dispatcher: Arc<dyn TriggerDispatcher>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl TriggerEngine {
    pub fn new(
        config: TriggerEngineConfig,
        evaluator: TriggerEvaluator,
        lists: Arc<dyn ListStore>,
        dispatcher: Arc<dyn TriggerDispatcher>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            evaluator,
            lists,
            dispatcher,
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Dispatch a publish request for a fired spec. The dedup key carries the
    /// spec id and minute bucket so the queue drops redundant deliveries even
    /// if two engine instances race past the watermark check.
    #[instrument(skip(self, spec), fields(spec_id = %spec.id, list_id = %spec.list_id))]
    async fn dispatch(&self, spec: &ScheduleSpec, bucket: i64) -> Result<(), TriggerError> {
        let event = PublishRequested {
            list_id: spec.list_id,
            requested_at: Utc::now(),
        };
        let dedup_key = format!("{}:{}", spec.id, bucket);

        self.dispatcher.dispatch(&event, &dedup_key).await?;
        crate::telemetry::record_trigger_fired();

        info!(dedup_key = %dedup_key, "Publish request dispatched");
        Ok(())
    }
}

#[async_trait]
impl TriggerLoop for TriggerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), TriggerError> {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting trigger engine"
        );

        let mut tick = interval(Duration::from_secs(self.config.tick_interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.evaluate_tick().await {
                        Ok(count) => {
                            if count > 0 {
                                info!(specs_dispatched = count, "Tick complete");
                            } else {
                                debug!("No specs due this tick");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Tick evaluation failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping trigger engine");
                    break;
                }
            }
        }

        info!("Trigger engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), TriggerError> {
        info!("Stopping trigger engine");

        let _ = self.shutdown_tx.send(());

        // Give in-flight dispatches a moment to finish.
        sleep(Duration::from_secs(2)).await;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn evaluate_tick(&self) -> Result<usize, TriggerError> {
        let now = Utc::now();
        let bucket = minute_bucket(now);

        let specs = self.lists.find_enabled_specs().await?;
        debug!(spec_count = specs.len(), "Evaluating schedule specs");

        let fired = self.evaluator.evaluate(now, &specs).await?;

        let mut dispatched = 0;
        for spec in &fired {
            match self.dispatch(spec, bucket).await {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    // The watermark has already advanced, so this minute is
                    // lost for the spec. The dispatcher retries internally
                    // before surfacing an error, which keeps this rare.
                    error!(spec_id = %spec.id, error = %e, "Failed to dispatch fired spec");
                }
            }
        }

        Ok(dispatched)
    }
}
