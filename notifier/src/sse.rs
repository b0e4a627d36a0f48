// Live subscription surface: one SSE stream per connection, fed from the
// per-user broadcast channel.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use common::notifier::SubscriberRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
}

/// Stream status-changed events for one user. Every open stream of the same
/// user receives every event.
#[tracing::instrument(skip(state))]
pub async fn user_events_handler(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe(user_id).await;

    let stream = BroadcastStream::new(rx).map(|msg| match msg {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().event("status_changed").data(json))
        }
        // Receiver lagged behind the channel; the client reconciles via a
        // pull query after reconnecting.
        Err(_) => Ok(Event::default().event("reconnect")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn health_handler() -> &'static str {
    "ok"
}
