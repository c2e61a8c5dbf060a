//! Per-session trace streams as Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::{AppState, PushedEvent, Subscription, TraceBus};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    session_id: Option<String>,
}

/// GET /trace/stream/{session_id}
pub async fn stream_by_path(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    session_stream(state.bus, session_id)
}

/// GET /trace/stream?session_id=
pub async fn stream_by_query(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, &'static str)> {
    match query.session_id.filter(|id| !id.trim().is_empty()) {
        Some(session_id) => Ok(session_stream(state.bus, session_id)),
        None => Err((StatusCode::BAD_REQUEST, "session_id is required")),
    }
}

/// `hello`, then the session backlog, then live events until the bus closes.
fn session_stream(
    bus: Arc<TraceBus>,
    session_id: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let subscription = bus.subscribe(&session_id);
    debug!(
        session_id = %session_id,
        replay = subscription.backlog.len(),
        sessions = bus.session_count(),
        "trace subscriber connected"
    );
    Sse::new(trace_events(subscription, session_id))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

/// The stream owns `subscription`, so a disconnecting client releases it.
fn trace_events(
    mut subscription: Subscription,
    session_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> + use<> {
    async_stream::stream! {
        yield Ok(Event::default()
            .event("hello")
            .data(json!({"session_id": session_id}).to_string()));

        for event in std::mem::take(&mut subscription.backlog) {
            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
        }

        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some trace events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn to_sse(event: &PushedEvent) -> Option<Event> {
    let data = event_data(event)?;
    Some(Event::default().event(event.kind.as_str()).data(data))
}

/// SSE `data:` line for `event`: the pushed body as JSON.
fn event_data(event: &PushedEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(data) => Some(data),
        Err(err) => {
            warn!(err = %err, kind = %event.kind, "trace event not serializable");
            None
        }
    }
}
