use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use dialflow_core::progress::ProgressEvent;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct EventsQuery {
    /// First sequence number to replay; defaults to the start of the log.
    #[serde(default = "default_from")]
    pub from: u64,
}

fn default_from() -> u64 {
    1
}

/// GET /api/sessions/:id/events — SSE stream of progress events.
///
/// Replays retained events from `?from=` then stays live. Sequence numbers
/// ride in the SSE `id` field so a dropped consumer can resume where it
/// left off.
pub async fn sse_events(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (replay, rx) = app.engine.hub().subscribe(&id, q.from);

    let stream = tokio_stream::iter(replay.into_iter().map(to_sse))
        .chain(BroadcastStream::new(rx).filter_map(|msg| msg.ok().map(to_sse)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: ProgressEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default()
        .id(event.sequence_number.to_string())
        .event(event.event_type.as_str())
        .data(data))
}
