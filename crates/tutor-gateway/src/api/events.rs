//! Server-sent event stream: reasoning/voice events fanned out per session.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    session_id: String,
}

/// Detaches the subscriber from the publisher when the SSE stream is
/// dropped, whether the client disconnected or the connection errored out.
struct DetachGuard {
    publisher: std::sync::Arc<tutor_pipeline::EventPublisher>,
    session_id: String,
    subscriber_id: u64,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.publisher.detach(&self.session_id, self.subscriber_id);
    }
}

pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscriber_id, mut rx) = state.publisher.attach(&query.session_id);
    let guard = DetachGuard {
        publisher: state.publisher.clone(),
        session_id: query.session_id,
        subscriber_id,
    };

    let keepalive_secs = state.config.timing.event_keepalive_secs;

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event("reasoning").data(data));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(keepalive_secs))
            .text("keepalive"),
    )
}
