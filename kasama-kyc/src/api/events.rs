//! SSE event stream

use crate::AppState;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams submission lifecycle events (SubmissionReceived,
/// DocumentAnalyzed, DecisionReached, Notification) to connected clients.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    kasama_common::sse::create_event_sse_stream("kasama-kyc", &state.event_bus)
}
