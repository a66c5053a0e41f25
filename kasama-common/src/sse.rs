//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE implementations for Kasama services.

use crate::events::EventBus;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};

/// Create an SSE stream that forwards EventBus events to the client
///
/// Each event is serialized as JSON with its `type` tag as the SSE event
/// name. Lagged subscribers skip missed events rather than disconnecting.
pub fn create_event_sse_stream(
    service_name: &'static str,
    bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let mut rx = bus.subscribe();
    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event("KasamaEvent").data(json)),
                        Err(e) => debug!("SSE: failed to serialize event: {}", e),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("SSE: subscriber lagged, skipped {} events", missed);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Create a simple heartbeat-only SSE stream for connection status monitoring
///
/// Used by endpoints that have no domain events to broadcast but still need
/// connection status UI.
pub fn create_heartbeat_sse_stream(
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} general events", service_name);

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            // Heartbeat every 15 seconds
            tokio::time::sleep(Duration::from_secs(15)).await;
            debug!("SSE: Sending heartbeat");
            yield Ok(Event::default().comment("heartbeat"));
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
