//! Server-Sent Events stream of job and sweep activity.
//!
//! Late joiners first receive the most recent events from the bus, then
//! live events as they are broadcast.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use mc_core::events::EventCategory;

use crate::context::AppContext;

/// Events replayed to a new subscriber.
const REPLAY_EVENTS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only stream events of this category.
    pub category: Option<EventCategory>,
}

fn to_sse(event: &mc_core::events::Event) -> Option<Event> {
    serde_json::to_string(event)
        .ok()
        .map(|data| Event::default().id(event.id.to_string()).data(data))
}

/// GET /api/events
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let filter = params.category;
    let wanted = move |category: EventCategory| filter.map_or(true, |f| f == category);

    let recent = ctx.event_bus.recent_events(REPLAY_EVENTS);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.iter().rev().filter(|e| wanted(e.category)) {
            if let Some(sse) = to_sse(event) {
                yield Ok(sse);
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) if wanted(event.category) => {
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
