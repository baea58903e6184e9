// crates/server/src/stream.rs
//! Relays a session's events to an SSE client.

use std::convert::Infallible;
use std::time::Duration;

use applydesk_server_jobs::{Delivery, Subscription, TaskEvent};
use axum::response::sse::{Event, Sse};
use tokio_stream::Stream;

/// SSE name of the keepalive event.
pub const PING_EVENT: &str = "ping";

/// Stream `subscription` as SSE frames until `done`.
///
/// Each wait is bounded by `keepalive`; an idle window yields a `ping`.
/// Dropping the stream (client gone) drops the subscription, which arms the
/// session's grace timer.
pub fn event_stream(
    mut subscription: Subscription,
    keepalive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        loop {
            match subscription.next(keepalive).await {
                Delivery::Event(event) => {
                    let terminal = event.is_terminal();
                    yield Ok(to_sse(&event));
                    if terminal {
                        tracing::debug!(key = %subscription.key(), "stream complete");
                        break;
                    }
                }
                Delivery::Ping => yield Ok(Event::default().event(PING_EVENT).data("")),
                Delivery::Closed => break,
            }
        }
    };

    Sse::new(stream)
}

fn to_sse(event: &TaskEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(single_line(event.message()))
}

/// SSE data is line-delimited; fold any line breaks into spaces.
pub fn single_line(message: &str) -> String {
    message
        .split(|c| c == '\r' || c == '\n')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
