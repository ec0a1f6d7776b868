//! Pull transport: one Server-Sent Events stream per client.
//!
//! Each stream owns a private cursor on the hub's event queue and waits on
//! the cursor, a heartbeat tick and the shutdown token. The connection is
//! removed from the hub when the stream is dropped, whether the client went
//! away or the server is shutting down.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use metrics::counter;
use smt_core::ConnectionId;
use smt_realtime::{
    Attachment, CursorRead, DisconnectReason, EventCursor, NotificationHub, ServerMessage,
    Transport, TransportKind,
};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{self, TokenQuery};
use crate::metrics::{SSE_CONNECTIONS_TOTAL, SSE_EVENTS_MISSED_TOTAL};
use crate::server::{AppState, reserve_slot};

/// Disconnects a pull connection when its stream is dropped, then frees its
/// connection slot.
struct PullGuard {
    hub: Arc<NotificationHub>,
    id: ConnectionId,
    shutdown: CancellationToken,
    _slot: OwnedSemaphorePermit,
}

impl Drop for PullGuard {
    fn drop(&mut self) {
        let reason = if self.shutdown.is_cancelled() {
            DisconnectReason::Shutdown
        } else {
            DisconnectReason::ClientClosed
        };
        let _ = self.hub.disconnect(&self.id, reason);
    }
}

enum Step {
    Send(Event),
    Skip,
    End,
}

/// GET /api/events
pub async fn events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let verified =
        match auth::authenticate(&state.verifier, &headers, &query, &state.config.viewer_roles) {
            Ok(v) => v,
            Err(failure) => return failure.into_response(),
        };
    let Some(slot) = reserve_slot(&state) else {
        return crate::server::capacity_response();
    };

    let identity = verified.identity.clone();
    let attachment =
        Attachment::new(identity.clone(), Transport::Pull).expiring_at(verified.expires_at);
    let id = match state.hub.connect(attachment) {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "failed to register pull connection");
            return crate::server::internal_error_response(&e.to_string());
        }
    };
    counter!(SSE_CONNECTIONS_TOTAL).increment(1);

    // subscribe before responding so nothing published after `connected` is missed
    let cursor = state.hub.subscribe_events();
    let guard = PullGuard {
        hub: state.hub.clone(),
        id: id.clone(),
        shutdown: state.shutdown.token(),
        _slot: slot,
    };
    let connected = ServerMessage::Connected {
        connection_id: id,
        user: identity,
        transport: TransportKind::Pull,
    };

    Sse::new(event_stream(
        guard,
        cursor,
        connected,
        state.config.heartbeat_interval(),
        state.shutdown.token(),
    ))
    .into_response()
}

fn event_stream(
    guard: PullGuard,
    mut cursor: EventCursor,
    connected: ServerMessage,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let guard = guard;
        info!(conn_id = %guard.id, "event stream opened");
        if let Some(event) = frame_event(&connected) {
            yield Ok(event);
        }

        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        // skip the immediate first tick
        let _ = heartbeat.tick().await;

        loop {
            let step = tokio::select! {
                () = shutdown.cancelled() => Step::End,
                _ = heartbeat.tick() => {
                    frame_event(&ServerMessage::Heartbeat).map_or(Step::Skip, Step::Send)
                }
                read = cursor.next() => match read {
                    Some(CursorRead::Event(event)) => match event.to_json() {
                        Ok(json) => Step::Send(Event::default().data(json)),
                        Err(e) => {
                            warn!(error = %e, "failed to serialize event");
                            Step::Skip
                        }
                    },
                    Some(CursorRead::Missed(count)) => {
                        warn!(conn_id = %guard.id, count, "pull consumer lagged");
                        counter!(SSE_EVENTS_MISSED_TOTAL).increment(count);
                        frame_event(&ServerMessage::EventsMissed { count }).map_or(Step::Skip, Step::Send)
                    }
                    None => Step::End,
                },
            };
            match step {
                Step::Send(event) => yield Ok(event),
                Step::Skip => {}
                Step::End => break,
            }
        }
        debug!(conn_id = %guard.id, "event stream ended");
    }
}

fn frame_event(message: &ServerMessage) -> Option<Event> {
    match message.to_frame_json() {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            warn!(error = %e, kind = message.event_type(), "failed to serialize frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use smt_core::{Identity, Role};
    use smt_realtime::{HubConfig, WorkOrderSubject};
    use tokio::sync::Semaphore;

    fn setup() -> (Arc<NotificationHub>, PullGuard, EventCursor, ServerMessage, CancellationToken) {
        let hub = Arc::new(NotificationHub::new(&HubConfig::default()));
        let identity = Identity::new("u-1", "kiosk", Role::FloorView);
        let id = hub
            .connect(Attachment::new(identity.clone(), Transport::Pull))
            .unwrap();
        let cursor = hub.subscribe_events();
        let shutdown = CancellationToken::new();
        let slot = Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap();
        let guard = PullGuard {
            hub: hub.clone(),
            id: id.clone(),
            shutdown: shutdown.clone(),
            _slot: slot,
        };
        let connected = ServerMessage::Connected {
            connection_id: id,
            user: identity,
            transport: TransportKind::Pull,
        };
        (hub, guard, cursor, connected, shutdown)
    }

    #[tokio::test]
    async fn dropping_stream_disconnects() {
        let (hub, guard, cursor, connected, shutdown) = setup();
        let stream = event_stream(guard, cursor, connected, Duration::from_secs(30), shutdown);
        assert_eq!(hub.registry().connection_count(), 1);
        drop(stream);
        assert_eq!(hub.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_stream() {
        let (hub, guard, cursor, connected, shutdown) = setup();
        let stream = event_stream(guard, cursor, connected, Duration::from_secs(30), shutdown.clone());
        tokio::pin!(stream);
        assert!(stream.next().await.is_some());
        shutdown.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(hub.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn yields_connected_then_events() {
        let (hub, guard, cursor, connected, shutdown) = setup();
        let stream = event_stream(guard, cursor, connected, Duration::from_secs(30), shutdown);
        tokio::pin!(stream);
        assert!(stream.next().await.is_some());
        let _ = hub.notify(WorkOrderSubject::new("42", "WO-1"), "Ready", "In Progress", "alice");
        assert!(stream.next().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_emitted_without_events() {
        let (_hub, guard, cursor, connected, shutdown) = setup();
        let stream = event_stream(guard, cursor, connected, Duration::from_millis(500), shutdown);
        tokio::pin!(stream);
        assert!(stream.next().await.is_some());
        let beat = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert!(matches!(beat, Ok(Some(Ok(_)))));
    }
}
