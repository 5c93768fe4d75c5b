//! WebSocket push channel.
//!
//! `GET /api/v1/sessions/:id/events?token=<participant token>` upgrades to a
//! WebSocket that forwards every `SessionEvent` as a JSON text frame. The
//! token travels in the query string because browsers cannot set headers on
//! an upgrade request.
//!
//! Delivery is best effort. A subscriber that falls behind the broadcast
//! buffer gets a `resync-required` frame and should fetch `GET /state`.

use crate::actors::SessionActorHandle;
use crate::errors::RvError;
use crate::middleware::auth::verify_participant;
use crate::observability::metrics;
use crate::realtime::SessionEvent;
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use common::types::{ParticipantId, SessionId};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, instrument, warn};

static WS_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Handler for GET /api/v1/sessions/:id/events
///
/// # Response
///
/// - 101 Switching Protocols: subscribed
/// - 401 Unauthorized: missing or invalid token
/// - 403 Forbidden: token belongs to another session
/// - 404 Not Found: unknown session
#[instrument(skip_all, name = "rv.events.subscribe", fields(session_id = %session_id))]
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, RvError> {
    let token = query
        .token
        .ok_or_else(|| RvError::InvalidToken("Missing token query parameter".to_string()))?;
    let claims = verify_participant(&state.signer, &token)?;
    claims.ensure_session(session_id)?;

    let session = state.registry.get_session(session_id).await?;
    // Subscribe before the upgrade completes so nothing emitted after the
    // handshake is missed.
    let receiver = session.subscribe();
    let participant_id = claims.participant_id;

    Ok(ws.on_upgrade(move |socket| forward_events(socket, session, receiver, participant_id)))
}

/// Decrements the connection gauge when the socket task ends.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        let count = WS_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_ws_connections(count);
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = WS_CONNECTIONS
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_ws_connections(count);
    }
}

async fn forward_events(
    mut socket: WebSocket,
    session: SessionActorHandle,
    receiver: tokio::sync::broadcast::Receiver<SessionEvent>,
    participant_id: ParticipantId,
) {
    let _guard = ConnectionGuard::open();
    let session_id = session.session_id();
    let mut events = BroadcastStream::new(receiver);

    info!(
        target: "rv.events",
        session_id = %session_id,
        participant_id = %participant_id,
        "Subscriber connected"
    );

    loop {
        tokio::select! {
            () = session.cancelled() => {
                debug!(target: "rv.events", session_id = %session_id, "Session actor stopped");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            item = events.next() => {
                let Some(item) = item else {
                    break;
                };
                let Some(frame) = encode_frame(session_id, item) else {
                    continue;
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    // Clients only listen; pings are answered by axum.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(
        target: "rv.events",
        session_id = %session_id,
        participant_id = %participant_id,
        "Subscriber disconnected"
    );
}

/// Turn one broadcast item into a text frame.
///
/// A lag becomes a `resync-required` frame carrying the number of missed
/// events.
fn encode_frame(
    session_id: SessionId,
    item: Result<SessionEvent, BroadcastStreamRecvError>,
) -> Option<String> {
    let event = match item {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(
                target: "rv.events",
                session_id = %session_id,
                missed = missed,
                "Subscriber lagged, requesting resync"
            );
            metrics::record_lagged(missed);
            SessionEvent::ResyncRequired { session_id, missed }
        }
    };

    match serde_json::to_string(&event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(
                target: "rv.events",
                session_id = %session_id,
                event = event.kind(),
                error = %e,
                "Failed to encode session event"
            );
            None
        }
    }
}
