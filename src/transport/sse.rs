//! Streaming-handshake transport: `GET /sse` + `POST /messages`.
//!
//! The read-style request opens the session and returns the minted id to
//! the client as the first stream event (an `endpoint` event naming the
//! message URL). Every client→server message is then a separate POST that
//! must carry the session id explicitly; responses and notifications flow
//! back as `message` events on the stream.
//!
//! Teardown is symmetric: the client closing the stream drops the
//! generator and its guard removes the table entry; the hub removing the
//! entry closes the outbound queue, which ends the stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::CrossbarError;
use crate::protocol::parse_jsonrpc;
use crate::server::HubState;
use crate::session::{SessionTable, TransportKind, dispatch};

use super::reject;

/// Removes the session when the client-side stream ends.
struct StreamGuard {
    sessions: Arc<SessionTable>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.session_id);
    }
}

/// `GET /sse` - open a streaming-handshake session.
pub async fn open_stream(State(state): State<Arc<HubState>>) -> Response {
    if state.lifecycle.is_shutting_down() {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            &CrossbarError::ServiceUnavailable {
                reason: "shutting down".to_string(),
            },
        );
    }

    let session = state.sessions.create(TransportKind::Sse);
    let Some(mut outbound) = session.take_stream() else {
        // Freshly created sessions always hold their receiver.
        state.sessions.remove(&session.id);
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            &CrossbarError::InternalError {
                correlation_id: session.id.clone(),
            },
        );
    };

    let endpoint = format!("/messages?sessionId={}", session.id);
    let guard = StreamGuard {
        sessions: state.sessions.clone(),
        session_id: session.id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
        while let Some(message) = outbound.recv().await {
            yield Ok(Event::default().event("message").data(message));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Query parameters of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// The session id minted by `GET /sse`
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `POST /messages?sessionId=<id>` - deliver one client message.
///
/// A message without a recognized session id is rejected with 404 and is
/// never dispatched. Accepted messages are answered over the session's
/// stream; the POST itself returns 202.
pub async fn post_message(
    State(state): State<Arc<HubState>>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let Some(session) = state.sessions.get(&query.session_id) else {
        debug!(session_id = %query.session_id, "message for unknown session");
        return reject(
            StatusCode::NOT_FOUND,
            &CrossbarError::SessionNotFound {
                session_id: query.session_id,
            },
        );
    };

    let request = match parse_jsonrpc(&body) {
        Ok(request) => request,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e),
    };

    let _guard = state.lifecycle.track_request();

    if let Some(response) = dispatch(&state, &session, request).await {
        match serde_json::to_string(&response) {
            Ok(payload) => {
                if session.send(payload).await.is_err() {
                    // The stream closed while we were dispatching; cleanup
                    // happens on the stream side.
                    warn!(session_id = %session.id, "session stream closed before response");
                }
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "failed to serialize response");
            }
        }
    }

    StatusCode::ACCEPTED.into_response()
}
