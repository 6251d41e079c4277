//! Header-correlated Streamable HTTP transport on `/mcp`.
//!
//! The session id travels in the `mcp-session-id` header. The very first
//! request of a new session must be a POST carrying an `initialize` body
//! and no session header; the hub mints an id, stores the session, and
//! returns the id in the response header. Any non-initialize request
//! missing or presenting an unrecognized id is rejected with 400 before
//! any state is created.
//!
//! - `POST /mcp` - dispatch one message (or open a session via initialize)
//! - `GET /mcp` - open the session's notification stream
//! - `DELETE /mcp` - close the session

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::CrossbarError;
use crate::protocol::parse_jsonrpc;
use crate::server::HubState;
use crate::session::{TransportKind, dispatch};

use super::{json_response, reject};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// `ALL /mcp` entry point.
pub async fn handle(
    State(state): State<Arc<HubState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if method == Method::POST {
        post(state, session_id, body).await
    } else if method == Method::GET {
        notification_stream(state, session_id)
    } else if method == Method::DELETE {
        close(state, session_id)
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

/// Dispatch one message, or open a session when the body is `initialize`.
async fn post(state: Arc<HubState>, session_id: Option<String>, body: Bytes) -> Response {
    match session_id {
        Some(id) => {
            let Some(session) = state.sessions.get(&id) else {
                debug!(session_id = %id, "request for unknown session");
                return reject(
                    StatusCode::BAD_REQUEST,
                    &CrossbarError::SessionNotFound { session_id: id },
                );
            };

            let request = match parse_jsonrpc(&body) {
                Ok(request) => request,
                // The session is real, so this is an application-level
                // JSON-RPC error, not a transport rejection.
                Err(e) => {
                    return json_response(&crate::protocol::JsonRpcResponse::error(
                        None,
                        e.to_jsonrpc_error("parse"),
                    ));
                }
            };

            let _guard = state.lifecycle.track_request();
            match dispatch(&state, &session, request).await {
                Some(response) => json_response(&response),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
        None => open_session(state, body).await,
    }
}

/// Open a new session from a header-less `initialize` POST.
async fn open_session(state: Arc<HubState>, body: Bytes) -> Response {
    let request = match parse_jsonrpc(&body) {
        Ok(request) => request,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e),
    };

    if request.method != "initialize" {
        return reject(
            StatusCode::BAD_REQUEST,
            &CrossbarError::InvalidRequest {
                details: format!(
                    "a new session must start with 'initialize'; '{}' requires an {} header",
                    request.method, SESSION_HEADER
                ),
            },
        );
    }

    let session = state.sessions.create(TransportKind::StreamableHttp);
    let _guard = state.lifecycle.track_request();

    match dispatch(&state, &session, request).await {
        Some(response) => {
            let mut http_response = json_response(&response);
            match header::HeaderValue::from_str(&session.id) {
                Ok(value) => {
                    http_response.headers_mut().insert(SESSION_HEADER, value);
                }
                Err(_) => {
                    // Uuid session ids are always valid header values.
                    warn!(session_id = %session.id, "session id not header-safe");
                }
            }
            http_response
        }
        None => {
            // An id-less initialize is a notification; nothing to
            // correlate a session with, so none is kept.
            state.sessions.remove(&session.id);
            reject(
                StatusCode::BAD_REQUEST,
                &CrossbarError::InvalidRequest {
                    details: "initialize must carry a request id".to_string(),
                },
            )
        }
    }
}

/// `GET /mcp` - open the session's notification stream.
fn notification_stream(state: Arc<HubState>, session_id: Option<String>) -> Response {
    let Some(session) = (match session_id {
        Some(ref id) => state.sessions.get(id),
        None => None,
    }) else {
        return reject(
            StatusCode::BAD_REQUEST,
            &CrossbarError::SessionNotFound {
                session_id: session_id.unwrap_or_default(),
            },
        );
    };

    let Some(outbound) = session.take_stream() else {
        return reject(
            StatusCode::CONFLICT,
            &CrossbarError::InvalidRequest {
                details: "notification stream already open for this session".to_string(),
            },
        );
    };

    // No drop-guard here: header-correlated sessions end on DELETE, not on
    // stream close. A client that drops the stream just stops receiving
    // notifications.
    let stream = ReceiverStream::new(outbound)
        .map(|message| Ok::<_, Infallible>(Event::default().event("message").data(message)));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// `DELETE /mcp` - close the session.
fn close(state: Arc<HubState>, session_id: Option<String>) -> Response {
    let Some(id) = session_id else {
        return reject(
            StatusCode::BAD_REQUEST,
            &CrossbarError::SessionNotFound {
                session_id: String::new(),
            },
        );
    };

    if state.sessions.remove(&id) {
        StatusCode::OK.into_response()
    } else {
        reject(
            StatusCode::BAD_REQUEST,
            &CrossbarError::SessionNotFound { session_id: id },
        )
    }
}
