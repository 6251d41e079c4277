//! Client-facing transports.
//!
//! Two session families share one session abstraction:
//!
//! - [`sse`] - streaming-handshake sessions: a long-lived `GET /sse`
//!   stream paired with short-lived `POST /messages?sessionId=<id>`
//!   requests
//! - [`streamable`] - header-correlated Streamable HTTP sessions on
//!   `/mcp`, keyed by the `mcp-session-id` header
//!
//! The dispatch and the notification fan-out never special-case the
//! transport kind; everything transport-specific stays in these handlers.

pub mod sse;
pub mod streamable;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::error::CrossbarError;
use crate::protocol::JsonRpcResponse;

/// Transport-level rejection body.
///
/// Session-layer rejections (unknown or missing session id) share one
/// JSON-RPC-style shape regardless of transport:
/// `{"jsonrpc":"2.0","error":{"code":…,"message":…},"id":null}`.
pub(crate) fn reject(status: StatusCode, error: &CrossbarError) -> Response {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "error": {
            "code": error.to_jsonrpc_code(),
            "message": error.to_string(),
        },
        "id": null,
    });
    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => Bytes::from_static(
            br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#,
        ),
    };
    (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

/// Serialize a JSON-RPC response as an HTTP response.
///
/// JSON-RPC application errors still travel with HTTP 200; only
/// transport-level rejections use 4xx statuses.
pub(crate) fn json_response(response: &JsonRpcResponse) -> Response {
    match serde_json::to_vec(response) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            Bytes::from(bytes),
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "application/json")],
            Bytes::from_static(
                br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#,
            ),
        )
            .into_response(),
    }
}
