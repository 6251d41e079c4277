//! Error handling for Crossbar.
//!
//! This module defines all error types that can occur in the hub and provides
//! JSON-RPC 2.0 compliant error response formatting.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error response structures
//! - `CrossbarError` - hub error taxonomy with code mapping
//!
//! ## Propagation Policy
//!
//! Only request-scoped errors reach a client. Synchronization and
//! housekeeping errors are logged and swallowed; nothing in the hub core
//! terminates the process on a single backend or client fault.

pub mod jsonrpc;

use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

/// All error types that can occur in Crossbar.
///
/// Each variant maps to a specific JSON-RPC error code and provides
/// structured error information for clients.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CrossbarError {
    // Protocol errors
    /// Invalid JSON in request body.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse error
        details: String,
    },

    /// Request is not a valid JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// Description of what makes the request invalid
        details: String,
    },

    /// The requested method does not exist.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found
        method: String,
    },

    /// The method parameters are invalid.
    ///
    /// Also covers the lookup miss on a capability registry: the exposed
    /// name the client sent resolves to nothing, and the error names both
    /// the missing identifier and the field it was read from.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the parameter validation failure
        details: String,
    },

    /// Internal hub error - should not happen.
    #[error("Internal error. Reference: {correlation_id}")]
    InternalError {
        /// Correlation ID for debugging
        correlation_id: String,
    },

    // Transport errors
    /// The session identifier is missing or not recognized.
    #[error("No active session found for id '{session_id}'")]
    SessionNotFound {
        /// The session id presented by the client
        session_id: String,
    },

    // Backend invocation errors
    /// Cannot connect to the origin backend.
    #[error("Backend '{backend}' is unreachable")]
    BackendUnreachable {
        /// The backend name
        backend: String,
        /// Reason for the connection failure
        reason: String,
    },

    /// The origin backend did not respond in time.
    #[error("Backend '{backend}' did not respond within {timeout_secs}s")]
    BackendTimeout {
        /// The backend name
        backend: String,
        /// The timeout duration in seconds
        timeout_secs: u64,
    },

    /// The origin backend returned a JSON-RPC error.
    #[error("Backend '{backend}' error: {message}")]
    BackendError {
        /// The backend name
        backend: String,
        /// The error code from the backend
        code: i32,
        /// The error message from the backend
        message: String,
    },

    /// The registry resolved to a backend the host no longer knows.
    #[error("Backend '{backend}' is not registered with this hub")]
    BackendUnknown {
        /// The backend name
        backend: String,
    },

    // Operational errors
    /// Service is temporarily unavailable.
    #[error("Service temporarily unavailable")]
    ServiceUnavailable {
        /// Reason for unavailability
        reason: String,
    },
}

impl CrossbarError {
    /// Maps error to JSON-RPC 2.0 error code.
    ///
    /// Standard JSON-RPC codes (-32700 to -32603) are used for protocol
    /// errors. Crossbar custom codes (-32000 to -32005) are used for
    /// transport and backend errors.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            // Standard JSON-RPC codes
            Self::ParseError { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::InternalError { .. } => -32603,

            // Crossbar custom codes
            Self::SessionNotFound { .. } => -32000,
            Self::BackendUnreachable { .. } => -32001,
            Self::BackendTimeout { .. } => -32002,
            Self::BackendError { .. } => -32003,
            Self::BackendUnknown { .. } => -32004,
            Self::ServiceUnavailable { .. } => -32005,
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::InternalError { .. } => "internal_error",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::BackendTimeout { .. } => "backend_timeout",
            Self::BackendError { .. } => "backend_error",
            Self::BackendUnknown { .. } => "backend_unknown",
            Self::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Returns safe details for client consumption.
    ///
    /// Backend-side messages and reasons are not exposed verbatim; clients
    /// get the identifying fields only, the rest stays in the hub's logs.
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MethodNotFound { method } => Some(serde_json::json!({ "method": method })),
            Self::SessionNotFound { session_id } => {
                Some(serde_json::json!({ "session_id": session_id }))
            }
            Self::BackendTimeout {
                backend,
                timeout_secs,
            } => Some(serde_json::json!({
                "backend": backend,
                "timeout_secs": timeout_secs
            })),
            Self::BackendError { backend, code, .. } => Some(serde_json::json!({
                "backend": backend,
                "backend_code": code
            })),
            Self::BackendUnknown { backend } => Some(serde_json::json!({ "backend": backend })),
            // Unreachable errors carry internal addresses in their reason;
            // expose nothing beyond the message template.
            _ => None,
        }
    }

    /// Converts error to a JSON-RPC error response object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.safe_details(),
            }),
        }
    }
}
