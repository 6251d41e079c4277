//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// This structure is embedded in JSON-RPC error responses and follows
/// the JSON-RPC 2.0 specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or Crossbar-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Additional error context data.
///
/// Contains structured error information for debugging and observability.
/// All fields are safe for client consumption (no backend internals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Unique identifier for tracing this error in logs
    pub correlation_id: String,

    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific error details (sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_error_serialization() {
        let error = JsonRpcError {
            code: -32602,
            message: "Invalid parameters: Tool 'missing' not found".to_string(),
            data: Some(ErrorData {
                correlation_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
                error_type: "invalid_params".to_string(),
                details: Some(serde_json::json!({ "field": "name" })),
            }),
        };

        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["code"], -32602);
        assert_eq!(
            json["data"]["correlation_id"],
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(json["data"]["error_type"], "invalid_params");
        assert_eq!(json["data"]["details"]["field"], "name");
    }

    #[test]
    fn test_error_without_data() {
        let error = JsonRpcError {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        };

        let json = serde_json::to_string(&error).unwrap();

        // data field should be omitted when None
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_optional_details_omitted() {
        let error = JsonRpcError {
            code: -32603,
            message: "Internal error".to_string(),
            data: Some(ErrorData {
                correlation_id: "test-id".to_string(),
                error_type: "internal_error".to_string(),
                details: None,
            }),
        };

        let json_str = serde_json::to_string(&error).unwrap();
        assert!(!json_str.contains("\"details\""));
    }
}
