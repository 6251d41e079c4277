//! JSON-RPC 2.0 types and parsing.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - `id` type (string or integer) MUST be preserved in responses
//!
//! Batch arrays are rejected: MCP protocol revision 2025-06-18 removed
//! JSON-RPC batching, and every transport the hub serves speaks
//! single-message JSON-RPC.
//!
//! # Security Note
//!
//! This module parses untrusted input. Size limits are enforced at the
//! HTTP layer before bytes reach `parse_jsonrpc`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::CrossbarError;

/// Startup prefix derived from a single Uuid::new_v4() call.
/// The upper 64 bits provide process-level uniqueness.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

/// Monotonically increasing counter for the lower 64 bits.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fast correlation ID using a counter-based approach.
///
/// Combines a process-unique prefix (from a single Uuid::new_v4() at
/// startup) with a monotonically increasing counter. This avoids the
/// CSPRNG overhead of Uuid::new_v4() on every request while still
/// producing unique 128-bit IDs with correct v4/RFC 4122 bits.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    // Set version 4 (bits 48-51 of the 128-bit value)
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    // Set variant 1 - RFC 4122 (bits 64-65)
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

/// JSON-RPC 2.0 request ID.
///
/// The spec allows string or integer IDs. The exact type is preserved so
/// responses use the same type as requests: if the client sends `"id": 1`,
/// respond with `"id": 1`, never `"id": "1"`.
///
/// `"id": null` is valid (though unusual) and is echoed back; it is
/// distinct from a missing `id` field, which marks a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID - valid but unusual
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or_else(|| {
                serde::de::Error::custom("JSON-RPC ID must be integer, not float")
            }),
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

/// Wrapper to distinguish between missing field and explicit null.
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Deserializer that converts MaybeNull<JsonRpcId> to Option<JsonRpcId>
/// where explicit null becomes Some(JsonRpcId::Null).
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

/// Raw JSON-RPC 2.0 request as received from the client.
///
/// This struct handles the wire format before validation. All fields are
/// optional to allow for proper error reporting on malformed requests.
#[derive(Debug, Clone, Deserialize)]
struct RawJsonRpcRequest {
    /// Must be "2.0"
    jsonrpc: Option<String>,
    /// Request ID (absent for notifications, Some(Null) for explicit null)
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    /// Method name
    method: Option<String>,
    /// Method parameters
    params: Option<Value>,
}

/// JSON-RPC 2.0 version constant.
const JSONRPC_VERSION: &str = "2.0";

/// Validated JSON-RPC 2.0 request, used when forwarding to a backend.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID (None for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a forwarding request with a fresh integer id.
    pub fn call(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: Some(JsonRpcId::Number(1)),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// JSON-RPC 2.0 response.
///
/// # ID Serialization
///
/// Per JSON-RPC 2.0, the `id` field is REQUIRED in responses: the same as
/// the request's `id`, or `null` if the request id could not be determined
/// (e.g., parse error). `None` therefore serializes as `"id": null` here,
/// unlike `JsonRpcRequest` where `None` means "notification" and the field
/// is omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID - always serialized (None becomes null)
    pub id: Option<JsonRpcId>,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::jsonrpc::JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    ///
    /// Pass `None` as `id` if the request ID could not be determined -
    /// this serializes as `"id": null` per the JSON-RPC 2.0 spec.
    pub fn error(id: Option<JsonRpcId>, error: crate::error::jsonrpc::JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parsed and validated MCP request with internal tracking.
#[derive(Clone)]
pub struct McpRequest {
    /// Original JSON-RPC ID (None for notifications)
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters (Arc-wrapped for O(1) clone on the forward path)
    pub params: Option<Arc<Value>>,
    /// Unique correlation ID for tracing
    pub correlation_id: Uuid,
}

/// Custom Debug implementation that redacts params to prevent leaking
/// tool arguments or resource URIs into logs.
impl std::fmt::Debug for McpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &self.params.as_ref().map(|_| "<redacted>"))
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

impl McpRequest {
    /// Returns true if this is a notification (no ID).
    ///
    /// Notifications do not receive responses per JSON-RPC 2.0.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Borrow a named parameter, if present.
    pub fn param(&self, field: &str) -> Option<&Value> {
        self.params.as_deref().and_then(|p| p.get(field))
    }
}

/// Parse JSON bytes into a single JSON-RPC 2.0 request.
///
/// # Returns
///
/// * `Ok(McpRequest)` - Successfully parsed request
/// * `Err(CrossbarError::ParseError)` - Malformed JSON (-32700)
/// * `Err(CrossbarError::InvalidRequest)` - Invalid JSON-RPC structure
///   or a batch array (-32600)
pub fn parse_jsonrpc(bytes: &[u8]) -> Result<McpRequest, CrossbarError> {
    // Peek at the first non-whitespace byte to reject batches without
    // parsing the entire payload into an intermediate Value.
    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| CrossbarError::ParseError {
            details: "Invalid JSON: empty input".to_string(),
        })?;

    match first_byte {
        b'{' => {
            let raw: RawJsonRpcRequest = serde_json::from_slice(bytes).map_err(|e| {
                // Distinguish syntax errors (bad JSON) from semantic errors
                // (valid JSON but invalid field values like float IDs).
                if e.is_syntax() || e.is_eof() {
                    CrossbarError::ParseError {
                        details: format!("Invalid JSON: {}", e),
                    }
                } else {
                    CrossbarError::InvalidRequest {
                        details: format!("Invalid JSON-RPC structure: {}", e),
                    }
                }
            })?;
            validate_raw(raw)
        }
        b'[' => Err(CrossbarError::InvalidRequest {
            details: "Batch requests are not supported".to_string(),
        }),
        _ => {
            // Attempt parse to get a proper serde error message
            serde_json::from_slice::<Value>(bytes)
                .map_err(|e| CrossbarError::ParseError {
                    details: format!("Invalid JSON: {}", e),
                })
                .and_then(|_| {
                    Err(CrossbarError::InvalidRequest {
                        details: "Request must be a JSON object".to_string(),
                    })
                })
        }
    }
}

/// Validate and convert a raw JSON-RPC request into an [`McpRequest`].
fn validate_raw(raw: RawJsonRpcRequest) -> Result<McpRequest, CrossbarError> {
    match raw.jsonrpc.as_deref() {
        Some("2.0") => {}
        Some(v) => {
            return Err(CrossbarError::InvalidRequest {
                details: format!("Invalid jsonrpc version: expected \"2.0\", got \"{}\"", v),
            });
        }
        None => {
            return Err(CrossbarError::InvalidRequest {
                details: "Missing required field: jsonrpc".to_string(),
            });
        }
    }

    let method = raw.method.ok_or_else(|| CrossbarError::InvalidRequest {
        details: "Missing required field: method".to_string(),
    })?;

    Ok(McpRequest {
        id: raw.id,
        method,
        params: raw.params.map(Arc::new),
        correlation_id: fast_correlation_id(),
    })
}
