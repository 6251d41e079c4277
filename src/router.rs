//! Request routing: exposed name to origin backend.
//!
//! The router resolves an inbound call against the capability registries,
//! rebuilds the forwarding parameters with the backend's original
//! identifier, and forwards through the backend host with a timeout.
//!
//! # Failure Shaping
//!
//! Failures are shaped per kind, and the asymmetry is intentional: a
//! failed tool call returns a *successful* JSON-RPC envelope carrying
//! `isError: true` and a textual explanation, so a calling agent can read
//! the failure as content and react to it; failed resource reads and
//! prompt gets surface as protocol-level errors. Resolution failures
//! (unknown exposed name, missing parameter) are always protocol errors
//! and never reach a backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::backend::BackendHost;
use crate::error::CrossbarError;
use crate::protocol::{CapabilityKind, JsonRpcRequest, McpRequest};
use crate::registry::RegistrySet;

/// Default bound on a forwarded backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Routes inbound capability calls to their origin backends.
pub struct RequestRouter {
    host: Arc<dyn BackendHost>,
    registries: Arc<RegistrySet>,
    timeout: Duration,
}

impl RequestRouter {
    /// Create a new router.
    pub fn new(host: Arc<dyn BackendHost>, registries: Arc<RegistrySet>, timeout: Duration) -> Self {
        Self {
            host,
            registries,
            timeout,
        }
    }

    /// Resolve and forward one capability call.
    ///
    /// The request's identifying field (per kind) is looked up in the
    /// kind's registry; an unknown name returns invalid-params
    /// synchronously. No retries: the timeout is the only bound on a hung
    /// backend.
    pub async fn invoke(
        &self,
        kind: CapabilityKind,
        request: &McpRequest,
    ) -> Result<Value, CrossbarError> {
        let method = kind.call_method().ok_or_else(|| CrossbarError::InvalidRequest {
            details: format!("{} are list-only and cannot be invoked", kind),
        })?;

        let field = kind.uid_field();
        let exposed = request
            .param(field)
            .and_then(Value::as_str)
            .ok_or_else(|| CrossbarError::InvalidParams {
                details: format!("Missing required parameter '{}'", field),
            })?;

        let registry = self.registries.load(kind);
        let Some(registration) = registry.get(exposed) else {
            return Err(CrossbarError::InvalidParams {
                details: format!(
                    "{} '{}' not found (field '{}')",
                    singular(kind),
                    exposed,
                    field
                ),
            });
        };

        let params = self.forward_params(kind, &registration.original_name, request);

        debug!(
            kind = %kind,
            exposed_name = %exposed,
            backend = %registration.backend,
            original_name = %registration.original_name,
            correlation_id = %request.correlation_id,
            "routing capability call"
        );

        let outcome = self
            .host
            .raw_request(
                &registration.backend,
                JsonRpcRequest::call(method, params),
                self.timeout,
            )
            .await;

        match (kind, outcome) {
            (_, Ok(result)) => Ok(result),
            (CapabilityKind::Tools, Err(e)) => {
                warn!(
                    backend = %registration.backend,
                    tool = %registration.original_name,
                    error = %e,
                    "tool call failed; returning error envelope"
                );
                Ok(tool_error_envelope(&e))
            }
            (_, Err(e)) => Err(e),
        }
    }

    /// Build forwarding parameters carrying the backend's original
    /// identifier.
    fn forward_params(&self, kind: CapabilityKind, original: &str, request: &McpRequest) -> Value {
        match kind {
            CapabilityKind::Tools => json!({
                "name": original,
                "arguments": request.param("arguments").cloned().unwrap_or_else(|| json!({})),
            }),
            CapabilityKind::Resources => json!({ "uri": original }),
            CapabilityKind::Prompts => {
                let mut params = Map::new();
                params.insert("name".to_string(), Value::String(original.to_string()));
                if let Some(arguments) = request.param("arguments") {
                    params.insert("arguments".to_string(), arguments.clone());
                }
                Value::Object(params)
            }
            // Guarded above: templates have no call method.
            CapabilityKind::ResourceTemplates => Value::Null,
        }
    }
}

/// Human label for one capability kind, used in client-facing errors.
fn singular(kind: CapabilityKind) -> &'static str {
    match kind {
        CapabilityKind::Tools => "Tool",
        CapabilityKind::Resources => "Resource",
        CapabilityKind::ResourceTemplates => "Resource template",
        CapabilityKind::Prompts => "Prompt",
    }
}

/// Wrap a backend failure as tool-call result content.
fn tool_error_envelope(error: &CrossbarError) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": format!("Error: {}", error),
        }],
        "isError": true,
    })
}
