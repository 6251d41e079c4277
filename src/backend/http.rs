//! HTTP backend host with connection pooling.
//!
//! Production [`BackendHost`] implementation: each configured backend is an
//! HTTP MCP endpoint spoken to with JSON-RPC over POST. The host keeps
//! persistent pooled connections, performs the initial handshake and
//! catalog fetch at startup, and classifies transport failures into
//! [`CrossbarError`] variants.
//!
//! # Security
//!
//! - No automatic retry (prevents duplicate side effects on backends)
//! - Backend error messages are logged here but sanitized before they
//!   reach clients (see `CrossbarError::safe_details`)

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CrossbarError;
use crate::protocol::{CapabilityKind, Identity, JsonRpcRequest, JsonRpcResponse};

use super::{BackendEvent, BackendHost, BackendSnapshot, BackendStatus, CapabilityLists,
            HubLifecycleState};

/// Static configuration for one backend, as loaded from the roster file.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSpec {
    /// Backend name, unique within the roster
    pub name: String,
    /// Base URL of the backend MCP endpoint
    pub url: String,
    /// Optional tool-name prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Operator-disabled flag
    #[serde(default)]
    pub disabled: bool,
}

/// Configuration for the HTTP backend host.
#[derive(Debug, Clone)]
pub struct HttpHostConfig {
    /// Connection timeout (TCP handshake)
    pub connect_timeout: Duration,
    /// Timeout for handshake and catalog fetches at startup
    pub startup_timeout: Duration,
    /// Maximum idle connections per backend
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout
    pub pool_idle_timeout: Duration,
}

impl Default for HttpHostConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Mutable runtime state of one backend connection.
#[derive(Debug)]
struct BackendRuntime {
    status: BackendStatus,
    identity: Option<Identity>,
    capabilities: CapabilityLists,
}

/// One configured backend plus its runtime state.
struct HttpBackend {
    spec: BackendSpec,
    state: RwLock<BackendRuntime>,
}

/// HTTP-backed [`BackendHost`].
///
/// # Thread Safety
///
/// The host is shared behind `Arc`. The underlying reqwest client handles
/// connection pooling internally; per-backend runtime state sits behind a
/// `RwLock` that is only write-locked during (re)connection.
pub struct HttpBackendHost {
    backends: Vec<HttpBackend>,
    client: Client,
    config: HttpHostConfig,
    events: broadcast::Sender<BackendEvent>,
}

impl HttpBackendHost {
    /// Create a new host from a backend roster.
    ///
    /// Backends start out `Connecting`; call [`connect_all`] to perform the
    /// handshake and initial catalog fetch.
    ///
    /// # Errors
    ///
    /// Returns `CrossbarError::ServiceUnavailable` if the HTTP client
    /// cannot be built.
    ///
    /// [`connect_all`]: HttpBackendHost::connect_all
    pub fn new(specs: Vec<BackendSpec>, config: HttpHostConfig) -> Result<Self, CrossbarError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CrossbarError::ServiceUnavailable {
                reason: format!("failed to build backend HTTP client: {}", e),
            })?;

        let (events, _) = broadcast::channel(64);

        let backends = specs
            .into_iter()
            .map(|spec| HttpBackend {
                spec,
                state: RwLock::new(BackendRuntime {
                    status: BackendStatus::Connecting,
                    identity: None,
                    capabilities: CapabilityLists::default(),
                }),
            })
            .collect();

        Ok(Self {
            backends,
            client,
            config,
            events,
        })
    }

    /// Handshake every enabled backend and fetch its capability catalogs,
    /// then announce `Lifecycle(Ready)`.
    ///
    /// A backend that fails its handshake is marked `Error` and simply
    /// contributes nothing; startup never fails because of one backend.
    pub async fn connect_all(&self) {
        for backend in &self.backends {
            if backend.spec.disabled {
                debug!(backend = %backend.spec.name, "backend disabled, skipping handshake");
                continue;
            }

            match self.handshake(backend).await {
                Ok((identity, capabilities)) => {
                    info!(
                        backend = %backend.spec.name,
                        identity = %identity,
                        "backend connected"
                    );
                    let mut state = backend.state.write().expect("backend state poisoned");
                    state.status = BackendStatus::Connected;
                    state.identity = Some(identity);
                    state.capabilities = capabilities;
                }
                Err(e) => {
                    warn!(
                        backend = %backend.spec.name,
                        error = %e,
                        "backend handshake failed"
                    );
                    let mut state = backend.state.write().expect("backend state poisoned");
                    state.status = BackendStatus::Error;
                }
            }
        }

        // Receiver may not exist yet during tests; a dropped event is fine.
        let _ = self
            .events
            .send(BackendEvent::Lifecycle(HubLifecycleState::Ready));
    }

    /// Perform `initialize` plus the four catalog fetches against one
    /// backend.
    async fn handshake(
        &self,
        backend: &HttpBackend,
    ) -> Result<(Identity, CapabilityLists), CrossbarError> {
        let timeout = self.config.startup_timeout;
        let name = &backend.spec.name;

        let init = self
            .jsonrpc(
                name,
                &backend.spec.url,
                JsonRpcRequest::call(
                    "initialize",
                    json!({
                        "protocolVersion": crate::protocol::DEFAULT_PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": Identity::hub(),
                    }),
                ),
                timeout,
            )
            .await?;

        let identity = init
            .get("serverInfo")
            .and_then(|v| serde_json::from_value::<Identity>(v.clone()).ok())
            .unwrap_or_else(|| Identity {
                name: name.clone(),
                version: "unknown".to_string(),
            });

        let mut capabilities = CapabilityLists::default();
        for kind in CapabilityKind::ALL {
            match self
                .jsonrpc(
                    name,
                    &backend.spec.url,
                    JsonRpcRequest::call(kind.list_method(), json!({})),
                    timeout,
                )
                .await
            {
                Ok(result) => {
                    *capabilities.of_mut(kind) =
                        result.get(kind.list_key()).cloned().unwrap_or(Value::Null);
                }
                Err(e) => {
                    // A backend may legitimately not implement every list
                    // method; it contributes nothing for that kind.
                    debug!(backend = %name, kind = %kind, error = %e, "catalog fetch failed");
                }
            }
        }

        Ok((identity, capabilities))
    }

    /// Send one JSON-RPC request and return its `result` payload.
    async fn jsonrpc(
        &self,
        backend: &str,
        url: &str,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> Result<Value, CrossbarError> {
        debug!(backend = %backend, method = %request.method, "forwarding request");

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_error(backend, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(backend = %backend, status = %status, "backend returned error status");
            return Err(CrossbarError::BackendError {
                backend: backend.to_string(),
                code: i32::from(status.as_u16()),
                message: format!("backend returned HTTP {}", status),
            });
        }

        let body: JsonRpcResponse =
            response
                .json()
                .await
                .map_err(|e| CrossbarError::BackendError {
                    backend: backend.to_string(),
                    code: -32603,
                    message: format!("failed to parse backend response: {}", e),
                })?;

        if let Some(error) = body.error {
            return Err(CrossbarError::BackendError {
                backend: backend.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Classify a reqwest error into a CrossbarError.
fn classify_error(backend: &str, timeout: Duration, error: reqwest::Error) -> CrossbarError {
    if error.is_timeout() {
        warn!(
            backend = %backend,
            timeout_secs = timeout.as_secs(),
            "backend request timed out"
        );
        CrossbarError::BackendTimeout {
            backend: backend.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        warn!(backend = %backend, error = %error, "backend request failed");
        CrossbarError::BackendUnreachable {
            backend: backend.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl BackendHost for HttpBackendHost {
    fn snapshots(&self) -> Vec<BackendSnapshot> {
        self.backends
            .iter()
            .map(|b| {
                let state = b.state.read().expect("backend state poisoned");
                BackendSnapshot {
                    name: b.spec.name.clone(),
                    status: state.status,
                    disabled: b.spec.disabled,
                    prefix: b.spec.prefix.clone(),
                    identity: state.identity.clone(),
                    capabilities: state.capabilities.clone(),
                }
            })
            .collect()
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    async fn raw_request(
        &self,
        backend: &str,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> Result<Value, CrossbarError> {
        let target = self
            .backends
            .iter()
            .find(|b| b.spec.name == backend)
            .ok_or_else(|| CrossbarError::BackendUnknown {
                backend: backend.to_string(),
            })?;

        self.jsonrpc(backend, &target.spec.url, request, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> BackendSpec {
        BackendSpec {
            name: name.to_string(),
            url: format!("http://localhost:0/{}", name),
            prefix: None,
            disabled: false,
        }
    }

    #[test]
    fn test_host_creation() {
        let host = HttpBackendHost::new(vec![spec("b1"), spec("b2")], HttpHostConfig::default());
        assert!(host.is_ok());
    }

    #[test]
    fn test_snapshots_start_connecting() {
        let host =
            HttpBackendHost::new(vec![spec("b1")], HttpHostConfig::default()).expect("host");
        let snapshots = host.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, BackendStatus::Connecting);
        assert!(!snapshots[0].is_eligible());
    }

    #[test]
    fn test_snapshots_preserve_roster_order() {
        let host = HttpBackendHost::new(
            vec![spec("zeta"), spec("alpha"), spec("mid")],
            HttpHostConfig::default(),
        )
        .expect("host");
        let names: Vec<_> = host.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_raw_request_unknown_backend() {
        let host =
            HttpBackendHost::new(vec![spec("b1")], HttpHostConfig::default()).expect("host");
        let result = host
            .raw_request(
                "nope",
                JsonRpcRequest::call("tools/call", json!({})),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(CrossbarError::BackendUnknown { .. })));
    }

    #[test]
    fn test_backend_spec_deserialization() {
        let json = r#"{"name": "search", "url": "http://localhost:9001", "prefix": "secondary"}"#;
        let spec: BackendSpec = serde_json::from_str(json).expect("should parse");
        assert_eq!(spec.name, "search");
        assert_eq!(spec.prefix.as_deref(), Some("secondary"));
        assert!(!spec.disabled);
    }

    #[test]
    fn test_default_config() {
        let config = HttpHostConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.pool_max_idle_per_host, 32);
    }
}
