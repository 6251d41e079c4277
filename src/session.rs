//! Client sessions and the per-session MCP dispatch.
//!
//! Every connected client gets exactly one [`ClientSession`]: its minted
//! session id, its transport kind, an outbound queue that the transport
//! drains into the wire, and the client identity captured at `initialize`.
//! The session is the client's dedicated protocol-server instance; the
//! registries and router it dispatches against are shared hub state.
//!
//! Table entries are only created and removed by their owning transport's
//! lifecycle (open and close), so no locking beyond the concurrent map is
//! needed.

use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CrossbarError;
use crate::protocol::{
    CapabilityKind, DEFAULT_PROTOCOL_VERSION, Identity, JsonRpcResponse, McpRequest,
};
use crate::server::HubState;

/// Depth of a session's outbound queue. A client that stops reading its
/// stream loses notifications past this depth rather than blocking the
/// synchronizer.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// The transport family a session was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Streaming-handshake session (`GET /sse` + `POST /messages`)
    Sse,
    /// Header-correlated session (`/mcp` with `mcp-session-id`)
    StreamableHttp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => f.write_str("sse"),
            Self::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

/// One client's session state.
pub struct ClientSession {
    /// Minted session identifier
    pub id: String,
    /// Transport family
    pub transport: TransportKind,
    /// Outbound queue of serialized JSON-RPC messages
    outbound: mpsc::Sender<String>,
    /// Receiver half, held until the transport's stream handler claims it
    stream_rx: Mutex<Option<mpsc::Receiver<String>>>,
    /// Client identity captured at initialize; observability only
    client_identity: RwLock<Option<Identity>>,
}

impl ClientSession {
    /// Queue a response for delivery on this session's stream.
    pub async fn send(&self, message: String) -> Result<(), CrossbarError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| CrossbarError::SessionNotFound {
                session_id: self.id.clone(),
            })
    }

    /// Queue a notification without blocking.
    ///
    /// Used by the dispatcher from the synchronizer task; a full or closed
    /// queue is this session's failure alone.
    pub fn try_notify(&self, message: String) -> Result<(), CrossbarError> {
        self.outbound
            .try_send(message)
            .map_err(|_| CrossbarError::SessionNotFound {
                session_id: self.id.clone(),
            })
    }

    /// Claim the stream receiver. Returns `None` if already claimed.
    pub fn take_stream(&self) -> Option<mpsc::Receiver<String>> {
        self.stream_rx.lock().expect("stream slot poisoned").take()
    }

    /// Record the client identity reported during initialize.
    pub fn set_client_identity(&self, identity: Identity) {
        *self
            .client_identity
            .write()
            .expect("identity slot poisoned") = Some(identity);
    }

    /// The client identity, if the handshake completed.
    pub fn client_identity(&self) -> Option<Identity> {
        self.client_identity
            .read()
            .expect("identity slot poisoned")
            .clone()
    }
}

/// Concurrent table of live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Arc<ClientSession>>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session and insert it.
    pub fn create(&self, transport: TransportKind) -> Arc<ClientSession> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let session = Arc::new(ClientSession {
            id: Uuid::new_v4().to_string(),
            transport,
            outbound: tx,
            stream_rx: Mutex::new(Some(rx)),
            client_identity: RwLock::new(None),
        });
        self.sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, transport = %transport, "session opened");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and close a session. Idempotent.
    ///
    /// Dropping the table's reference closes the outbound queue once the
    /// transport lets go of its stream half; close failures have nowhere
    /// to propagate and are only logged by callers.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session_id = %id, "session closed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no client is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot the live sessions for fan-out.
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Dispatch one parsed request against a session.
///
/// Returns `None` for notifications (no response per JSON-RPC 2.0).
pub async fn dispatch(
    state: &HubState,
    session: &ClientSession,
    request: McpRequest,
) -> Option<JsonRpcResponse> {
    let correlation_id = request.correlation_id.to_string();

    if request.is_notification() {
        match request.method.as_str() {
            "notifications/initialized" => {
                debug!(session_id = %session.id, "client reported initialized");
            }
            other => {
                debug!(session_id = %session.id, method = %other, "ignoring client notification");
            }
        }
        return None;
    }

    let id = request.id.clone();
    let result: Result<Value, CrossbarError> = match request.method.as_str() {
        "initialize" => handle_initialize(state, session, &request),
        "ping" => Ok(json!({})),

        "tools/list" => Ok(list_result(state, CapabilityKind::Tools)),
        "resources/list" => Ok(list_result(state, CapabilityKind::Resources)),
        "resources/templates/list" => Ok(list_result(state, CapabilityKind::ResourceTemplates)),
        "prompts/list" => Ok(list_result(state, CapabilityKind::Prompts)),

        "tools/call" => state.router.invoke(CapabilityKind::Tools, &request).await,
        "resources/read" => {
            state
                .router
                .invoke(CapabilityKind::Resources, &request)
                .await
        }
        "prompts/get" => state.router.invoke(CapabilityKind::Prompts, &request).await,

        other => Err(CrossbarError::MethodNotFound {
            method: other.to_string(),
        }),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            debug!(
                session_id = %session.id,
                correlation_id = %correlation_id,
                error = %e,
                "request failed"
            );
            JsonRpcResponse::error(id, e.to_jsonrpc_error(&correlation_id))
        }
    })
}

/// Handle `initialize`: capture the client identity and advertise the
/// merged catalog's capability set.
fn handle_initialize(
    state: &HubState,
    session: &ClientSession,
    request: &McpRequest,
) -> Result<Value, CrossbarError> {
    if let Some(client_info) = request.param("clientInfo") {
        match serde_json::from_value::<Identity>(client_info.clone()) {
            Ok(identity) => {
                info!(
                    session_id = %session.id,
                    client = %identity,
                    "client initialized"
                );
                session.set_client_identity(identity);
            }
            Err(e) => {
                // Identity is observability-only; a malformed one is not
                // worth failing the handshake over.
                warn!(session_id = %session.id, error = %e, "unparseable clientInfo");
            }
        }
    }

    let protocol_version = request
        .param("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);

    Ok(json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": { "listChanged": true },
            "resources": { "listChanged": true, "subscribe": false },
            "prompts": { "listChanged": true },
        },
        "serverInfo": state.identity,
    }))
}

/// Build one kind's list result from the current registry generation.
fn list_result(state: &HubState, kind: CapabilityKind) -> Value {
    let mut result = Map::new();
    result.insert(
        kind.list_key().to_string(),
        Value::Array(state.registries.load(kind).definitions()),
    );
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendEvent, BackendHost, BackendSnapshot, BackendStatus,
                         CapabilityLists};
    use crate::protocol::{JsonRpcId, JsonRpcRequest, parse_jsonrpc};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Host with one connected backend and a canned tool response.
    struct FixedHost {
        events: broadcast::Sender<BackendEvent>,
    }

    impl FixedHost {
        fn new() -> Self {
            let (events, _) = broadcast::channel(8);
            Self { events }
        }
    }

    #[async_trait]
    impl BackendHost for FixedHost {
        fn snapshots(&self) -> Vec<BackendSnapshot> {
            vec![BackendSnapshot {
                name: "b1".to_string(),
                status: BackendStatus::Connected,
                disabled: false,
                prefix: None,
                identity: None,
                capabilities: CapabilityLists {
                    tools: json!([{"name": "search", "description": "find"}]),
                    ..Default::default()
                },
            }]
        }

        fn events(&self) -> broadcast::Receiver<BackendEvent> {
            self.events.subscribe()
        }

        async fn raw_request(
            &self,
            _backend: &str,
            _request: JsonRpcRequest,
            _timeout: Duration,
        ) -> Result<Value, CrossbarError> {
            Ok(json!({"content": [{"type": "text", "text": "ok"}]}))
        }
    }

    fn test_state() -> HubState {
        let state = HubState::for_tests(Arc::new(FixedHost::new()));
        state
            .registries
            .sync(&state.host.snapshots(), &state.identity, &CapabilityKind::ALL);
        state
    }

    fn request(body: &str) -> McpRequest {
        parse_jsonrpc(body.as_bytes()).expect("valid request")
    }

    #[test]
    fn test_create_get_remove() {
        let table = SessionTable::new();
        assert!(table.is_empty());

        let session = table.create(TransportKind::Sse);
        assert_eq!(table.len(), 1);
        assert!(table.get(&session.id).is_some());

        assert!(table.remove(&session.id));
        assert!(table.get(&session.id).is_none());
        // Removal is idempotent.
        assert!(!table.remove(&session.id));
    }

    #[test]
    fn test_stream_receiver_claimed_once() {
        let table = SessionTable::new();
        let session = table.create(TransportKind::StreamableHttp);
        assert!(session.take_stream().is_some());
        assert!(session.take_stream().is_none());
    }

    #[tokio::test]
    async fn test_initialize_captures_identity() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::StreamableHttp);
        assert!(session.client_identity().is_none());

        let req = request(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"inspector","version":"0.4.2"}}}"#,
        );
        let response = dispatch(&state, &session, req).await.expect("has response");

        assert!(response.error.is_none());
        let result = response.result.expect("result");
        assert_eq!(result["serverInfo"]["name"], "crossbar");
        assert_eq!(result["protocolVersion"], "2024-11-05");

        let identity = session.client_identity().expect("captured");
        assert_eq!(identity.name, "inspector");
        assert_eq!(identity.version, "0.4.2");
    }

    #[tokio::test]
    async fn test_tools_list_serves_merged_catalog() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::Sse);

        let req = request(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        let response = dispatch(&state, &session, req).await.expect("has response");

        let result = response.result.expect("result");
        let tools = result["tools"].as_array().expect("array");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "search");
    }

    #[tokio::test]
    async fn test_tools_call_routes_through_router() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::Sse);

        let req = request(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"search","arguments":{}}}"#,
        );
        let response = dispatch(&state, &session, req).await.expect("has response");

        assert_eq!(response.id, Some(JsonRpcId::Number(3)));
        let result = response.result.expect("result");
        assert_eq!(result["content"][0]["text"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::Sse);

        let req = request(r#"{"jsonrpc":"2.0","id":4,"method":"sampling/createMessage"}"#);
        let response = dispatch(&state, &session, req).await.expect("has response");

        let error = response.error.expect("error");
        assert_eq!(error.code, -32601);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::Sse);

        let req = request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(dispatch(&state, &session, req).await.is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let state = test_state();
        let session = state.sessions.create(TransportKind::Sse);

        let req = request(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#);
        let response = dispatch(&state, &session, req).await.expect("has response");
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_outbound_queue_round_trip() {
        let table = SessionTable::new();
        let session = table.create(TransportKind::Sse);
        let mut rx = session.take_stream().expect("stream");

        session.send("hello".to_string()).await.expect("queued");
        session.try_notify("world".to_string()).expect("queued");

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_notify_after_stream_dropped_fails() {
        let table = SessionTable::new();
        let session = table.create(TransportKind::Sse);
        let rx = session.take_stream().expect("stream");
        drop(rx);

        assert!(session.try_notify("late".to_string()).is_err());
    }
}
