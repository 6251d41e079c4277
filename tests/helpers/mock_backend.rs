//! Scripted backend host for integration testing.
//!
//! Provides a configurable in-process `BackendHost` with preconfigured
//! fleets, per-backend canned responses, call recording, and manual event
//! emission.
//!
//! Note: some methods are provided for future test expansion and may not
//! be used by every test binary.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crossbar::backend::{
    BackendEvent, BackendHost, BackendSnapshot, BackendStatus, CapabilityLists,
};
use crossbar::error::CrossbarError;
use crossbar::protocol::{Identity, JsonRpcRequest};

/// One request the hub forwarded to the mock fleet.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub backend: String,
    pub method: String,
    pub params: Value,
}

/// Scripted backend host.
pub struct MockHost {
    snapshots: Mutex<Vec<BackendSnapshot>>,
    responses: Mutex<HashMap<String, Result<Value, CrossbarError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    events: broadcast::Sender<BackendEvent>,
}

impl MockHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            snapshots: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Add a connected backend with the given capability catalogs.
    pub fn with_backend(self, snapshot: BackendSnapshot) -> Self {
        self.snapshots.lock().unwrap().push(snapshot);
        self
    }

    /// Add a connected backend advertising only tools.
    pub fn with_tools(self, name: &str, prefix: Option<&str>, tools: Value) -> Self {
        self.with_backend(connected(name, prefix, tools, Value::Null, Value::Null))
    }

    /// Add a connected backend advertising only resources.
    pub fn with_resources(self, name: &str, resources: Value) -> Self {
        self.with_backend(connected(name, None, Value::Null, resources, Value::Null))
    }

    /// Script the response for one backend (default is a success envelope).
    pub fn respond(&self, backend: &str, result: Result<Value, CrossbarError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(backend.to_string(), result);
    }

    /// Replace the whole fleet snapshot (for change-event tests).
    pub fn replace_fleet(&self, fleet: Vec<BackendSnapshot>) {
        *self.snapshots.lock().unwrap() = fleet;
    }

    /// Emit a supervisor event to the synchronizer.
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    /// Every request forwarded so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Build a connected backend snapshot.
pub fn connected(
    name: &str,
    prefix: Option<&str>,
    tools: Value,
    resources: Value,
    prompts: Value,
) -> BackendSnapshot {
    BackendSnapshot {
        name: name.to_string(),
        status: BackendStatus::Connected,
        disabled: false,
        prefix: prefix.map(str::to_string),
        identity: Some(Identity {
            name: format!("{}-server", name),
            version: "1.0.0".to_string(),
        }),
        capabilities: CapabilityLists {
            tools,
            resources,
            resource_templates: Value::Null,
            prompts,
        },
    }
}

#[async_trait]
impl BackendHost for MockHost {
    fn snapshots(&self) -> Vec<BackendSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    async fn raw_request(
        &self,
        backend: &str,
        request: JsonRpcRequest,
        _timeout: Duration,
    ) -> Result<Value, CrossbarError> {
        self.calls.lock().unwrap().push(RecordedCall {
            backend: backend.to_string(),
            method: request.method.clone(),
            params: request.params.clone().unwrap_or(Value::Null),
        });

        match self.responses.lock().unwrap().get(backend) {
            Some(result) => result.clone(),
            None => Ok(json!({
                "content": [{"type": "text", "text": "mock response"}]
            })),
        }
    }
}
