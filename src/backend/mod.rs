//! Backend connection surface consumed by the hub.
//!
//! The hub never supervises backend processes itself. It observes an
//! already-managed fleet of MCP connections through the [`BackendHost`]
//! trait: a snapshot of each connection's status and advertised
//! capabilities, an event stream announcing changes, and an opaque
//! `raw_request` used to forward calls to one origin backend.
//!
//! The trait seam exists so tests can inject a scripted host without any
//! network; [`http::HttpBackendHost`] is the production implementation.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CrossbarError;
use crate::protocol::{CapabilityKind, Identity, JsonRpcRequest};

/// Connection status of one backend, as reported by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// Handshake in progress
    Connecting,
    /// Connected and serving
    Connected,
    /// Cleanly disconnected
    Disconnected,
    /// Failed
    Error,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// The advertised capability catalogs of one backend, one raw JSON value
/// per kind.
///
/// Lists are kept as raw `Value`s deliberately: a backend that advertises
/// something that is not an array must contribute nothing for that kind
/// without failing the sync pass, so shape validation happens during
/// registry rebuild, not here.
#[derive(Debug, Clone, Default)]
pub struct CapabilityLists {
    /// `tools/list` result payload
    pub tools: Value,
    /// `resources/list` result payload
    pub resources: Value,
    /// `resources/templates/list` result payload
    pub resource_templates: Value,
    /// `prompts/list` result payload
    pub prompts: Value,
}

impl CapabilityLists {
    /// Borrow the raw list for one kind.
    pub fn of(&self, kind: CapabilityKind) -> &Value {
        match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Resources => &self.resources,
            CapabilityKind::ResourceTemplates => &self.resource_templates,
            CapabilityKind::Prompts => &self.prompts,
        }
    }

    /// Mutably borrow the raw list for one kind.
    pub fn of_mut(&mut self, kind: CapabilityKind) -> &mut Value {
        match kind {
            CapabilityKind::Tools => &mut self.tools,
            CapabilityKind::Resources => &mut self.resources,
            CapabilityKind::ResourceTemplates => &mut self.resource_templates,
            CapabilityKind::Prompts => &mut self.prompts,
        }
    }
}

/// Read-only snapshot of one backend connection.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    /// Backend name, unique within the host
    pub name: String,
    /// Connection status
    pub status: BackendStatus,
    /// Operator-disabled flag; a disabled backend contributes nothing
    pub disabled: bool,
    /// Optional tool-name prefix from configuration
    pub prefix: Option<String>,
    /// Identity the backend reported during its handshake, if any
    pub identity: Option<Identity>,
    /// Advertised capability catalogs
    pub capabilities: CapabilityLists,
}

impl BackendSnapshot {
    /// Whether this backend contributes registrations during a sync pass.
    pub fn is_eligible(&self) -> bool {
        self.status == BackendStatus::Connected && !self.disabled
    }
}

/// Hub-wide lifecycle transitions reported by the backend supervisor.
///
/// Any of these triggers a full resync of all four registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubLifecycleState {
    /// Supervisor finished startup
    Ready,
    /// Supervisor restarted its fleet
    Restarted,
    /// Supervisor stopped
    Stopped,
    /// Supervisor failed
    Error,
}

/// An event emitted by the backend supervisor.
///
/// All events funnel through one broadcast channel drained by the
/// synchronizer task, which coalesces bursts into a single resync pass.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// One backend's catalog of one kind changed.
    CapabilityChanged {
        /// The backend whose catalog changed
        backend: String,
        /// The affected kind
        kind: CapabilityKind,
    },
    /// Configuration affecting exposure changed (prefixes, disabled flags).
    ConfigChanged,
    /// A hub-wide lifecycle transition.
    Lifecycle(HubLifecycleState),
}

impl BackendEvent {
    /// The registry kinds a sync pass must rebuild for this event.
    pub fn affected_kinds(&self) -> &'static [CapabilityKind] {
        match self {
            BackendEvent::CapabilityChanged { kind, .. } => match kind {
                CapabilityKind::Tools => &[CapabilityKind::Tools],
                CapabilityKind::Resources => &[CapabilityKind::Resources],
                CapabilityKind::ResourceTemplates => &[CapabilityKind::ResourceTemplates],
                CapabilityKind::Prompts => &[CapabilityKind::Prompts],
            },
            BackendEvent::ConfigChanged | BackendEvent::Lifecycle(_) => &CapabilityKind::ALL,
        }
    }
}

/// The backend fleet as seen by the hub core.
///
/// Implementations must be cheap to snapshot: `snapshots` is called on
/// every sync pass and must not await network I/O. `raw_request` is the
/// single suspension point of the hub's forward path.
#[async_trait]
pub trait BackendHost: Send + Sync {
    /// Snapshot every known backend connection, in a stable order.
    ///
    /// The order determines the last-writer-wins outcome of registry name
    /// collisions, so it must be deterministic across calls.
    fn snapshots(&self) -> Vec<BackendSnapshot>;

    /// Subscribe to supervisor events.
    fn events(&self) -> broadcast::Receiver<BackendEvent>;

    /// Forward one JSON-RPC request to a named backend and return its
    /// `result` payload.
    ///
    /// # Errors
    ///
    /// * [`CrossbarError::BackendUnknown`] - no such backend
    /// * [`CrossbarError::BackendTimeout`] - no response within `timeout`
    /// * [`CrossbarError::BackendUnreachable`] - connection failure
    /// * [`CrossbarError::BackendError`] - the backend returned a JSON-RPC
    ///   error object
    async fn raw_request(
        &self,
        backend: &str,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> Result<Value, CrossbarError>;
}
