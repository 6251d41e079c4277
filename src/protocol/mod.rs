//! MCP protocol layer: JSON-RPC wire types and the capability kind table.
//!
//! The hub aggregates four kinds of MCP capability. Each kind differs in
//! three wire-level details: the field that uniquely identifies one
//! capability, the method used to invoke it, and the notification sent when
//! the merged catalog changes. Those details live on [`CapabilityKind`] as a
//! closed set of variants dispatched with exhaustive matches, so adding a
//! kind is a compile-time event, not a runtime table edit.

pub mod jsonrpc;

use serde::{Deserialize, Serialize};

pub use jsonrpc::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, McpRequest, fast_correlation_id, parse_jsonrpc,
};

/// The protocol version the hub advertises when a client does not request
/// a specific one during `initialize`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// One of the four MCP capability kinds the hub aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityKind {
    /// Invokable tools (`tools/list`, `tools/call`)
    Tools,
    /// Readable resources (`resources/list`, `resources/read`)
    Resources,
    /// Resource templates (`resources/templates/list`; list-only)
    ResourceTemplates,
    /// Prompt templates (`prompts/list`, `prompts/get`)
    Prompts,
}

impl CapabilityKind {
    /// All four kinds, in the order they are synced and advertised.
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::ResourceTemplates,
        CapabilityKind::Prompts,
    ];

    /// The field that uniquely identifies a capability of this kind, both
    /// in backend catalogs and in inbound call parameters.
    pub fn uid_field(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "name",
            CapabilityKind::Resources => "uri",
            CapabilityKind::ResourceTemplates => "uriTemplate",
            CapabilityKind::Prompts => "name",
        }
    }

    /// The result key under which a list of this kind is returned.
    pub fn list_key(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Resources => "resources",
            CapabilityKind::ResourceTemplates => "resourceTemplates",
            CapabilityKind::Prompts => "prompts",
        }
    }

    /// The MCP list method for this kind.
    pub fn list_method(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools/list",
            CapabilityKind::Resources => "resources/list",
            CapabilityKind::ResourceTemplates => "resources/templates/list",
            CapabilityKind::Prompts => "prompts/list",
        }
    }

    /// The MCP call method for this kind, if it has one.
    ///
    /// Resource templates are list-only; they are expanded client-side into
    /// concrete resource URIs and read via `resources/read`.
    pub fn call_method(&self) -> Option<&'static str> {
        match self {
            CapabilityKind::Tools => Some("tools/call"),
            CapabilityKind::Resources => Some("resources/read"),
            CapabilityKind::ResourceTemplates => None,
            CapabilityKind::Prompts => Some("prompts/get"),
        }
    }

    /// The notification method announcing a changed catalog of this kind.
    ///
    /// MCP defines no dedicated list-changed notification for resource
    /// templates; template changes surface as a resources change.
    pub fn list_changed_method(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "notifications/tools/list_changed",
            CapabilityKind::Resources | CapabilityKind::ResourceTemplates => {
                "notifications/resources/list_changed"
            }
            CapabilityKind::Prompts => "notifications/prompts/list_changed",
        }
    }

    /// Whether a backend `prefix` rewrites exposed names of this kind.
    ///
    /// Only tool names are prefixed; resource URIs, template URIs, and
    /// prompt names are exposed verbatim.
    pub fn prefixable(&self) -> bool {
        matches!(self, CapabilityKind::Tools)
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.list_key())
    }
}

/// A reported MCP implementation identity, as exchanged in `initialize`
/// (`clientInfo` / `serverInfo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Identity {
    /// The hub's own identity, used as `serverInfo` and as the
    /// self-reference guard during registry sync.
    pub fn hub() -> Self {
        Self {
            name: "crossbar".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}
