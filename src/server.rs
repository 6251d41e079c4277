//! Hub server: shared state, HTTP surface, and the serve loop.
//!
//! # Request Flow
//!
//! 1. A transport handler (`/sse`, `/messages`, `/mcp`) resolves or mints
//!    the client session
//! 2. The body is parsed as single-message JSON-RPC
//! 3. The session dispatch serves lists from the registries or routes
//!    calls through the request router
//! 4. The response travels back on the transport the session was opened
//!    with

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::backend::BackendHost;
use crate::config::HubConfig;
use crate::lifecycle::LifecycleManager;
use crate::protocol::{CapabilityKind, Identity};
use crate::registry::RegistrySet;
use crate::router::RequestRouter;
use crate::session::SessionTable;
use crate::sync::Synchronizer;
use crate::transport;

/// State shared by every request handler.
pub struct HubState {
    /// The backend fleet
    pub host: Arc<dyn BackendHost>,
    /// Per-kind capability registries
    pub registries: Arc<RegistrySet>,
    /// Capability call router
    pub router: RequestRouter,
    /// Live client sessions
    pub sessions: Arc<SessionTable>,
    /// Lifecycle coordination
    pub lifecycle: Arc<LifecycleManager>,
    /// The hub's own identity (serverInfo and self-reference guard)
    pub identity: Identity,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl HubState {
    /// Build hub state around a backend host.
    pub fn new(config: &HubConfig, host: Arc<dyn BackendHost>) -> Self {
        let registries = Arc::new(RegistrySet::new());
        let router = RequestRouter::new(host.clone(), registries.clone(), config.request_timeout);
        Self {
            host,
            registries,
            router,
            sessions: Arc::new(SessionTable::new()),
            lifecycle: Arc::new(LifecycleManager::new()),
            identity: Identity::hub(),
            max_body_size: config.max_body_size,
        }
    }

    /// Current observability counters.
    pub fn stats(&self) -> HubStats {
        let counts = CapabilityCounts {
            tools: self.registries.size(CapabilityKind::Tools),
            resources: self.registries.size(CapabilityKind::Resources),
            resource_templates: self.registries.size(CapabilityKind::ResourceTemplates),
            prompts: self.registries.size(CapabilityKind::Prompts),
        };
        HubStats {
            active_clients: self.sessions.len(),
            total_capabilities: counts.total(),
            registered_capabilities: counts,
        }
    }

    /// Minimal state for unit tests, using default configuration.
    #[cfg(test)]
    pub(crate) fn for_tests(host: Arc<dyn BackendHost>) -> Self {
        Self::new(&HubConfig::default(), host)
    }
}

/// Per-kind registration counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityCounts {
    /// Registered tools
    pub tools: usize,
    /// Registered resources
    pub resources: usize,
    /// Registered resource templates
    pub resource_templates: usize,
    /// Registered prompts
    pub prompts: usize,
}

impl CapabilityCounts {
    fn total(&self) -> usize {
        self.tools + self.resources + self.resource_templates + self.prompts
    }
}

/// Observability snapshot exposed on the admin surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Live client sessions
    pub active_clients: usize,
    /// Per-kind registration counts
    pub registered_capabilities: CapabilityCounts,
    /// Sum of all four registries
    pub total_capabilities: usize,
}

/// The hub server.
pub struct HubServer {
    config: HubConfig,
    state: Arc<HubState>,
}

impl HubServer {
    /// Create a hub over an arbitrary backend host.
    ///
    /// Production wiring uses `HttpBackendHost`; tests inject scripted
    /// hosts through the same seam.
    pub fn with_host(config: HubConfig, host: Arc<dyn BackendHost>) -> Self {
        let state = Arc::new(HubState::new(&config, host));
        Self { config, state }
    }

    /// The shared state (for admin wiring and tests).
    pub fn state(&self) -> Arc<HubState> {
        self.state.clone()
    }

    /// The client-facing axum router.
    ///
    /// - `GET /sse` - open a streaming-handshake session
    /// - `POST /messages?sessionId=<id>` - deliver one message on it
    /// - `ALL /mcp` - header-correlated Streamable HTTP
    pub fn router(&self) -> Router {
        Router::new()
            .route("/sse", get(transport::sse::open_stream))
            .route("/messages", post(transport::sse::post_message))
            .route("/mcp", any(transport::streamable::handle))
            .layer(DefaultBodyLimit::max(self.state.max_body_size))
            .with_state(self.state.clone())
    }

    /// Run the hub until shutdown.
    ///
    /// Performs the initial registry sync, starts the synchronizer and
    /// admin server, then serves until the lifecycle token is cancelled
    /// and requests have drained.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();

        // First generation before any client can connect.
        let changed = state.registries.sync(
            &state.host.snapshots(),
            &state.identity,
            &CapabilityKind::ALL,
        );
        info!(
            changed_kinds = changed.len(),
            total_capabilities = state.stats().total_capabilities,
            "initial registry sync complete"
        );

        // Detached on purpose; it exits when the shutdown token fires.
        let _synchronizer = Synchronizer::spawn(
            state.host.clone(),
            state.registries.clone(),
            state.sessions.clone(),
            state.identity.clone(),
            state.lifecycle.shutdown_token(),
        );

        let admin_router = crate::admin::router(state.clone());
        let admin_listener = TcpListener::bind(&self.config.admin_addr).await?;
        info!(addr = %self.config.admin_addr, "admin server listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin_router).await {
                error!(error = %e, "admin server error");
            }
        });

        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "crossbar listening");
        state.lifecycle.mark_ready();

        let token = state.lifecycle.shutdown_token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        state.lifecycle.drain_requests(self.config.drain_timeout).await;
        state.lifecycle.mark_stopped();
        Ok(())
    }
}
