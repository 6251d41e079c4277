//! Crossbar - MCP capability-aggregation hub.
//!
//! One MCP endpoint in front of N independently supervised backend MCP
//! connections. Clients never talk to individual backends: the hub merges
//! every backend's tools, resources, resource templates, and prompts into
//! one namespace, routes each call back to its origin, and keeps the
//! merged catalog live as backends come, go, and change.
//!
//! # Architecture
//!
//! - [`registry`] - per-kind registries rebuilt by sync passes and
//!   published by atomic swap
//! - [`router`] - exposed-name resolution and per-kind failure shaping
//! - [`session`] + [`transport`] - one session and one transport per
//!   client, across two transport families (SSE handshake and
//!   header-correlated Streamable HTTP)
//! - [`sync`] + [`notify`] - event-driven resync and list-changed fan-out
//! - [`backend`] - the seam to the external backend supervisor
//!
//! # Data Flow
//!
//! Backend events → synchronizer rebuilds registries → dispatcher notifies
//! sessions → clients re-list → clients call → router resolves and
//! forwards → result returns on the client's transport.

pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod sync;
pub mod transport;
