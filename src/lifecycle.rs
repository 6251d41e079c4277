//! Operational lifecycle management for the hub.
//!
//! ## Lifecycle States
//!
//! ```text
//! Starting → Ready → ShuttingDown → Stopped
//! ```
//!
//! - **Starting**: initialization and first registry sync in progress
//! - **Ready**: accepting traffic
//! - **ShuttingDown**: draining, rejecting new requests
//! - **Stopped**: shutdown complete

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Initialization in progress
    Starting,
    /// Accepting traffic
    Ready,
    /// Draining, rejecting new requests
    ShuttingDown,
    /// Shutdown complete
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coordinates startup, readiness, and graceful shutdown.
///
/// # Thread Safety
///
/// Designed for concurrent access from every task; all state is atomic or
/// lock-free.
pub struct LifecycleManager {
    state: ArcSwap<LifecycleState>,
    started_at: Instant,
    shutdown_token: CancellationToken,
    active_requests: AtomicUsize,
    version: &'static str,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    /// Creates a new manager in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            active_requests: AtomicUsize::new(0),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns true if the hub is ready to accept traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready)
    }

    /// Returns true if the hub is shutting down or stopped.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    /// Transition to Ready.
    pub fn mark_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(
            version = %self.version,
            startup_duration_ms = self.started_at.elapsed().as_millis(),
            "crossbar ready"
        );
    }

    /// Returns a clone of the shutdown token for background tasks.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Begin graceful shutdown: flip state and cancel the token.
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            active_requests = self.active_requests.load(Ordering::SeqCst),
            "shutdown initiated"
        );
    }

    /// Track an active request (RAII guard).
    ///
    /// Returns `None` once shutdown has begun; the guard decrements the
    /// counter on drop, panics included.
    #[must_use]
    pub fn track_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            manager: Arc::clone(self),
        })
    }

    /// Current active request count.
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// The hub version string.
    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Wait for active requests to finish, polling every 100ms.
    pub async fn drain_requests(&self, drain_timeout: Duration) -> DrainResult {
        let deadline = Instant::now() + drain_timeout;
        let mut last_log = Instant::now();

        loop {
            let active = self.active_requests.load(Ordering::SeqCst);

            if active == 0 {
                return DrainResult::Complete;
            }

            if Instant::now() > deadline {
                warn!(
                    active_requests = active,
                    "drain timeout exceeded, forcing shutdown"
                );
                return DrainResult::Timeout { remaining: active };
            }

            if last_log.elapsed() >= Duration::from_secs(5) {
                info!(active_requests = active, "draining requests...");
                last_log = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Mark shutdown as complete.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }
}

/// RAII guard for request tracking; decrements the counter on drop.
pub struct RequestGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.manager.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of draining requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// All requests completed before the timeout
    Complete,
    /// Timeout reached with requests still active
    Timeout {
        /// Number of requests still active
        remaining: usize,
    },
}
