//! Shared application state for the HTTP and `WebSocket` handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::task::TaskTracker;

use crate::registry::ConnectionRegistry;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor. The
/// registry is the same instance the broadcast, liveness and stats tasks
/// hold.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of open connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Frames buffered per connection before sends start failing.
    pub outbound_capacity: usize,
    /// One tracked task per upgraded socket, so shutdown can wait for the
    /// close frames to be written.
    pub connections: TaskTracker,
    started_at: Instant,
}

impl AppState {
    /// Create state around `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, outbound_capacity: usize) -> Self {
        Self {
            registry,
            outbound_capacity: outbound_capacity.max(1),
            connections: TaskTracker::new(),
            started_at: Instant::now(),
        }
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(ConnectionRegistry::new()), DEFAULT_OUTBOUND_CAPACITY)
    }
}
